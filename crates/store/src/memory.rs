// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory store backend.
//!
//! A single `parking_lot::Mutex` around the whole keyspace gives every
//! script the one-execution-thread guarantee for free. Semantics mirror
//! the Redis backend exactly; the test suite runs against this backend.

use crate::error::StoreError;
use crate::keys;
use crate::script::{ScriptCall, ScriptReply};
use crate::{Store, StreamEntry};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use yard_core::{
    pending_score, Clock, Event, EventId, EventRecord, Fields, Job, JobFailure, JobStatus, Lease,
    StepTerminal, SystemClock, Workflow, WorkflowStatus, WorkflowTerminal,
};

#[derive(Default)]
struct StringEntry {
    value: String,
    expires_at_ms: Option<u64>,
}

#[derive(Default)]
struct GroupState {
    last_delivered: (u64, u64),
    pending: BTreeSet<String>,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<StreamEntry>,
    last_id: (u64, u64),
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn next_id(&mut self, now_ms: u64) -> String {
        let (last_ms, last_seq) = self.last_id;
        let id = if now_ms > last_ms { (now_ms, 0) } else { (last_ms, last_seq + 1) };
        self.last_id = id;
        format!("{}-{}", id.0, id.1)
    }
}

fn parse_stream_id(id: &str) -> (u64, u64) {
    match id.split_once('-') {
        Some((ms, seq)) => (ms.parse().unwrap_or(0), seq.parse().unwrap_or(0)),
        None => (id.parse().unwrap_or(0), 0),
    }
}

#[derive(Default)]
struct Inner {
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    sets: HashMap<String, BTreeSet<String>>,
    strings: HashMap<String, StringEntry>,
    streams: HashMap<String, StreamState>,
    channels: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
}

impl Inner {
    fn load_job(&self, job_id: &str) -> Option<Job> {
        let map = self.hashes.get(&keys::job(job_id))?;
        Job::from_fields(map).ok()
    }

    fn save_job(&mut self, job: &Job) {
        let map: HashMap<String, String> = job.to_fields().into_iter().collect();
        self.hashes.insert(keys::job(job.id.as_str()), map);
    }

    /// Extra script-owned hash fields that are not part of the job record.
    fn set_job_meta(&mut self, job_id: &str, field: &str, value: String) {
        self.hashes.entry(keys::job(job_id)).or_default().insert(field.to_string(), value);
    }

    fn job_meta(&self, job_id: &str, field: &str) -> Option<String> {
        self.hashes.get(&keys::job(job_id)).and_then(|m| m.get(field)).cloned()
    }

    fn load_workflow(&self, id: &str) -> Option<Workflow> {
        let map = self.hashes.get(&keys::workflow(id))?;
        Workflow::from_fields(map).ok()
    }

    fn save_workflow(&mut self, workflow: &Workflow) {
        let map: HashMap<String, String> = workflow.to_fields().into_iter().collect();
        self.hashes.insert(keys::workflow(workflow.id.as_str()), map);
    }

    fn zadd(&mut self, key: &str, member: &str, score: f64) {
        self.zsets.entry(key.to_string()).or_default().insert(member.to_string(), score);
    }

    fn zrem(&mut self, key: &str, member: &str) -> bool {
        self.zsets.get_mut(key).map(|z| z.remove(member).is_some()).unwrap_or(false)
    }

    fn sadd(&mut self, key: &str, member: &str) -> bool {
        self.sets.entry(key.to_string()).or_default().insert(member.to_string())
    }

    fn srem(&mut self, key: &str, member: &str) -> bool {
        self.sets.get_mut(key).map(|s| s.remove(member)).unwrap_or(false)
    }

    /// Descending score; equal scores fall back to descending member
    /// order, matching Redis `ZRANGE ... REV` exactly. The match-scan order.
    fn zrange_desc(&self, key: &str, limit: usize) -> Vec<(String, f64)> {
        let Some(zset) = self.zsets.get(key) else { return Vec::new() };
        let mut members: Vec<(String, f64)> = zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
        members.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(b.0.cmp(&a.0))
        });
        members.truncate(limit);
        members
    }

    /// Ascending score, the aging-scan order.
    fn zrange_asc(&self, key: &str, limit: usize) -> Vec<(String, f64)> {
        let Some(zset) = self.zsets.get(key) else { return Vec::new() };
        let mut members: Vec<(String, f64)> = zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
        members.sort_by(|a, b| {
            a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0))
        });
        members.truncate(limit);
        members
    }

    /// Append + publish in one step: the durable/live halves of `publish`.
    fn publish_record(&mut self, record: &EventRecord, now_ms: u64) -> String {
        let event_type = record.type_name();
        let body = record.to_stream_body();
        let stream = self.streams.entry(keys::stream(event_type)).or_default();
        let id = stream.next_id(now_ms);
        stream.entries.push(StreamEntry { id: id.clone(), body: body.clone() });
        self.publish_channel(&keys::channel(event_type), &body);
        id
    }

    fn publish_channel(&mut self, channel: &str, body: &str) {
        if let Some(subscribers) = self.channels.get_mut(channel) {
            subscribers.retain(|tx| tx.send(body.to_string()).is_ok());
        }
    }
}

/// In-memory [`Store`] implementation.
pub struct MemoryStore<C: Clock = SystemClock> {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    clock: C,
}

impl MemoryStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { inner: Arc::new(Mutex::new(Inner::default())), notify: Arc::new(Notify::new()), clock }
    }
}

#[async_trait]
impl<C: Clock> Store for MemoryStore<C> {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn hash_put(&self, key: &str, fields: &Fields) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.hashes.insert(key.to_string(), fields.iter().cloned().collect());
        Ok(())
    }

    async fn hash_get(&self, key: &str) -> Result<Option<HashMap<String, String>>, StoreError> {
        Ok(self.inner.lock().hashes.get(key).cloned())
    }

    async fn hash_update(&self, key: &str, fields: &Fields) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let map = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            map.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hash_conditional_update(
        &self,
        key: &str,
        expected: &Fields,
        update: &Fields,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let Some(map) = inner.hashes.get(key) else { return Ok(false) };
        for (field, value) in expected {
            if map.get(field) != Some(value) {
                return Ok(false);
            }
        }
        let map = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in update {
            map.insert(field.clone(), value.clone());
        }
        Ok(true)
    }

    async fn hash_delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.lock().hashes.remove(key);
        Ok(())
    }

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.inner.lock().zadd(key, member, score);
        Ok(())
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().zrem(key, member))
    }

    async fn sorted_set_range_desc(
        &self,
        key: &str,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        Ok(self.inner.lock().zrange_desc(key, limit))
    }

    async fn sorted_set_len(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.inner.lock().zsets.get(key).map(|z| z.len() as u64).unwrap_or(0))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().sadd(key, member))
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().srem(key, member))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn stream_append(&self, stream: &str, body: &str) -> Result<String, StoreError> {
        let now_ms = self.clock.epoch_ms();
        let mut inner = self.inner.lock();
        let state = inner.streams.entry(stream.to_string()).or_default();
        let id = state.next_id(now_ms);
        state.entries.push(StreamEntry { id: id.clone(), body: body.to_string() });
        drop(inner);
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let state = inner.streams.entry(stream.to_string()).or_default();
        // New groups start at the stream end, like XGROUP CREATE … $.
        let last_delivered = state.last_id;
        state
            .groups
            .entry(group.to_string())
            .or_insert_with(|| GroupState { last_delivered, pending: BTreeSet::new() });
        Ok(())
    }

    async fn stream_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let _ = consumer;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(block_ms);
        loop {
            // Take the notified future before checking, so an append
            // between check and wait cannot be missed.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                let state = inner.streams.entry(stream.to_string()).or_default();
                let stream_end = state.last_id;
                let cursor = state
                    .groups
                    .entry(group.to_string())
                    .or_insert_with(|| GroupState {
                        last_delivered: stream_end,
                        pending: BTreeSet::new(),
                    })
                    .last_delivered;
                let fresh: Vec<StreamEntry> = state
                    .entries
                    .iter()
                    .filter(|e| parse_stream_id(&e.id) > cursor)
                    .take(count)
                    .cloned()
                    .collect();
                if !fresh.is_empty() {
                    let group_state = state.groups.entry(group.to_string()).or_default();
                    for entry in &fresh {
                        group_state.last_delivered = parse_stream_id(&entry.id);
                        group_state.pending.insert(entry.id.clone());
                    }
                    return Ok(fresh);
                }
            }
            if block_ms == 0 || tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout_at(deadline, notified).await;
        }
    }

    async fn stream_ack(&self, stream: &str, group: &str, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.streams.get_mut(stream) {
            if let Some(group_state) = state.groups.get_mut(group) {
                group_state.pending.remove(id);
            }
        }
        Ok(())
    }

    async fn stream_range_from(
        &self,
        stream: &str,
        after_id: Option<&str>,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let inner = self.inner.lock();
        let Some(state) = inner.streams.get(stream) else { return Ok(Vec::new()) };
        let cursor = after_id.map(parse_stream_id);
        Ok(state
            .entries
            .iter()
            .filter(|e| match cursor {
                Some(c) => parse_stream_id(&e.id) > c,
                None => true,
            })
            .take(count)
            .cloned()
            .collect())
    }

    async fn stream_trim(
        &self,
        stream: &str,
        max_len: u64,
        min_ms: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.streams.get_mut(stream) {
            state.entries.retain(|e| parse_stream_id(&e.id).0 >= min_ms);
            let excess = state.entries.len().saturating_sub(max_len as usize);
            if excess > 0 {
                state.entries.drain(..excess);
            }
        }
        Ok(())
    }

    async fn stream_len(&self, stream: &str) -> Result<u64, StoreError> {
        Ok(self.inner.lock().streams.get(stream).map(|s| s.entries.len() as u64).unwrap_or(0))
    }

    async fn pubsub_publish(&self, channel: &str, body: &str) -> Result<(), StoreError> {
        self.inner.lock().publish_channel(channel, body);
        Ok(())
    }

    async fn pubsub_subscribe(
        &self,
        channel: &str,
    ) -> Result<mpsc::UnboundedReceiver<String>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().channels.entry(channel.to_string()).or_default().push(tx);
        Ok(rx)
    }

    async fn script_call(&self, call: ScriptCall) -> Result<ScriptReply, StoreError> {
        let mut inner = self.inner.lock();
        let reply = run_script(&mut inner, call);
        drop(inner);
        self.notify.notify_waiters();
        Ok(reply)
    }
}

/// Execute one script under the store lock. Mirrors the Lua scripts
/// statement for statement.
fn run_script(inner: &mut Inner, call: ScriptCall) -> ScriptReply {
    match call {
        ScriptCall::SubmitJob { job, score, idempotency, record } => {
            let now_ms = record.emitted_at;
            if let Some(check) = idempotency {
                let key = keys::idempotency(&check.key);
                let live = inner.strings.get(&key).and_then(|entry| {
                    match entry.expires_at_ms {
                        Some(expires) if expires <= now_ms => None,
                        _ => Some(entry.value.clone()),
                    }
                });
                if let Some(stored) = live {
                    let (job_id, fingerprint) =
                        stored.split_once(' ').unwrap_or((stored.as_str(), ""));
                    let job_id = job_id.into();
                    return if fingerprint == check.fingerprint {
                        ScriptReply::Duplicate { job_id }
                    } else {
                        ScriptReply::IdempotencyConflict { job_id }
                    };
                }
                inner.strings.insert(
                    key,
                    StringEntry {
                        value: format!("{} {}", job.id, check.fingerprint),
                        expires_at_ms: Some(now_ms + check.ttl_sec * 1000),
                    },
                );
            }
            inner.save_job(&job);
            inner.zadd(keys::PENDING, job.id.as_str(), score);
            inner.publish_record(&record, now_ms);
            ScriptReply::Submitted { record }
        }

        ScriptCall::SubmitWorkflow { workflow, jobs, records } => {
            let now_ms = workflow.created_at_ms;
            inner.save_workflow(&workflow);
            inner.sadd(keys::WORKFLOWS, workflow.id.as_str());
            for (job, score) in &jobs {
                inner.save_job(job);
                inner.zadd(keys::PENDING, job.id.as_str(), *score);
            }
            for record in &records {
                inner.publish_record(record, now_ms);
            }
            ScriptReply::WorkflowSubmitted { records }
        }

        ScriptCall::MatchClaim { descriptor, now_ms, lease_ms, scan_cap, event_id } => {
            let candidates = inner.zrange_desc(keys::PENDING, scan_cap as usize);
            for (job_id, _) in candidates {
                let Some(mut job) = inner.load_job(&job_id) else { continue };
                if !matches(&job, &descriptor) {
                    continue;
                }
                job.status = JobStatus::Assigned;
                job.attempt += 1;
                job.lease = Some(Lease {
                    worker_id: descriptor.worker_id.clone(),
                    expires_at_ms: now_ms + lease_ms,
                    last_progress_at_ms: now_ms,
                });
                inner.zrem(keys::PENDING, &job_id);
                inner.sadd(keys::ACTIVE, &job_id);
                inner.save_job(&job);
                let record = job_record(
                    event_id,
                    now_ms,
                    &job,
                    Event::JobAssigned {
                        job_id: job.id,
                        worker_id: descriptor.worker_id.clone(),
                        attempt: job.attempt,
                        lease_expires_at_ms: now_ms + lease_ms,
                        workflow: job.workflow.clone(),
                    },
                );
                inner.publish_record(&record, now_ms);
                return ScriptReply::Claimed { job: Box::new(job), record };
            }
            ScriptReply::NoMatch
        }

        ScriptCall::MarkStarted { job_id, worker_id, now_ms } => {
            let Some(mut job) = inner.load_job(job_id.as_str()) else {
                return ScriptReply::NotFound;
            };
            if job.status != JobStatus::Assigned {
                return conflict(format!("expected assigned, found {}", job.status));
            }
            match &mut job.lease {
                Some(lease) if lease.worker_id == worker_id => {
                    lease.last_progress_at_ms = now_ms;
                }
                _ => return conflict("lease not held by caller".to_string()),
            }
            job.status = JobStatus::Running;
            inner.save_job(&job);
            ScriptReply::Started
        }

        ScriptCall::ReportProgress {
            job_id,
            worker_id,
            fraction,
            message,
            now_ms,
            lease_ms,
            event_id,
        } => {
            let Some(mut job) = inner.load_job(job_id.as_str()) else {
                return ScriptReply::NotFound;
            };
            if !job.status.is_active() {
                return conflict(format!("job is {}", job.status));
            }
            match &job.lease {
                Some(lease) if lease.worker_id == worker_id => {}
                _ => return conflict("lease not held by caller".to_string()),
            }
            // Progress is monotone non-decreasing; stale reports are dropped.
            if fraction <= job.progress && job.progress > 0.0 {
                return ScriptReply::Progress { record: None };
            }
            job.progress = fraction.clamp(0.0, 1.0);
            if let Some(lease) = &mut job.lease {
                lease.expires_at_ms = now_ms + lease_ms;
                lease.last_progress_at_ms = now_ms;
            }
            inner.save_job(&job);
            let record = job_record(
                event_id,
                now_ms,
                &job,
                Event::JobProgress { job_id: job.id, worker_id, fraction: job.progress, message },
            );
            inner.publish_record(&record, now_ms);
            ScriptReply::Progress { record: Some(record) }
        }

        ScriptCall::CompleteJob { job_id, worker_id, result, result_hash, now_ms, event_id } => {
            let Some(mut job) = inner.load_job(job_id.as_str()) else {
                return ScriptReply::NotFound;
            };
            if job.status == JobStatus::Completed {
                let same_worker =
                    inner.job_meta(job_id.as_str(), "completed_by").as_deref()
                        == Some(worker_id.as_str());
                let same_result =
                    inner.job_meta(job_id.as_str(), "result_hash").as_deref()
                        == Some(result_hash.as_str());
                return if same_worker && same_result {
                    ScriptReply::Completed { record: None }
                } else {
                    conflict("job already completed".to_string())
                };
            }
            if !job.status.is_active() {
                return conflict(format!("job is {}", job.status));
            }
            match &job.lease {
                Some(lease) if lease.worker_id == worker_id => {}
                _ => return conflict("lease not held by caller".to_string()),
            }
            job.status = JobStatus::Completed;
            job.result = Some(result.clone());
            job.lease = None;
            job.cancel_requested_at_ms = None;
            job.progress = 1.0;
            inner.srem(keys::ACTIVE, job_id.as_str());
            inner.sadd(keys::TERMINAL, job_id.as_str());
            inner.save_job(&job);
            inner.set_job_meta(job_id.as_str(), "completed_by", worker_id.to_string());
            inner.set_job_meta(job_id.as_str(), "result_hash", result_hash);
            inner.set_job_meta(job_id.as_str(), "terminal_at_ms", now_ms.to_string());
            let record = job_record(
                event_id,
                now_ms,
                &job,
                Event::JobCompleted {
                    job_id: job.id,
                    worker_id,
                    result,
                    workflow: job.workflow.clone(),
                    webhook: job.webhook,
                },
            );
            inner.publish_record(&record, now_ms);
            ScriptReply::Completed { record: Some(record) }
        }

        ScriptCall::FailJob { job_id, worker_id, failure, now_ms, score_params, event_id } => {
            let Some(mut job) = inner.load_job(job_id.as_str()) else {
                return ScriptReply::NotFound;
            };
            if !job.status.is_active() {
                return conflict(format!("job is {}", job.status));
            }
            match &job.lease {
                Some(lease) if lease.worker_id == worker_id => {}
                _ => return conflict("lease not held by caller".to_string()),
            }
            let will_retry = failure.retryable && job.attempt < job.max_attempts;
            requeue_or_fail(inner, &mut job, &failure, will_retry, now_ms, &score_params);
            let record = job_record(
                event_id,
                now_ms,
                &job,
                Event::JobFailed {
                    job_id: job.id,
                    worker_id: Some(worker_id),
                    error: failure,
                    will_retry,
                    attempt: job.attempt,
                    workflow: job.workflow.clone(),
                    webhook: job.webhook,
                },
            );
            inner.publish_record(&record, now_ms);
            ScriptReply::Failed { will_retry, record }
        }

        ScriptCall::CancelJob { job_id, now_ms, event_id, cause } => {
            let Some(mut job) = inner.load_job(job_id.as_str()) else {
                return ScriptReply::NotFound;
            };
            if job.is_terminal() {
                return conflict(format!("job is {}", job.status));
            }
            let was_leased_to = job.lease.as_ref().map(|l| l.worker_id.clone());
            match job.status {
                JobStatus::Pending => {
                    inner.zrem(keys::PENDING, job_id.as_str());
                }
                _ => {
                    inner.srem(keys::ACTIVE, job_id.as_str());
                }
            }
            job.status = JobStatus::Cancelled;
            job.lease = None;
            job.cancel_requested_at_ms = Some(now_ms);
            inner.sadd(keys::TERMINAL, job_id.as_str());
            inner.save_job(&job);
            inner.set_job_meta(job_id.as_str(), "terminal_at_ms", now_ms.to_string());
            let mut record = job_record(
                event_id,
                now_ms,
                &job,
                Event::JobCancelled {
                    job_id: job.id,
                    workflow: job.workflow.clone(),
                    webhook: job.webhook,
                },
            );
            record.causation_id = cause;
            inner.publish_record(&record, now_ms);
            ScriptReply::Cancelled { record, was_leased_to }
        }

        ScriptCall::RenewLease { job_id, worker_id, now_ms, lease_ms } => {
            let Some(mut job) = inner.load_job(job_id.as_str()) else {
                return ScriptReply::NotFound;
            };
            if !job.status.is_active() {
                return conflict(format!("job is {}", job.status));
            }
            match &mut job.lease {
                Some(lease) if lease.worker_id == worker_id => {
                    lease.expires_at_ms = now_ms + lease_ms;
                    lease.last_progress_at_ms = now_ms;
                }
                _ => return conflict("lease not held by caller".to_string()),
            }
            inner.save_job(&job);
            ScriptReply::Renewed
        }

        ScriptCall::ReclaimLease {
            job_id,
            expected_worker,
            now_ms,
            grace_ms,
            score_params,
            event_id,
        } => {
            let Some(mut job) = inner.load_job(job_id.as_str()) else {
                return ScriptReply::LeaseIntact;
            };
            if !job.status.is_active() {
                return ScriptReply::LeaseIntact;
            }
            let Some(lease) = job.lease.clone() else { return ScriptReply::LeaseIntact };
            if lease.worker_id != expected_worker {
                return ScriptReply::LeaseIntact;
            }
            // expires_at == now is not yet expired; reclaim needs
            // now > expires_at + grace.
            if now_ms <= lease.expires_at_ms + grace_ms {
                return ScriptReply::LeaseIntact;
            }
            let will_retry = job.attempt < job.max_attempts;
            let mut failure = JobFailure::lease_expired(&expected_worker);
            failure.retryable = will_retry;
            requeue_or_fail(inner, &mut job, &failure, will_retry, now_ms, &score_params);
            let record = job_record(
                event_id,
                now_ms,
                &job,
                Event::JobFailed {
                    job_id: job.id,
                    worker_id: Some(expected_worker),
                    error: failure,
                    will_retry,
                    attempt: job.attempt,
                    workflow: job.workflow.clone(),
                    webhook: job.webhook,
                },
            );
            inner.publish_record(&record, now_ms);
            ScriptReply::Reclaimed { will_retry, record }
        }

        ScriptCall::WorkflowStep {
            workflow_id,
            detail,
            now_ms,
            step_event_id,
            terminal_event_id,
            cause,
        } => {
            let Some(mut workflow) = inner.load_workflow(workflow_id.as_str()) else {
                return ScriptReply::NotFound;
            };
            let index = detail.step_index as usize;
            if index >= workflow.step_details.len() {
                return conflict(format!("step index {} out of range", detail.step_index));
            }
            // CAS on the slot: transitions to terminal fill once,
            // redeliveries are no-ops.
            if workflow.step_details[index].is_some() {
                return ScriptReply::StepRecorded {
                    first_fill: false,
                    records: Vec::new(),
                    cancel_steps: Vec::new(),
                    terminal: None,
                };
            }
            match detail.status {
                StepTerminal::Completed => workflow.completed_count += 1,
                StepTerminal::Failed => workflow.failed_count += 1,
                StepTerminal::Cancelled => {}
            }
            workflow.step_details[index] = Some(detail.clone());
            let mut cancel_steps = Vec::new();
            if workflow.status == WorkflowStatus::Pending {
                workflow.status = WorkflowStatus::Running;
            }
            if workflow.mode == yard_core::WorkflowMode::AbortOnFailure
                && detail.status == StepTerminal::Failed
                && !workflow.status.is_terminal()
            {
                workflow.status = WorkflowStatus::Failed;
                for (i, slot) in workflow.step_details.iter().enumerate() {
                    if slot.is_none() {
                        cancel_steps.push(workflow.step_jobs[i]);
                    }
                }
            }
            let mut records = Vec::new();
            let mut step_record = EventRecord::new(
                step_event_id,
                now_ms,
                Event::WorkflowStepCompleted {
                    workflow_id: workflow.id,
                    step_index: detail.step_index,
                    job_id: detail.job_id,
                    status: detail.status,
                },
            );
            step_record.causation_id = cause.clone();
            let mut terminal = None;
            if workflow.filled_count() == workflow.total_steps && !workflow.terminal_emitted {
                if !workflow.status.is_terminal() {
                    workflow.status = workflow.settled_status();
                }
                workflow.terminal_emitted = true;
                // Every slot is filled, the canonical payload exists.
                if let Some(payload) = terminal_payload(&workflow) {
                    let event = match workflow.status {
                        WorkflowStatus::Failed => Event::WorkflowFailed(payload),
                        _ => Event::WorkflowCompleted(payload),
                    };
                    let mut terminal_record = EventRecord::new(terminal_event_id, now_ms, event);
                    terminal_record.causation_id = cause;
                    records.push(terminal_record);
                    terminal = Some(workflow.status);
                }
            }
            inner.save_workflow(&workflow);
            inner.publish_record(&step_record, now_ms);
            let mut out = vec![step_record];
            for record in records {
                inner.publish_record(&record, now_ms);
                out.push(record);
            }
            ScriptReply::StepRecorded { first_fill: true, records: out, cancel_steps, terminal }
        }

        ScriptCall::AgePending { now_ms, scan_cap, score_params } => {
            let tail = inner.zrange_asc(keys::PENDING, scan_cap as usize);
            let mut rescored = 0;
            for (job_id, old_score) in tail {
                let Some(job) = inner.load_job(&job_id) else { continue };
                let score = pending_score(
                    job.priority,
                    job.submitted_at_ms,
                    job.attempt,
                    now_ms,
                    &score_params,
                );
                if score != old_score {
                    inner.zadd(keys::PENDING, &job_id, score);
                    rescored += 1;
                }
            }
            ScriptReply::Aged { rescored }
        }

        ScriptCall::PublishEvent { record } => {
            let stream_id = inner.publish_record(&record, record.emitted_at);
            ScriptReply::Published { stream_id }
        }
    }
}

fn conflict(reason: String) -> ScriptReply {
    ScriptReply::Conflict { reason }
}

/// Shared requeue-or-fail step for worker failures and lease reclaim.
fn requeue_or_fail(
    inner: &mut Inner,
    job: &mut Job,
    failure: &JobFailure,
    will_retry: bool,
    now_ms: u64,
    params: &yard_core::ScoreParams,
) {
    inner.srem(keys::ACTIVE, job.id.as_str());
    job.lease = None;
    if will_retry {
        job.status = JobStatus::Pending;
        job.failure = None;
        job.progress = 0.0;
        let score =
            pending_score(job.priority, job.submitted_at_ms, job.attempt, now_ms, params);
        inner.zadd(keys::PENDING, job.id.as_str(), score);
        inner.save_job(job);
    } else {
        job.status = JobStatus::Failed;
        job.failure = Some(failure.clone());
        inner.sadd(keys::TERMINAL, job.id.as_str());
        inner.save_job(job);
        inner.set_job_meta(job.id.as_str(), "terminal_at_ms", now_ms.to_string());
    }
}

/// Wrap a job-lifecycle event in its envelope, threading the job's
/// correlation id.
fn job_record(id: EventId, now_ms: u64, job: &Job, event: Event) -> EventRecord {
    let mut record = EventRecord::new(id, now_ms, event);
    record.correlation_id = job.correlation_id.clone();
    record
}

/// Canonical terminal payload; `None` only if a slot is somehow unfilled,
/// which the caller has already ruled out.
fn terminal_payload(workflow: &Workflow) -> Option<WorkflowTerminal> {
    WorkflowTerminal::from_workflow(workflow)
}

/// The capability predicate, identical to the Lua version.
fn matches(job: &Job, descriptor: &yard_core::CapabilityDescriptor) -> bool {
    if job.status != JobStatus::Pending {
        return false;
    }
    if !descriptor.service_types.contains(&job.service_type) {
        return false;
    }
    let req = &job.requirements;
    if !req.capability_tags.iter().all(|t| descriptor.capability_tags.contains(t)) {
        return false;
    }
    // Required model files are declared as capability tags by workers.
    if !req.models.iter().all(|m| descriptor.capability_tags.contains(m)) {
        return false;
    }
    if let Some(min) = req.min_gpu_memory_mb {
        if descriptor.gpu_memory_mb < min {
            return false;
        }
    }
    if let Some(affinity) = &req.affinity {
        if descriptor.affinity.as_ref() != Some(affinity) {
            return false;
        }
    }
    if let Some(region) = &req.region {
        if descriptor.region.as_ref() != Some(region) {
            return false;
        }
    }
    true
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
