// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker sessions: registration, heartbeats, work polls, release.
//!
//! Worker records live in the store (`worker:{id}`); each record has a
//! single writer in steady state (that worker's connection), with the
//! janitor stepping in only for dead-worker transitions.

use crate::bus::EventBus;
use crate::error::{BrokerError, Result};
use std::sync::Arc;
use yard_core::{
    BrokerConfig, CapabilityDescriptor, Clock, Event, FailureAttestation, Job, JobId, WorkerId,
    WorkerRecord, WorkerState,
};
use yard_store::{keys, ScriptCall, ScriptReply, Store};

pub struct SessionManager<S, C: Clock> {
    store: Arc<S>,
    clock: C,
    cfg: Arc<BrokerConfig>,
    bus: Arc<EventBus<S, C>>,
}

impl<S: Store, C: Clock> SessionManager<S, C> {
    pub fn new(store: Arc<S>, clock: C, cfg: Arc<BrokerConfig>, bus: Arc<EventBus<S, C>>) -> Self {
        Self { store, clock, cfg, bus }
    }

    /// Upsert a worker session. Re-registration refreshes the descriptor
    /// and revives a draining/dead worker; the failure ring survives.
    pub async fn register(&self, mut descriptor: CapabilityDescriptor) -> Result<()> {
        if descriptor.service_types.is_empty() {
            return Err(BrokerError::validation("worker must declare at least one service type"));
        }
        if descriptor.max_concurrent_jobs == 0 {
            descriptor.max_concurrent_jobs = self.cfg.max_concurrent_jobs_per_worker_default;
        }
        let now_ms = self.clock.epoch_ms();
        let record = match self.load(&descriptor.worker_id).await? {
            Some(mut existing) => {
                existing.descriptor = descriptor.clone();
                existing.last_heartbeat_at_ms = now_ms;
                existing.state = if existing.active_jobs.is_empty() {
                    WorkerState::Idle
                } else {
                    WorkerState::Busy
                };
                existing
            }
            None => WorkerRecord::new(descriptor.clone(), now_ms),
        };
        self.save(&record).await?;
        self.store.set_add(keys::WORKERS, descriptor.worker_id.as_str()).await?;
        self.bus
            .publish(Event::WorkerRegistered {
                worker_id: descriptor.worker_id.clone(),
                machine_id: descriptor.machine_id.clone(),
                service_types: descriptor.service_types.iter().cloned().collect(),
            })
            .await?;
        Ok(())
    }

    /// Heartbeat: refreshes liveness, renews leases when the worker
    /// asserts active work, clears acknowledged cancellations, and
    /// returns the outstanding cancellation requests.
    pub async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        active_work: bool,
        cancel_ack: Vec<JobId>,
    ) -> Result<Vec<JobId>> {
        let mut record = self.require_live(worker_id).await?;
        let now_ms = self.clock.epoch_ms();
        record.last_heartbeat_at_ms = now_ms;
        for job_id in &cancel_ack {
            record.cancel_pending.remove(job_id);
            record.active_jobs.remove(job_id);
        }
        record.refresh_load_state();

        if active_work {
            for job_id in record.active_jobs.clone() {
                let reply = self
                    .store
                    .script_call(ScriptCall::RenewLease {
                        job_id,
                        worker_id: worker_id.clone(),
                        now_ms,
                        lease_ms: self.cfg.lease_duration_ms(),
                    })
                    .await?;
                match reply {
                    ScriptReply::Renewed => {}
                    // The job finished or was reclaimed elsewhere; drop it
                    // from the session's view.
                    ScriptReply::NotFound | ScriptReply::Conflict { .. } => {
                        record.active_jobs.remove(&job_id);
                        record.refresh_load_state();
                    }
                    other => {
                        return Err(BrokerError::Internal(format!(
                            "unexpected renew_lease reply: {other:?}"
                        )))
                    }
                }
            }
        }

        let cancel_requested: Vec<JobId> = record.cancel_pending.iter().copied().collect();
        self.save(&record).await?;
        self.bus
            .publish(Event::WorkerHeartbeat { worker_id: worker_id.clone(), at_ms: now_ms })
            .await?;
        Ok(cancel_requested)
    }

    /// Poll the match kernel. Returns the claimed job, or `None` when the
    /// worker is at capacity, draining, or nothing matched.
    pub async fn request_work(&self, worker_id: &WorkerId) -> Result<Option<Job>> {
        let mut record = self.require_live(worker_id).await?;
        if !record.state.accepts_work() {
            return Ok(None);
        }
        if record.active_jobs.len() as u32 >= record.descriptor.max_concurrent_jobs {
            return Ok(None);
        }
        let now_ms = self.clock.epoch_ms();
        let reply = self
            .store
            .script_call(ScriptCall::MatchClaim {
                descriptor: record.descriptor.clone(),
                now_ms,
                lease_ms: self.cfg.lease_duration_ms(),
                scan_cap: self.cfg.match_scan_cap,
                event_id: self.bus.next_event_id(),
            })
            .await?;
        match reply {
            ScriptReply::Claimed { job, record: event } => {
                self.bus.deliver_local(&event);
                record.active_jobs.insert(job.id);
                record.last_heartbeat_at_ms = now_ms;
                record.refresh_load_state();
                self.save(&record).await?;
                Ok(Some(*job))
            }
            ScriptReply::NoMatch => Ok(None),
            other => {
                Err(BrokerError::Internal(format!("unexpected match_claim reply: {other:?}")))
            }
        }
    }

    /// Voluntary relinquishment: draining keeps in-flight jobs alive,
    /// otherwise the session is marked dead (the janitor reclaims leases).
    pub async fn release(&self, worker_id: &WorkerId, drain: bool) -> Result<()> {
        let mut record = self.require_registered(worker_id).await?;
        record.state = if drain { WorkerState::Draining } else { WorkerState::Dead };
        self.save(&record).await?;
        Ok(())
    }

    /// Record a cancellation intent; the worker sees it on its next
    /// heartbeat reply.
    pub async fn cancel_intent(&self, worker_id: &WorkerId, job_id: JobId) -> Result<()> {
        if let Some(mut record) = self.load(worker_id).await? {
            record.cancel_pending.insert(job_id);
            self.save(&record).await?;
        }
        Ok(())
    }

    /// Append to the worker's bounded failure ring.
    pub async fn attest_failure(
        &self,
        worker_id: &WorkerId,
        attestation: FailureAttestation,
    ) -> Result<()> {
        if let Some(mut record) = self.load(worker_id).await? {
            record.active_jobs.remove(&attestation.job_id);
            record.attest_failure(attestation);
            record.refresh_load_state();
            self.save(&record).await?;
        }
        Ok(())
    }

    /// Drop a completed/cancelled job from the session's lease view.
    pub async fn job_detached(&self, worker_id: &WorkerId, job_id: &JobId) -> Result<()> {
        if let Some(mut record) = self.load(worker_id).await? {
            record.active_jobs.remove(job_id);
            record.cancel_pending.remove(job_id);
            record.refresh_load_state();
            self.save(&record).await?;
        }
        Ok(())
    }

    pub async fn load(&self, worker_id: &WorkerId) -> Result<Option<WorkerRecord>> {
        let Some(map) = self.store.hash_get(&keys::worker(worker_id.as_str())).await? else {
            return Ok(None);
        };
        WorkerRecord::from_fields(&map)
            .map(Some)
            .map_err(|e| BrokerError::Internal(format!("corrupt worker {worker_id}: {e}")))
    }

    pub async fn list(&self) -> Result<Vec<WorkerRecord>> {
        let ids = self.store.set_members(keys::WORKERS).await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.load(&WorkerId::new(id)).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn save(&self, record: &WorkerRecord) -> Result<()> {
        self.store
            .hash_put(&keys::worker(record.worker_id().as_str()), &record.to_fields())
            .await?;
        Ok(())
    }

    async fn require_registered(&self, worker_id: &WorkerId) -> Result<WorkerRecord> {
        self.load(worker_id).await?.ok_or_else(|| {
            BrokerError::worker_protocol(format!("worker {worker_id} is not registered"))
        })
    }

    /// Worker messages are rejected when the session is unregistered or
    /// dead.
    async fn require_live(&self, worker_id: &WorkerId) -> Result<WorkerRecord> {
        let record = self.require_registered(worker_id).await?;
        if record.state == WorkerState::Dead {
            return Err(BrokerError::worker_protocol(format!("worker {worker_id} is dead")));
        }
        Ok(record)
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
