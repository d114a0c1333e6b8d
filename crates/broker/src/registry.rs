// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job registry: the authoritative job state machine.
//!
//! Every mutation is one store script that verifies expected status and
//! lease owner before touching anything; a mismatch comes back as a
//! typed conflict and changes nothing. Records the scripts append are
//! re-delivered to in-process subscribers here.

use crate::bus::EventBus;
use crate::error::{BrokerError, Result};
use std::sync::Arc;
use yard_core::{
    result_hash, submit_score, BrokerConfig, Clock, Event, EventRecord, Job, JobFailure, JobId,
    JobSpec, Workflow, WorkflowId, WorkflowMode, WorkflowRef, WebhookId, WorkerId,
};
use yard_store::{keys, IdempotencyCheck, ScriptCall, ScriptReply, Store};

/// Outcome of a submission: the job id plus whether the idempotency
/// window short-circuited it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub job_id: JobId,
    pub deduplicated: bool,
}

pub struct Registry<S, C: Clock> {
    store: Arc<S>,
    clock: C,
    cfg: Arc<BrokerConfig>,
    bus: Arc<EventBus<S, C>>,
}

impl<S: Store, C: Clock> Registry<S, C> {
    pub fn new(store: Arc<S>, clock: C, cfg: Arc<BrokerConfig>, bus: Arc<EventBus<S, C>>) -> Self {
        Self { store, clock, cfg, bus }
    }

    /// Submit a single job. The idempotency key is the caller's
    /// correlation id, or the spec fingerprint when absent.
    pub async fn submit(&self, spec: JobSpec) -> Result<Submitted> {
        let now_ms = self.clock.epoch_ms();
        let fingerprint = spec.fingerprint();
        let idem_key = spec.correlation_id.clone().unwrap_or_else(|| fingerprint.clone());
        let job = Job::from_spec(JobId::new(), spec, None, now_ms);

        let record = self.submit_record(&job, now_ms);
        let reply = self
            .store
            .script_call(ScriptCall::SubmitJob {
                job: job.clone(),
                score: submit_score(job.priority, now_ms),
                idempotency: Some(IdempotencyCheck {
                    key: idem_key,
                    fingerprint,
                    ttl_sec: self.cfg.idempotency_ttl_sec,
                }),
                record,
            })
            .await?;

        match reply {
            ScriptReply::Submitted { record } => {
                self.bus.deliver_local(&record);
                Ok(Submitted { job_id: job.id, deduplicated: false })
            }
            ScriptReply::Duplicate { job_id } => Ok(Submitted { job_id, deduplicated: true }),
            ScriptReply::IdempotencyConflict { job_id } => Err(BrokerError::conflict(format!(
                "correlation id already used by {job_id} with a different spec"
            ))),
            other => Err(unexpected("submit_job", other)),
        }
    }

    /// Atomically create a workflow and all its step jobs.
    pub async fn submit_workflow(
        &self,
        name: String,
        steps: Vec<JobSpec>,
        mode: WorkflowMode,
        webhook: Option<WebhookId>,
    ) -> Result<(WorkflowId, Vec<JobId>)> {
        let now_ms = self.clock.epoch_ms();
        let workflow_id = WorkflowId::new();
        let mut jobs = Vec::with_capacity(steps.len());
        for (index, spec) in steps.into_iter().enumerate() {
            let job = Job::from_spec(
                JobId::new(),
                spec,
                Some(WorkflowRef { workflow_id, step_index: index as u32 }),
                now_ms,
            );
            jobs.push(job);
        }
        let job_ids: Vec<JobId> = jobs.iter().map(|j| j.id).collect();
        let workflow =
            Workflow::new(workflow_id, name.clone(), mode, job_ids.clone(), webhook, now_ms);

        let mut records = Vec::with_capacity(jobs.len() + 1);
        records.push(
            EventRecord::new(
                self.bus.next_event_id(),
                now_ms,
                Event::WorkflowSubmitted {
                    workflow_id,
                    name,
                    total_steps: workflow.total_steps,
                    job_ids: job_ids.clone(),
                },
            ),
        );
        for job in &jobs {
            records.push(self.submit_record(job, now_ms));
        }

        let scored: Vec<(Job, f64)> = jobs
            .into_iter()
            .map(|job| {
                let score = submit_score(job.priority, now_ms);
                (job, score)
            })
            .collect();
        let reply = self
            .store
            .script_call(ScriptCall::SubmitWorkflow { workflow, jobs: scored, records })
            .await?;

        match reply {
            ScriptReply::WorkflowSubmitted { records } => {
                self.bus.deliver_all(&records);
                Ok((workflow_id, job_ids))
            }
            other => Err(unexpected("submit_workflow", other)),
        }
    }

    /// `assigned → running`, by the lease owner.
    pub async fn mark_started(&self, job_id: JobId, worker_id: WorkerId) -> Result<()> {
        let reply = self
            .store
            .script_call(ScriptCall::MarkStarted {
                job_id,
                worker_id,
                now_ms: self.clock.epoch_ms(),
            })
            .await?;
        match reply {
            ScriptReply::Started => Ok(()),
            ScriptReply::NotFound => Err(BrokerError::not_found(job_id.to_string())),
            ScriptReply::Conflict { reason } => Err(BrokerError::conflict(reason)),
            other => Err(unexpected("mark_started", other)),
        }
    }

    /// Monotone progress update; stale fractions are silently dropped.
    pub async fn report_progress(
        &self,
        job_id: JobId,
        worker_id: WorkerId,
        fraction: f64,
        message: Option<String>,
    ) -> Result<()> {
        if !(0.0..=1.0).contains(&fraction) || fraction.is_nan() {
            return Err(BrokerError::validation("fraction must be within [0, 1]"));
        }
        let reply = self
            .store
            .script_call(ScriptCall::ReportProgress {
                job_id,
                worker_id,
                fraction,
                message,
                now_ms: self.clock.epoch_ms(),
                lease_ms: self.cfg.lease_duration_ms(),
                event_id: self.bus.next_event_id(),
            })
            .await?;
        match reply {
            ScriptReply::Progress { record } => {
                if let Some(record) = record {
                    self.bus.deliver_local(&record);
                }
                Ok(())
            }
            ScriptReply::NotFound => Err(BrokerError::not_found(job_id.to_string())),
            ScriptReply::Conflict { reason } => Err(BrokerError::conflict(reason)),
            other => Err(unexpected("report_progress", other)),
        }
    }

    /// Terminal completion; repeating the call with the same worker and
    /// result is success without a second event.
    pub async fn complete(
        &self,
        job_id: JobId,
        worker_id: WorkerId,
        result: serde_json::Value,
    ) -> Result<()> {
        let hash = result_hash(&result);
        let reply = self
            .store
            .script_call(ScriptCall::CompleteJob {
                job_id,
                worker_id,
                result,
                result_hash: hash,
                now_ms: self.clock.epoch_ms(),
                event_id: self.bus.next_event_id(),
            })
            .await?;
        match reply {
            ScriptReply::Completed { record } => {
                if let Some(record) = record {
                    self.bus.deliver_local(&record);
                }
                Ok(())
            }
            ScriptReply::NotFound => Err(BrokerError::not_found(job_id.to_string())),
            ScriptReply::Conflict { reason } => Err(BrokerError::conflict(reason)),
            other => Err(unexpected("complete_job", other)),
        }
    }

    /// Worker-reported failure. Returns whether the job was requeued.
    pub async fn fail(
        &self,
        job_id: JobId,
        worker_id: WorkerId,
        failure: JobFailure,
    ) -> Result<bool> {
        let reply = self
            .store
            .script_call(ScriptCall::FailJob {
                job_id,
                worker_id,
                failure,
                now_ms: self.clock.epoch_ms(),
                score_params: self.cfg.score_params(),
                event_id: self.bus.next_event_id(),
            })
            .await?;
        match reply {
            ScriptReply::Failed { will_retry, record } => {
                self.bus.deliver_local(&record);
                Ok(will_retry)
            }
            ScriptReply::NotFound => Err(BrokerError::not_found(job_id.to_string())),
            ScriptReply::Conflict { reason } => Err(BrokerError::conflict(reason)),
            other => Err(unexpected("fail_job", other)),
        }
    }

    /// Cancel from any non-terminal state. Returns the worker that held
    /// the lease, if any, so the session layer can record the intent.
    pub async fn cancel(
        &self,
        job_id: JobId,
        cause: Option<String>,
    ) -> Result<Option<WorkerId>> {
        let reply = self
            .store
            .script_call(ScriptCall::CancelJob {
                job_id,
                now_ms: self.clock.epoch_ms(),
                event_id: self.bus.next_event_id(),
                cause,
            })
            .await?;
        match reply {
            ScriptReply::Cancelled { record, was_leased_to } => {
                self.bus.deliver_local(&record);
                Ok(was_leased_to)
            }
            ScriptReply::NotFound => Err(BrokerError::not_found(job_id.to_string())),
            ScriptReply::Conflict { reason } => Err(BrokerError::conflict(reason)),
            other => Err(unexpected("cancel_job", other)),
        }
    }

    /// Read a job straight from the store (read-your-writes).
    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        let Some(map) = self.store.hash_get(&keys::job(job_id.as_str())).await? else {
            return Ok(None);
        };
        Job::from_fields(&map)
            .map(Some)
            .map_err(|e| BrokerError::Internal(format!("corrupt job {job_id}: {e}")))
    }

    pub async fn get_workflow(&self, workflow_id: &WorkflowId) -> Result<Option<Workflow>> {
        let Some(map) = self.store.hash_get(&keys::workflow(workflow_id.as_str())).await? else {
            return Ok(None);
        };
        Workflow::from_fields(&map)
            .map(Some)
            .map_err(|e| BrokerError::Internal(format!("corrupt workflow {workflow_id}: {e}")))
    }

    fn submit_record(&self, job: &Job, now_ms: u64) -> EventRecord {
        let mut record = EventRecord::new(
            self.bus.next_event_id(),
            now_ms,
            Event::JobSubmitted {
                job_id: job.id,
                service_type: job.service_type.clone(),
                priority: job.priority,
                workflow: job.workflow.clone(),
                webhook: job.webhook,
            },
        );
        record.correlation_id = job.correlation_id.clone();
        record
    }
}

fn unexpected(script: &str, reply: ScriptReply) -> BrokerError {
    BrokerError::Internal(format!("unexpected {script} reply: {reply:?}"))
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
