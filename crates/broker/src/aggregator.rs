// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow aggregator.
//!
//! A single spawned task owns workflow aggregation: it consumes terminal
//! job events from an in-process bus channel and applies each to the
//! workflow via the `workflow_step` script. The script CAS-fills the
//! step slot, so at-least-once event delivery folds to exactly-once
//! aggregation. This task is the sole producer of canonical
//! `step_details`; nothing else in the system synthesizes them.

use crate::bus::EventBus;
use crate::error::Result;
use crate::registry::Registry;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use yard_core::{Clock, Event, EventRecord, JobFailure, JobId, StepDetail, StepTerminal, WorkflowRef};
use yard_store::{ScriptCall, ScriptReply, Store};

/// Event types the aggregator subscribes to.
pub const AGGREGATED_TYPES: &[&str] = &["job.completed", "job.failed", "job.cancelled"];

pub struct Aggregator<S, C: Clock> {
    store: Arc<S>,
    clock: C,
    bus: Arc<EventBus<S, C>>,
    registry: Arc<Registry<S, C>>,
}

/// What a terminal job event means for its workflow slot.
struct StepUpdate {
    workflow: WorkflowRef,
    job_id: JobId,
    status: StepTerminal,
    result: Option<serde_json::Value>,
    error: Option<JobFailure>,
}

impl<S: Store, C: Clock> Aggregator<S, C> {
    pub fn new(
        store: Arc<S>,
        clock: C,
        bus: Arc<EventBus<S, C>>,
        registry: Arc<Registry<S, C>>,
    ) -> Self {
        Self { store, clock, bus, registry }
    }

    /// Spawn the owning task. It drains the channel until cancellation.
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let mut rx = self.bus.subscribe_local(AGGREGATED_TYPES);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(record) => {
                            if let Err(e) = self.apply(&record).await {
                                tracing::error!(
                                    event = record.type_name(),
                                    error = %e,
                                    "workflow aggregation failed"
                                );
                            }
                        }
                        None => break,
                    },
                }
            }
        })
    }

    /// Apply one terminal job event to its workflow, if it has one.
    pub async fn apply(&self, record: &EventRecord) -> Result<()> {
        let Some(update) = step_update(&record.event) else { return Ok(()) };
        let detail = StepDetail {
            step_index: update.workflow.step_index,
            job_id: update.job_id,
            status: update.status,
            result: update.result,
            error: update.error,
            completed_at_ms: record.emitted_at,
        };
        let reply = self
            .store
            .script_call(ScriptCall::WorkflowStep {
                workflow_id: update.workflow.workflow_id,
                detail,
                now_ms: self.clock.epoch_ms(),
                step_event_id: self.bus.next_event_id(),
                terminal_event_id: self.bus.next_event_id(),
                cause: Some(record.id.to_string()),
            })
            .await?;

        match reply {
            ScriptReply::StepRecorded { records, cancel_steps, terminal, .. } => {
                self.bus.deliver_all(&records);
                if let Some(status) = terminal {
                    tracing::info!(
                        workflow = %update.workflow.workflow_id,
                        status = %status,
                        "workflow settled"
                    );
                }
                // Abort-on-failure: cancel the unfilled siblings. Their
                // job.cancelled events come back through this channel and
                // fill the remaining slots.
                for job_id in cancel_steps {
                    match self.registry.cancel(job_id, Some(record.id.to_string())).await {
                        Ok(_) => {}
                        // Already terminal or already gone: its own event
                        // will fill (or has filled) the slot.
                        Err(crate::error::BrokerError::Conflict(_))
                        | Err(crate::error::BrokerError::NotFound(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(())
            }
            ScriptReply::NotFound => {
                tracing::warn!(
                    workflow = %update.workflow.workflow_id,
                    "terminal job event references unknown workflow"
                );
                Ok(())
            }
            ScriptReply::Conflict { reason } => {
                tracing::warn!(reason, "workflow step update rejected");
                Ok(())
            }
            other => Err(crate::error::BrokerError::Internal(format!(
                "unexpected workflow_step reply: {other:?}"
            ))),
        }
    }
}

/// Subscribe + apply glue for a caller that owns its own loop (tests).
pub fn subscription<S: Store, C: Clock>(
    bus: &EventBus<S, C>,
) -> mpsc::UnboundedReceiver<EventRecord> {
    bus.subscribe_local(AGGREGATED_TYPES)
}

fn step_update(event: &Event) -> Option<StepUpdate> {
    match event {
        Event::JobCompleted { workflow: Some(workflow), job_id, result, .. } => {
            Some(StepUpdate {
                workflow: workflow.clone(),
                job_id: *job_id,
                status: StepTerminal::Completed,
                result: Some(result.clone()),
                error: None,
            })
        }
        // A retryable failure is not terminal; the slot stays open for
        // the next attempt.
        Event::JobFailed { workflow: Some(workflow), job_id, error, will_retry: false, .. } => {
            Some(StepUpdate {
                workflow: workflow.clone(),
                job_id: *job_id,
                status: StepTerminal::Failed,
                result: None,
                error: Some(error.clone()),
            })
        }
        Event::JobCancelled { workflow: Some(workflow), job_id, .. } => Some(StepUpdate {
            workflow: workflow.clone(),
            job_id: *job_id,
            status: StepTerminal::Cancelled,
            result: None,
            error: None,
        }),
        _ => None,
    }
}

#[cfg(test)]
#[path = "aggregator_tests.rs"]
mod tests;
