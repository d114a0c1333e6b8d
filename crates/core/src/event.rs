// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker lifecycle events.
//!
//! Events serialize as `{"type": "job.submitted", "payload": {...}}`; the
//! [`EventRecord`] envelope flattens that next to `id`, `emitted_at`, and
//! the optional correlation/causation ids, which is the exact shape
//! subscribers receive.

use crate::job::{JobFailure, JobId};
use crate::worker::WorkerId;
use crate::workflow::{StepTerminal, WorkflowId, WorkflowRef, WorkflowTerminal};
use crate::WebhookId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

crate::define_id! {
    /// Monotone event identifier (fixed-width hex millis + sequence + tail),
    /// lexicographic order equals emission order within a broker process.
    pub struct EventId("evt-");
}

/// Generates strictly increasing [`EventId`]s for one broker process.
#[derive(Clone, Default)]
pub struct EventIdGen {
    state: Arc<Mutex<(u64, u32)>>,
}

impl EventIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id at the given wall-clock time. If the clock stalls or steps
    /// backwards, the sequence keeps ids increasing.
    pub fn next(&self, now_ms: u64) -> EventId {
        let mut state = self.state.lock();
        let (last_ms, seq) = *state;
        let (ms, seq) = if now_ms > last_ms { (now_ms, 0) } else { (last_ms, seq + 1) };
        *state = (ms, seq);
        // 12 hex digits of millis + 5 of sequence + 2 random tail = 19,
        // exactly filling the id body.
        EventId::from_string(format!("evt-{:012x}{:05x}{}", ms, seq & 0xf_ffff, nanoid::nanoid!(2)))
    }
}

/// Events published on the bus, one variant per enumerated type.
///
/// The set is closed: adding a type is an additive enum change and every
/// dispatcher match is checked by the compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    #[serde(rename = "job.submitted")]
    JobSubmitted {
        job_id: JobId,
        service_type: String,
        priority: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow: Option<WorkflowRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        webhook: Option<WebhookId>,
    },

    #[serde(rename = "job.assigned")]
    JobAssigned {
        job_id: JobId,
        worker_id: WorkerId,
        attempt: u32,
        lease_expires_at_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow: Option<WorkflowRef>,
    },

    #[serde(rename = "job.progress")]
    JobProgress {
        job_id: JobId,
        worker_id: WorkerId,
        fraction: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(rename = "job.completed")]
    JobCompleted {
        job_id: JobId,
        worker_id: WorkerId,
        result: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow: Option<WorkflowRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        webhook: Option<WebhookId>,
    },

    #[serde(rename = "job.failed")]
    JobFailed {
        job_id: JobId,
        /// Absent when the janitor synthesized the failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker_id: Option<WorkerId>,
        error: JobFailure,
        will_retry: bool,
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow: Option<WorkflowRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        webhook: Option<WebhookId>,
    },

    #[serde(rename = "job.cancelled")]
    JobCancelled {
        job_id: JobId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow: Option<WorkflowRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        webhook: Option<WebhookId>,
    },

    #[serde(rename = "workflow.submitted")]
    WorkflowSubmitted {
        workflow_id: WorkflowId,
        name: String,
        total_steps: u32,
        job_ids: Vec<JobId>,
    },

    #[serde(rename = "workflow.step_completed")]
    WorkflowStepCompleted {
        workflow_id: WorkflowId,
        step_index: u32,
        job_id: JobId,
        status: StepTerminal,
    },

    #[serde(rename = "workflow.completed")]
    WorkflowCompleted(WorkflowTerminal),

    #[serde(rename = "workflow.failed")]
    WorkflowFailed(WorkflowTerminal),

    #[serde(rename = "worker.registered")]
    WorkerRegistered {
        worker_id: WorkerId,
        machine_id: String,
        service_types: Vec<String>,
    },

    #[serde(rename = "worker.heartbeat")]
    WorkerHeartbeat { worker_id: WorkerId, at_ms: u64 },

    #[serde(rename = "worker.lost")]
    WorkerLost { worker_id: WorkerId, last_heartbeat_at_ms: u64 },
}

impl Event {
    /// The wire type name, also the per-type stream suffix.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::JobSubmitted { .. } => "job.submitted",
            Event::JobAssigned { .. } => "job.assigned",
            Event::JobProgress { .. } => "job.progress",
            Event::JobCompleted { .. } => "job.completed",
            Event::JobFailed { .. } => "job.failed",
            Event::JobCancelled { .. } => "job.cancelled",
            Event::WorkflowSubmitted { .. } => "workflow.submitted",
            Event::WorkflowStepCompleted { .. } => "workflow.step_completed",
            Event::WorkflowCompleted(_) => "workflow.completed",
            Event::WorkflowFailed(_) => "workflow.failed",
            Event::WorkerRegistered { .. } => "worker.registered",
            Event::WorkerHeartbeat { .. } => "worker.heartbeat",
            Event::WorkerLost { .. } => "worker.lost",
        }
    }

    /// All event type names, for wildcard subscriptions and retention sweeps.
    pub const ALL_TYPES: &'static [&'static str] = &[
        "job.submitted",
        "job.assigned",
        "job.progress",
        "job.completed",
        "job.failed",
        "job.cancelled",
        "workflow.submitted",
        "workflow.step_completed",
        "workflow.completed",
        "workflow.failed",
        "worker.registered",
        "worker.heartbeat",
        "worker.lost",
    ];

    /// The aggregate this event belongs to, for per-aggregate ordering.
    pub fn aggregate_id(&self) -> String {
        match self {
            Event::JobSubmitted { job_id, .. }
            | Event::JobAssigned { job_id, .. }
            | Event::JobProgress { job_id, .. }
            | Event::JobCompleted { job_id, .. }
            | Event::JobFailed { job_id, .. }
            | Event::JobCancelled { job_id, .. } => job_id.to_string(),
            Event::WorkflowSubmitted { workflow_id, .. }
            | Event::WorkflowStepCompleted { workflow_id, .. } => workflow_id.to_string(),
            Event::WorkflowCompleted(t) | Event::WorkflowFailed(t) => t.workflow_id.to_string(),
            Event::WorkerRegistered { worker_id, .. }
            | Event::WorkerHeartbeat { worker_id, .. }
            | Event::WorkerLost { worker_id, .. } => worker_id.to_string(),
        }
    }
}

/// The published envelope: what subscribers receive, bit-exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub emitted_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventRecord {
    pub fn new(id: EventId, emitted_at: u64, event: Event) -> Self {
        Self { id, emitted_at, correlation_id: None, causation_id: None, event }
    }

    crate::setters! {
        option {
            correlation_id: String,
            causation_id: String,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.event.type_name()
    }

    /// Serialize to the single-field stream entry body.
    pub fn to_stream_body(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_stream_body(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
