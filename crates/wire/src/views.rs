// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-model DTOs exchanged over the protocol.
//!
//! Views project store records for clients; they are built from the Store
//! (never from event streams) so a client reads its own writes.

use serde::{Deserialize, Serialize};
use yard_core::{
    Job, JobFailure, JobId, JobStatus, Lease, Requirements, StepDetail, Webhook, WebhookId,
    Workflow, WorkflowId, WorkflowMode, WorkflowRef, WorkflowStatus, WorkerId, WorkerRecord,
    WorkerState,
};

/// Full projection of a single job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub service_type: String,
    pub status: JobStatus,
    pub priority: i32,
    pub attempt: u32,
    pub max_attempts: u32,
    pub submitted_at_ms: u64,
    pub progress: f64,
    pub requirements: Requirements,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            service_type: job.service_type.clone(),
            status: job.status,
            priority: job.priority,
            attempt: job.attempt,
            max_attempts: job.max_attempts,
            submitted_at_ms: job.submitted_at_ms,
            progress: job.progress,
            requirements: job.requirements.clone(),
            lease: job.lease.clone(),
            workflow: job.workflow.clone(),
            result: job.result.clone(),
            error: job.failure.clone(),
            correlation_id: job.correlation_id.clone(),
        }
    }
}

/// One line in a job listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub service_type: String,
    pub status: JobStatus,
    pub priority: i32,
    pub attempt: u32,
    pub submitted_at_ms: u64,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            service_type: job.service_type.clone(),
            status: job.status,
            priority: job.priority,
            attempt: job.attempt,
            submitted_at_ms: job.submitted_at_ms,
        }
    }
}

/// Full projection of a workflow, with the canonical step details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowView {
    pub id: WorkflowId,
    pub name: String,
    pub mode: WorkflowMode,
    pub status: WorkflowStatus,
    pub total_steps: u32,
    pub completed_count: u32,
    pub failed_count: u32,
    pub created_at_ms: u64,
    pub step_jobs: Vec<JobId>,
    /// One slot per step; unfilled slots are `null`.
    pub step_details: Vec<Option<StepDetail>>,
}

impl From<&Workflow> for WorkflowView {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id,
            name: workflow.name.clone(),
            mode: workflow.mode,
            status: workflow.status,
            total_steps: workflow.total_steps,
            completed_count: workflow.completed_count,
            failed_count: workflow.failed_count,
            created_at_ms: workflow.created_at_ms,
            step_jobs: workflow.step_jobs.clone(),
            step_details: workflow.step_details.clone(),
        }
    }
}

/// A registered webhook endpoint, secret omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookView {
    pub id: WebhookId,
    pub url: String,
    pub event_types: Vec<String>,
    pub active: bool,
    pub created_at_ms: u64,
}

impl From<&Webhook> for WebhookView {
    fn from(hook: &Webhook) -> Self {
        Self {
            id: hook.id,
            url: hook.url.clone(),
            event_types: hook.event_types.iter().cloned().collect(),
            active: hook.active,
            created_at_ms: hook.created_at_ms,
        }
    }
}

/// One line in a worker listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerView {
    pub id: WorkerId,
    pub machine_id: String,
    pub state: WorkerState,
    pub service_types: Vec<String>,
    pub gpu_memory_mb: u32,
    pub active_jobs: u32,
    pub last_heartbeat_at_ms: u64,
    pub recent_failure_count: u32,
}

impl From<&WorkerRecord> for WorkerView {
    fn from(record: &WorkerRecord) -> Self {
        Self {
            id: record.descriptor.worker_id.clone(),
            machine_id: record.descriptor.machine_id.clone(),
            state: record.state,
            service_types: record.descriptor.service_types.iter().cloned().collect(),
            gpu_memory_mb: record.descriptor.gpu_memory_mb,
            active_jobs: record.active_jobs.len() as u32,
            last_heartbeat_at_ms: record.last_heartbeat_at_ms,
            recent_failure_count: record.recent_failures.len() as u32,
        }
    }
}

/// The job descriptor handed to a worker on a successful poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkAssignment {
    pub job_id: JobId,
    pub service_type: String,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub max_attempts: u32,
    pub lease_expires_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowRef>,
}

impl WorkAssignment {
    /// Build from a freshly-claimed job. Returns `None` when the claim
    /// reply is malformed (no lease), which the match kernel rules out.
    pub fn from_claimed(job: &Job) -> Option<Self> {
        let lease = job.lease.as_ref()?;
        Some(Self {
            job_id: job.id,
            service_type: job.service_type.clone(),
            payload: job.payload.clone(),
            attempt: job.attempt,
            max_attempts: job.max_attempts,
            lease_expires_at_ms: lease.expires_at_ms,
            workflow: job.workflow.clone(),
        })
    }
}

/// Broker health snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerStatus {
    pub uptime_secs: u64,
    pub pending_jobs: u64,
    pub active_jobs: u64,
    pub terminal_jobs: u64,
    pub workers: u64,
    pub store_healthy: bool,
}

#[cfg(test)]
#[path = "views_tests.rs"]
mod tests;
