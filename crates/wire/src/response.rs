// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use yard_core::{EventRecord, JobId, WebhookId, WorkflowId};

use super::{
    BrokerStatus, ErrorKind, JobSummary, JobView, WebhookView, WorkAssignment, WorkerView,
    WorkflowView,
};

/// Response from the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    /// Generic success
    Ok,

    /// Health check response
    Pong,

    /// Version handshake response
    Hello { version: String },

    /// Broker is shutting down
    ShuttingDown,

    /// Job accepted (or deduplicated within the idempotency window)
    JobSubmitted { job_id: JobId, deduplicated: bool },

    /// Single job view
    Job { job: Option<Box<JobView>> },

    /// Job list
    Jobs { jobs: Vec<JobSummary> },

    /// Cancellation accepted
    Cancelled,

    /// Workflow accepted with its step job ids
    WorkflowSubmitted { workflow_id: WorkflowId, job_ids: Vec<JobId> },

    /// Single workflow view with canonical step details
    Workflow { workflow: Option<Box<WorkflowView>> },

    /// Workflow list
    Workflows { workflows: Vec<WorkflowView> },

    /// Webhook registered
    WebhookRegistered { webhook_id: WebhookId },

    /// Webhook list (full population, active and inactive)
    Webhooks { webhooks: Vec<WebhookView> },

    /// Single webhook
    Webhook { webhook: Option<Box<WebhookView>> },

    /// Worker registered or refreshed
    Registered,

    /// Heartbeat reply; cancellation requests ride along
    HeartbeatAck { cancel_requested: Vec<JobId> },

    /// Reply to a work poll: a claimed assignment or idle
    WorkAssignment { job: Option<Box<WorkAssignment>> },

    /// Worker list
    Workers { workers: Vec<WorkerView> },

    /// Broker health snapshot
    Status { status: BrokerStatus },

    /// One event frame on a durable subscription. `stream_id` is the
    /// cursor position to acknowledge.
    Event { stream_id: String, record: Box<EventRecord> },

    /// Error response
    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error { kind, message: message.into() }
    }
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
