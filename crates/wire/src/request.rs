// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use yard_core::{
    CapabilityDescriptor, JobFailure, JobId, JobSpec, WebhookId, WorkerId, WorkflowId,
    WorkflowMode,
};

use super::Query;

/// Request from a client or worker to the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Health check ping
    Ping,

    /// Version handshake
    Hello {
        version: String,
        /// Auth token for TCP connections (ignored for Unix socket)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    // -- ingress --
    /// Submit a single job
    SubmitJob { spec: JobSpec },

    /// Fetch a job view
    GetJob { id: JobId },

    /// Cancel a job from any non-terminal state
    CancelJob { id: JobId },

    /// Submit a workflow and all its step jobs atomically
    SubmitWorkflow {
        name: String,
        steps: Vec<JobSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<WorkflowMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        webhook: Option<WebhookId>,
    },

    /// Fetch a workflow view with canonical step details
    GetWorkflow { id: WorkflowId },

    /// Cancel a workflow and its non-terminal steps
    CancelWorkflow { id: WorkflowId },

    /// Register a webhook endpoint
    RegisterWebhook {
        url: String,
        event_types: Vec<String>,
        secret: String,
    },

    /// List all registered webhooks (active and inactive)
    ListWebhooks,

    /// Fetch one webhook regardless of its active flag
    GetWebhook { id: WebhookId },

    /// Delete a webhook registration
    DeleteWebhook { id: WebhookId },

    /// Flip a webhook's active flag
    UpdateWebhook { id: WebhookId, active: bool },

    // -- worker protocol --
    /// Register or refresh a worker session
    Register { descriptor: CapabilityDescriptor },

    /// Heartbeat; the reply piggy-backs cancellation requests
    Heartbeat {
        worker_id: WorkerId,
        /// Worker asserts it is actively executing its leases
        #[serde(default)]
        active_work: bool,
        /// Cancellations the worker has observed and aborted
        #[serde(default)]
        cancel_ack: Vec<JobId>,
    },

    /// Poll the match kernel for work
    RequestWork { worker_id: WorkerId },

    /// Worker observed the assignment and began execution
    MarkStarted { job_id: JobId, worker_id: WorkerId },

    /// Per-job progress report, monotone non-decreasing
    ReportProgress {
        job_id: JobId,
        worker_id: WorkerId,
        fraction: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Terminal success with an opaque result
    Complete {
        job_id: JobId,
        worker_id: WorkerId,
        result: serde_json::Value,
    },

    /// Terminal or retryable failure
    Fail {
        job_id: JobId,
        worker_id: WorkerId,
        error: JobFailure,
    },

    /// Voluntary relinquishment of the worker slot
    Release {
        worker_id: WorkerId,
        /// Drain (permit in-flight jobs to finish) rather than die
        #[serde(default)]
        drain: bool,
    },

    // -- egress --
    /// Open a durable subscription on this connection; the broker streams
    /// `Response::Event` frames until the connection closes
    Subscribe {
        /// Logical consumer name (cursor owner), e.g. "webhook-delivery"
        consumer: String,
        event_types: Vec<String>,
        /// Replay history from this stream id before going live
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replay_from: Option<String>,
    },

    /// Acknowledge a delivered event on a durable subscription
    Ack {
        consumer: String,
        event_type: String,
        stream_id: String,
    },

    /// Read-only projections
    Query { query: Query },

    /// Request broker shutdown
    Shutdown,
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
