// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named atomic scripts: the calls and their typed replies.
//!
//! Each variant is one server-side atomic step. Both backends implement
//! identical semantics; the closed sum keeps the two in lockstep: adding a
//! script without covering it in a backend is a compile error, not a
//! runtime surprise.
//!
//! Scripts that produce lifecycle events append the pre-built (or
//! script-built) [`EventRecord`] to the per-type stream and publish it on
//! the pub/sub channel *inside* the atomic step, which is the outbox
//! guarantee: a claim without its `job.assigned` record can never be
//! observed.

use serde::{Deserialize, Serialize};
use yard_core::{
    CapabilityDescriptor, EventId, EventRecord, Job, JobFailure, JobId, ScoreParams, StepDetail,
    Workflow, WorkflowId, WorkflowStatus, WorkerId,
};

/// Idempotency-window probe carried by a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyCheck {
    /// Store key (already prefixed by the caller-visible correlation id or
    /// the derived fingerprint).
    pub key: String,
    /// Spec fingerprint; a hit with a different fingerprint is a conflict.
    pub fingerprint: String,
    pub ttl_sec: u64,
}

/// One invocation of a named server-side atomic script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptCall {
    /// Write the job hash, insert into the pending index, and append the
    /// `job.submitted` record. Honors the idempotency window.
    SubmitJob {
        job: Job,
        score: f64,
        idempotency: Option<IdempotencyCheck>,
        record: EventRecord,
    },

    /// All-or-nothing workflow submission: workflow hash, every step job,
    /// every pending-index insert, and all records.
    SubmitWorkflow {
        workflow: Workflow,
        jobs: Vec<(Job, f64)>,
        records: Vec<EventRecord>,
    },

    /// The match kernel: bounded scan of the pending index in descending
    /// score order, capability predicate per candidate, claim on first
    /// match with the `job.assigned` record appended in the same step.
    MatchClaim {
        descriptor: CapabilityDescriptor,
        now_ms: u64,
        lease_ms: u64,
        scan_cap: u32,
        event_id: EventId,
    },

    /// `assigned → running`; requires the lease owner.
    MarkStarted { job_id: JobId, worker_id: WorkerId, now_ms: u64 },

    /// Monotone progress update; refreshes the lease. Out-of-order
    /// fractions are dropped without an event.
    ReportProgress {
        job_id: JobId,
        worker_id: WorkerId,
        fraction: f64,
        message: Option<String>,
        now_ms: u64,
        lease_ms: u64,
        event_id: EventId,
    },

    /// Terminal completion; idempotent when repeated by the same worker
    /// with the same result hash.
    CompleteJob {
        job_id: JobId,
        worker_id: WorkerId,
        result: serde_json::Value,
        result_hash: String,
        now_ms: u64,
        event_id: EventId,
    },

    /// Worker-reported failure: backoff requeue while retryable and
    /// attempts remain, terminal otherwise.
    FailJob {
        job_id: JobId,
        worker_id: WorkerId,
        failure: JobFailure,
        now_ms: u64,
        score_params: ScoreParams,
        event_id: EventId,
    },

    /// Cancel from any non-terminal state. `cause` threads the id of the
    /// event that triggered a cascade cancellation, if any.
    CancelJob { job_id: JobId, now_ms: u64, event_id: EventId, cause: Option<String> },

    /// Heartbeat-driven lease renewal for a worker asserting active work.
    RenewLease { job_id: JobId, worker_id: WorkerId, now_ms: u64, lease_ms: u64 },

    /// Janitor reclaim of one expired lease; verifies the lease is still
    /// held by the observed worker before touching anything.
    ReclaimLease {
        job_id: JobId,
        expected_worker: WorkerId,
        now_ms: u64,
        grace_ms: u64,
        score_params: ScoreParams,
        event_id: EventId,
    },

    /// Aggregator step update: CAS-fill one `step_details` slot, bump
    /// counters on first fill, decide workflow terminal state.
    WorkflowStep {
        workflow_id: WorkflowId,
        detail: StepDetail,
        now_ms: u64,
        step_event_id: EventId,
        terminal_event_id: EventId,
        /// Id of the job terminal event that triggered this update.
        cause: Option<String>,
    },

    /// Aging sweep: deterministically re-score the scanned tail of the
    /// pending index.
    AgePending { now_ms: u64, scan_cap: u32, score_params: ScoreParams },

    /// Append + publish one event record (the non-script publish path).
    PublishEvent { record: EventRecord },
}

impl ScriptCall {
    /// Script name, for logging and backend dispatch.
    pub fn name(&self) -> &'static str {
        match self {
            ScriptCall::SubmitJob { .. } => "submit_job",
            ScriptCall::SubmitWorkflow { .. } => "submit_workflow",
            ScriptCall::MatchClaim { .. } => "match_claim",
            ScriptCall::MarkStarted { .. } => "mark_started",
            ScriptCall::ReportProgress { .. } => "report_progress",
            ScriptCall::CompleteJob { .. } => "complete_job",
            ScriptCall::FailJob { .. } => "fail_job",
            ScriptCall::CancelJob { .. } => "cancel_job",
            ScriptCall::RenewLease { .. } => "renew_lease",
            ScriptCall::ReclaimLease { .. } => "reclaim_lease",
            ScriptCall::WorkflowStep { .. } => "workflow_step",
            ScriptCall::AgePending { .. } => "age_pending",
            ScriptCall::PublishEvent { .. } => "publish_event",
        }
    }
}

/// Typed script outcome. Logical misses (no match, conflict, not found)
/// are replies, not errors; only transport faults surface as
/// [`crate::StoreError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum ScriptReply {
    /// Job created; the `job.submitted` record was appended.
    Submitted { record: EventRecord },

    /// Idempotency-window hit with a matching fingerprint.
    Duplicate { job_id: JobId },

    /// Idempotency-window hit with a different spec.
    IdempotencyConflict { job_id: JobId },

    WorkflowSubmitted { records: Vec<EventRecord> },

    /// A job was claimed for the polling worker.
    Claimed { job: Box<Job>, record: EventRecord },

    /// No eligible job within the scan window.
    NoMatch,

    Started,

    /// Progress accepted; `record` is absent when the fraction was stale.
    Progress {
        #[serde(default)]
        record: Option<EventRecord>,
    },

    /// Completion accepted; `record` is absent on an idempotent repeat.
    Completed {
        #[serde(default)]
        record: Option<EventRecord>,
    },

    Failed { will_retry: bool, record: EventRecord },

    /// `was_leased_to` lets the caller record a cancellation intent on
    /// the worker that held the job.
    Cancelled {
        record: EventRecord,
        #[serde(default)]
        was_leased_to: Option<WorkerId>,
    },

    /// Lease renewed for the asserting worker.
    Renewed,

    /// Lease reclaimed: requeued or terminally failed.
    Reclaimed { will_retry: bool, record: EventRecord },

    /// Lease was renewed, re-owned, or already gone; nothing changed.
    LeaseIntact,

    StepRecorded {
        first_fill: bool,
        #[serde(default)]
        records: Vec<EventRecord>,
        /// Unfilled-step jobs to cancel (abort-on-failure mode).
        #[serde(default)]
        cancel_steps: Vec<JobId>,
        /// Present on the call that settled the workflow.
        #[serde(default)]
        terminal: Option<WorkflowStatus>,
    },

    Aged { rescored: u32 },

    Published { stream_id: String },

    /// Expected status or lease owner did not match; nothing changed.
    Conflict { reason: String },

    /// Unknown entity id.
    NotFound,
}

#[cfg(test)]
#[path = "script_tests.rs"]
mod tests;
