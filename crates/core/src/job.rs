// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job record and state machine.

use crate::record::{self, Fields, RecordError};
use crate::worker::WorkerId;
use crate::workflow::WorkflowRef;
use crate::WebhookId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

crate::define_id! {
    /// Unique identifier for a submitted job.
    pub struct JobId("job-");
}

/// Lifecycle status of a job.
///
/// `Pending` jobs live in the prioritized pending index; `Assigned` and
/// `Running` jobs live in the active index with a lease; the rest are
/// terminal and absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Active means leased to a worker (assigned or running).
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Assigned | JobStatus::Running)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "assigned" => Some(JobStatus::Assigned),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

crate::simple_display! {
    JobStatus {
        Pending => "pending",
        Assigned => "assigned",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// Predicate over worker capabilities, evaluated by the match kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    /// Feature tags the worker must declare (models loaded, hardware features).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub capability_tags: BTreeSet<String>,
    /// Minimum GPU memory in megabytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_gpu_memory_mb: Option<u32>,
    /// Model files that must be present on the worker.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub models: BTreeSet<String>,
    /// Customer/tenant pinning; matched by equality against the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<String>,
    /// Geographic constraint; matched by equality against the worker region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Exclusive right of a worker to execute a job for a bounded time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub worker_id: WorkerId,
    pub expires_at_ms: u64,
    pub last_progress_at_ms: u64,
}

/// Failure record reported by a worker or synthesized by the janitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Failure kind, e.g. "job_execution_failure" or "lease_expired".
    pub kind: String,
    pub message: String,
    pub retryable: bool,
}

impl JobFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self { kind: kind.into(), message: message.into(), retryable }
    }

    /// Janitor-synthesized failure for an expired lease.
    pub fn lease_expired(worker_id: &WorkerId) -> Self {
        Self::new("lease_expired", format!("lease held by {} expired", worker_id), true)
    }
}

/// Client-side submission spec, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub service_type: String,
    #[serde(default)]
    pub requirements: Requirements,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookId>,
}

fn default_max_attempts() -> u32 {
    3
}

impl JobSpec {
    pub fn new(service_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            service_type: service_type.into(),
            requirements: Requirements::default(),
            payload,
            priority: 0,
            max_attempts: default_max_attempts(),
            correlation_id: None,
            customer_id: None,
            webhook: None,
        }
    }

    crate::setters! {
        set {
            requirements: Requirements,
            priority: i32,
            max_attempts: u32,
        }
        option {
            correlation_id: String,
            customer_id: String,
        }
    }

    /// Content fingerprint over the fields that define "the same submission".
    ///
    /// Used both as the derived idempotency key when the caller supplies no
    /// `correlation_id` and to detect a correlation id reused with a
    /// different spec.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.service_type.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.payload.to_string().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.customer_id.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\x1f");
        // Requirements serialize with sorted sets, so this is canonical.
        hasher.update(serde_json::to_string(&self.requirements).unwrap_or_default().as_bytes());
        hex(&hasher.finalize())
    }
}

/// Hash of a completion result payload, for idempotent `complete` calls.
pub fn result_hash(result: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(result.to_string().as_bytes());
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A job record as held in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub service_type: String,
    pub requirements: Requirements,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub submitted_at_ms: u64,
    pub status: JobStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    /// Present iff status is assigned or running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    /// Back-reference to the owning workflow step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowRef>,
    /// Present iff status is completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Present iff status is failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Last reported progress fraction, monotone non-decreasing.
    #[serde(default)]
    pub progress: f64,
    /// Set when cancellation of a leased job has been requested; the
    /// janitor enforces the cancel grace deadline against it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_requested_at_ms: Option<u64>,
}

impl Job {
    /// Materialize a job from a validated spec.
    pub fn from_spec(id: JobId, spec: JobSpec, workflow: Option<WorkflowRef>, now_ms: u64) -> Self {
        Self {
            id,
            service_type: spec.service_type,
            requirements: spec.requirements,
            payload: spec.payload,
            priority: spec.priority,
            submitted_at_ms: now_ms,
            status: JobStatus::Pending,
            attempt: 0,
            max_attempts: spec.max_attempts.max(1),
            lease: None,
            workflow,
            result: None,
            failure: None,
            webhook: spec.webhook,
            correlation_id: spec.correlation_id,
            customer_id: spec.customer_id,
            progress: 0.0,
            cancel_requested_at_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Flatten to hash fields for store persistence.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        record::put(&mut fields, "id", self.id.as_str());
        record::put(&mut fields, "service_type", self.service_type.clone());
        record::put_json(&mut fields, "requirements", &self.requirements);
        record::put_json(&mut fields, "payload", &self.payload);
        record::put(&mut fields, "priority", self.priority.to_string());
        record::put(&mut fields, "submitted_at_ms", self.submitted_at_ms.to_string());
        record::put(&mut fields, "status", self.status.to_string());
        record::put(&mut fields, "attempt", self.attempt.to_string());
        record::put(&mut fields, "max_attempts", self.max_attempts.to_string());
        record::put(&mut fields, "progress", self.progress.to_string());
        record::put_opt_json(&mut fields, "lease", &self.lease);
        record::put_opt_json(&mut fields, "workflow", &self.workflow);
        record::put_opt_json(&mut fields, "result", &self.result);
        record::put_opt_json(&mut fields, "failure", &self.failure);
        if let Some(webhook) = &self.webhook {
            record::put(&mut fields, "webhook", webhook.as_str());
        }
        record::put_opt(&mut fields, "correlation_id", &self.correlation_id);
        record::put_opt(&mut fields, "customer_id", &self.customer_id);
        if let Some(at) = self.cancel_requested_at_ms {
            record::put(&mut fields, "cancel_requested_at_ms", at.to_string());
        }
        fields
    }

    /// Rebuild from hash fields.
    pub fn from_fields(map: &HashMap<String, String>) -> Result<Self, RecordError> {
        let status_raw = record::get_str(map, "status")?;
        let status = JobStatus::parse(&status_raw).ok_or(RecordError::Invalid {
            field: "status",
            expected: "job status",
            value: status_raw,
        })?;
        Ok(Self {
            id: JobId::from_string(record::get_str(map, "id")?),
            service_type: record::get_str(map, "service_type")?,
            requirements: record::get_json(map, "requirements")?,
            payload: record::get_json(map, "payload")?,
            priority: record::get_i64(map, "priority")? as i32,
            submitted_at_ms: record::get_u64(map, "submitted_at_ms")?,
            status,
            attempt: record::get_u32(map, "attempt")?,
            max_attempts: record::get_u32(map, "max_attempts")?,
            lease: record::get_opt_json(map, "lease")?,
            workflow: record::get_opt_json(map, "workflow")?,
            result: record::get_opt_json(map, "result")?,
            failure: record::get_opt_json(map, "failure")?,
            webhook: record::get_opt_str(map, "webhook").map(WebhookId::from_string),
            correlation_id: record::get_opt_str(map, "correlation_id"),
            customer_id: record::get_opt_str(map, "customer_id"),
            progress: record::get_f64(map, "progress").unwrap_or(0.0),
            cancel_requested_at_ms: record::get_opt_str(map, "cancel_requested_at_ms")
                .and_then(|v| v.parse().ok()),
        })
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
            id: JobId = JobId::from_string("job-test000000000000001"),
            service_type: String = "image-gen-sdxl",
        }
        set {
            requirements: Requirements = Requirements::default(),
            payload: serde_json::Value = serde_json::json!({}),
            priority: i32 = 0,
            submitted_at_ms: u64 = 1_000_000,
            status: JobStatus = JobStatus::Pending,
            attempt: u32 = 0,
            max_attempts: u32 = 3,
            progress: f64 = 0.0,
        }
        option {
            lease: Lease = None,
            workflow: WorkflowRef = None,
            result: serde_json::Value = None,
            failure: JobFailure = None,
            webhook: WebhookId = None,
            correlation_id: String = None,
            customer_id: String = None,
            cancel_requested_at_ms: u64 = None,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
