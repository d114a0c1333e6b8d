// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker identity, capability descriptors, and session records.

use crate::job::JobId;
use crate::record::{self, Fields, RecordError};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

/// Failure attestations retained per worker.
pub const FAILURE_RING_CAP: usize = 50;

/// Unique identifier for a worker instance.
///
/// Worker ids are supplied by the workers themselves (machine-scoped),
/// not generated by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<str> for WorkerId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for WorkerId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl Borrow<str> for WorkerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Liveness status of a worker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Busy,
    /// Refuses new work; in-flight jobs may complete or lease-expire.
    Draining,
    Dead,
}

impl WorkerState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(WorkerState::Idle),
            "busy" => Some(WorkerState::Busy),
            "draining" => Some(WorkerState::Draining),
            "dead" => Some(WorkerState::Dead),
            _ => None,
        }
    }

    /// Whether the worker may be handed new assignments.
    pub fn accepts_work(&self) -> bool {
        matches!(self, WorkerState::Idle | WorkerState::Busy)
    }
}

crate::simple_display! {
    WorkerState {
        Idle => "idle",
        Busy => "busy",
        Draining => "draining",
        Dead => "dead",
    }
}

/// A worker's declared service tags, feature tags, and hardware attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub worker_id: WorkerId,
    pub machine_id: String,
    pub service_types: BTreeSet<String>,
    #[serde(default)]
    pub capability_tags: BTreeSet<String>,
    #[serde(default)]
    pub gpu_memory_mb: u32,
    #[serde(default = "default_concurrency")]
    pub max_concurrent_jobs: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

fn default_concurrency() -> u32 {
    1
}

/// One audited failure a worker produced, kept in a bounded ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureAttestation {
    pub job_id: JobId,
    pub kind: String,
    pub message: String,
    pub at_ms: u64,
}

/// A worker session record as held in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub descriptor: CapabilityDescriptor,
    pub state: WorkerState,
    pub registered_at_ms: u64,
    pub last_heartbeat_at_ms: u64,
    /// Jobs currently leased to this worker.
    #[serde(default)]
    pub active_jobs: BTreeSet<JobId>,
    /// Cancellation intents piggy-backed on the next heartbeat reply.
    #[serde(default)]
    pub cancel_pending: BTreeSet<JobId>,
    /// Recent failures this worker attested to, newest last.
    #[serde(default)]
    pub recent_failures: VecDeque<FailureAttestation>,
}

impl WorkerRecord {
    pub fn new(descriptor: CapabilityDescriptor, now_ms: u64) -> Self {
        Self {
            descriptor,
            state: WorkerState::Idle,
            registered_at_ms: now_ms,
            last_heartbeat_at_ms: now_ms,
            active_jobs: BTreeSet::new(),
            cancel_pending: BTreeSet::new(),
            recent_failures: VecDeque::new(),
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.descriptor.worker_id
    }

    /// Record a failure attestation, evicting the oldest past the ring cap.
    pub fn attest_failure(&mut self, attestation: FailureAttestation) {
        self.recent_failures.push_back(attestation);
        while self.recent_failures.len() > FAILURE_RING_CAP {
            self.recent_failures.pop_front();
        }
    }

    /// Derive idle/busy from the current lease count, preserving
    /// draining and dead states.
    pub fn refresh_load_state(&mut self) {
        if matches!(self.state, WorkerState::Draining | WorkerState::Dead) {
            return;
        }
        self.state =
            if self.active_jobs.is_empty() { WorkerState::Idle } else { WorkerState::Busy };
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        record::put(&mut fields, "id", self.descriptor.worker_id.as_str());
        record::put_json(&mut fields, "descriptor", &self.descriptor);
        record::put(&mut fields, "state", self.state.to_string());
        record::put(&mut fields, "registered_at_ms", self.registered_at_ms.to_string());
        record::put(&mut fields, "last_heartbeat_at_ms", self.last_heartbeat_at_ms.to_string());
        record::put_json(&mut fields, "active_jobs", &self.active_jobs);
        record::put_json(&mut fields, "cancel_pending", &self.cancel_pending);
        record::put_json(&mut fields, "recent_failures", &self.recent_failures);
        fields
    }

    pub fn from_fields(map: &HashMap<String, String>) -> Result<Self, RecordError> {
        let state_raw = record::get_str(map, "state")?;
        let state = WorkerState::parse(&state_raw).ok_or(RecordError::Invalid {
            field: "state",
            expected: "worker state",
            value: state_raw,
        })?;
        Ok(Self {
            descriptor: record::get_json(map, "descriptor")?,
            state,
            registered_at_ms: record::get_u64(map, "registered_at_ms")?,
            last_heartbeat_at_ms: record::get_u64(map, "last_heartbeat_at_ms")?,
            active_jobs: record::get_opt_json(map, "active_jobs")?.unwrap_or_default(),
            cancel_pending: record::get_opt_json(map, "cancel_pending")?.unwrap_or_default(),
            recent_failures: record::get_opt_json(map, "recent_failures")?.unwrap_or_default(),
        })
    }
}

crate::builder! {
    pub struct CapabilityDescriptorBuilder => CapabilityDescriptor {
        into {
            worker_id: WorkerId = "worker-test-1",
            machine_id: String = "machine-test-1",
        }
        set {
            service_types: BTreeSet<String> = ["image-gen-sdxl".to_string()].into(),
            capability_tags: BTreeSet<String> = BTreeSet::new(),
            gpu_memory_mb: u32 = 16_000,
            max_concurrent_jobs: u32 = 1,
        }
        option {
            affinity: String = None,
            region: String = None,
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
