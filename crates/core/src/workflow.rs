// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow record, step details, and aggregation state.

use crate::job::{JobFailure, JobId};
use crate::record::{self, Fields, RecordError};
use crate::WebhookId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

crate::define_id! {
    /// Unique identifier for a workflow.
    pub struct WorkflowId("wfl-");
}

/// Back-reference from a job to its owning workflow step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRef {
    pub workflow_id: WorkflowId,
    pub step_index: u32,
}

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WorkflowStatus::Pending),
            "running" => Some(WorkflowStatus::Running),
            "completed" => Some(WorkflowStatus::Completed),
            "failed" => Some(WorkflowStatus::Failed),
            _ => None,
        }
    }
}

crate::simple_display! {
    WorkflowStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
}

/// Sibling-handling policy when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    /// First terminal failure cancels the remaining steps.
    AbortOnFailure,
    /// Every step runs to a terminal state before the workflow settles.
    RunToCompletion,
}

impl WorkflowMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "abort_on_failure" => Some(WorkflowMode::AbortOnFailure),
            "run_to_completion" => Some(WorkflowMode::RunToCompletion),
            _ => None,
        }
    }
}

crate::simple_display! {
    WorkflowMode {
        AbortOnFailure => "abort_on_failure",
        RunToCompletion => "run_to_completion",
    }
}

/// Terminal state of a single step, as recorded in `step_details`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepTerminal {
    Completed,
    Failed,
    Cancelled,
}

crate::simple_display! {
    StepTerminal {
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// Canonical per-step terminal record.
///
/// The workflow aggregator is the sole producer of these; downstream
/// notifiers consume them verbatim and never synthesize their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDetail {
    pub step_index: u32,
    pub job_id: JobId,
    pub status: StepTerminal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub completed_at_ms: u64,
}

/// A workflow record as held in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub mode: WorkflowMode,
    pub total_steps: u32,
    pub created_at_ms: u64,
    pub status: WorkflowStatus,
    /// Ordered job id per step.
    pub step_jobs: Vec<JobId>,
    /// One slot per step, filled exactly once on that step's terminal
    /// transition.
    pub step_details: Vec<Option<StepDetail>>,
    pub completed_count: u32,
    pub failed_count: u32,
    /// Set atomically when the terminal event record is appended; makes
    /// the terminal emission exactly-once.
    pub terminal_emitted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookId>,
}

impl Workflow {
    pub fn new(
        id: WorkflowId,
        name: impl Into<String>,
        mode: WorkflowMode,
        step_jobs: Vec<JobId>,
        webhook: Option<WebhookId>,
        now_ms: u64,
    ) -> Self {
        let total_steps = step_jobs.len() as u32;
        Self {
            id,
            name: name.into(),
            mode,
            total_steps,
            created_at_ms: now_ms,
            status: WorkflowStatus::Pending,
            step_details: vec![None; step_jobs.len()],
            step_jobs,
            completed_count: 0,
            failed_count: 0,
            terminal_emitted: false,
            webhook,
        }
    }

    /// Number of slots already filled with a terminal record.
    pub fn filled_count(&self) -> u32 {
        self.step_details.iter().filter(|d| d.is_some()).count() as u32
    }

    /// The workflow settles once every slot is filled: completed iff
    /// every step completed, failed otherwise.
    pub fn settled_status(&self) -> WorkflowStatus {
        if self.completed_count == self.total_steps {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Failed
        }
    }

    /// Flatten to hash fields. Step slots persist as individual
    /// `step:{i}` fields so the store scripts can CAS-fill one slot with
    /// `HSETNX` and assemble the canonical array without re-encoding
    /// opaque result payloads.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        record::put(&mut fields, "id", self.id.as_str());
        record::put(&mut fields, "name", self.name.clone());
        record::put(&mut fields, "mode", self.mode.to_string());
        record::put(&mut fields, "total_steps", self.total_steps.to_string());
        record::put(&mut fields, "created_at_ms", self.created_at_ms.to_string());
        record::put(&mut fields, "status", self.status.to_string());
        record::put_json(&mut fields, "step_jobs", &self.step_jobs);
        for (i, slot) in self.step_details.iter().enumerate() {
            if let Some(detail) = slot {
                let raw = serde_json::to_string(detail).unwrap_or_default();
                fields.push((format!("step:{i}"), raw));
            }
        }
        record::put(&mut fields, "completed_count", self.completed_count.to_string());
        record::put(&mut fields, "failed_count", self.failed_count.to_string());
        record::put(&mut fields, "terminal_emitted", if self.terminal_emitted { "1" } else { "0" });
        if let Some(webhook) = &self.webhook {
            record::put(&mut fields, "webhook", webhook.as_str());
        }
        fields
    }

    pub fn from_fields(map: &HashMap<String, String>) -> Result<Self, RecordError> {
        let status_raw = record::get_str(map, "status")?;
        let status = WorkflowStatus::parse(&status_raw).ok_or(RecordError::Invalid {
            field: "status",
            expected: "workflow status",
            value: status_raw,
        })?;
        let mode_raw = record::get_str(map, "mode")?;
        let mode = WorkflowMode::parse(&mode_raw).ok_or(RecordError::Invalid {
            field: "mode",
            expected: "workflow mode",
            value: mode_raw,
        })?;
        let total_steps = record::get_u32(map, "total_steps")?;
        let mut step_details = Vec::with_capacity(total_steps as usize);
        for i in 0..total_steps {
            match map.get(&format!("step:{i}")) {
                None => step_details.push(None),
                Some(raw) => {
                    let detail = serde_json::from_str(raw).map_err(|_| RecordError::Invalid {
                        field: "step",
                        expected: "step detail json",
                        value: raw.clone(),
                    })?;
                    step_details.push(Some(detail));
                }
            }
        }
        Ok(Self {
            id: WorkflowId::from_string(record::get_str(map, "id")?),
            name: record::get_str(map, "name")?,
            mode,
            total_steps,
            created_at_ms: record::get_u64(map, "created_at_ms")?,
            status,
            step_jobs: record::get_json(map, "step_jobs")?,
            step_details,
            completed_count: record::get_u32(map, "completed_count")?,
            failed_count: record::get_u32(map, "failed_count")?,
            terminal_emitted: record::get_str(map, "terminal_emitted")? == "1",
            webhook: record::get_opt_str(map, "webhook").map(WebhookId::from_string),
        })
    }
}

/// Canonical payload of a terminal workflow event, consumed bit-exact
/// by subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTerminal {
    pub workflow_id: WorkflowId,
    pub name: String,
    pub status: WorkflowStatus,
    pub total_steps: u32,
    pub completed_count: u32,
    pub failed_count: u32,
    pub step_details: Vec<StepDetail>,
}

impl WorkflowTerminal {
    /// Build the canonical payload from a fully-settled workflow.
    ///
    /// Returns `None` while any slot is unfilled; the terminal event is
    /// only emitted once the array is complete.
    pub fn from_workflow(workflow: &Workflow) -> Option<Self> {
        let mut step_details = Vec::with_capacity(workflow.step_details.len());
        for slot in &workflow.step_details {
            step_details.push(slot.clone()?);
        }
        Some(Self {
            workflow_id: workflow.id,
            name: workflow.name.clone(),
            status: workflow.settled_status(),
            total_steps: workflow.total_steps,
            completed_count: workflow.completed_count,
            failed_count: workflow.failed_count,
            step_details,
        })
    }
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
