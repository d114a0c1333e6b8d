// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use yard_core::JobStatus;

/// Read-only state queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Query {
    /// List jobs, optionally filtered
    Jobs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<JobStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service_type: Option<String>,
        #[serde(default = "default_limit")]
        limit: usize,
    },

    /// List workflows
    Workflows {
        #[serde(default = "default_limit")]
        limit: usize,
    },

    /// List registered workers with liveness
    Workers,

    /// Broker health snapshot
    Status,
}

fn default_limit() -> usize {
    100
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
