// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol-level error taxonomy.

use serde::{Deserialize, Serialize};

/// The kinds of failure a request can surface. Clients branch on the
/// kind; the message is for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input shape or predicate rejected; never retried internally.
    Validation,
    /// Optimistic-concurrency violation, e.g. cancelling a terminal job.
    Conflict,
    NotFound,
    /// Transient store fault, surfaced after internal retries exhausted.
    StoreUnavailable,
    /// A worker acted outside its session, e.g. completing a job it does
    /// not own. Logged and counted; job state is untouched.
    WorkerProtocolViolation,
    RateLimited,
    Internal,
}

yard_core::simple_display! {
    ErrorKind {
        Validation => "validation",
        Conflict => "conflict",
        NotFound => "not_found",
        StoreUnavailable => "store_unavailable",
        WorkerProtocolViolation => "worker_protocol_violation",
        RateLimited => "rate_limited",
        Internal => "internal",
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
