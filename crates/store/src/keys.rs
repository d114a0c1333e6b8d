// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Logical key layout.
//!
//! Every store key is built here (and mirrored in the Lua prelude) so the
//! layout has a single definition per backend.

/// Prioritized pending index: member = job id, score = priority-age composite.
pub const PENDING: &str = "jobs:pending";

/// Set of job ids currently leased.
pub const ACTIVE: &str = "jobs:active";

/// Set of job ids in terminal state, bounded by the retention sweep.
pub const TERMINAL: &str = "jobs:terminal";

/// Set of all registered worker ids.
pub const WORKERS: &str = "workers:index";

/// Set of all webhook ids ever registered (active and inactive).
pub const WEBHOOKS: &str = "webhooks:index";

/// Set of all workflow ids.
pub const WORKFLOWS: &str = "workflows:index";

pub fn job(id: &str) -> String {
    format!("job:{id}")
}

pub fn workflow(id: &str) -> String {
    format!("workflow:{id}")
}

pub fn worker(id: &str) -> String {
    format!("worker:{id}")
}

pub fn webhook(id: &str) -> String {
    format!("webhook:{id}")
}

pub fn idempotency(key: &str) -> String {
    format!("idempotency:{key}")
}

/// Append-only event log for one event type.
pub fn stream(event_type: &str) -> String {
    format!("stream:{event_type}")
}

/// Best-effort pub/sub channel for one event type.
pub fn channel(event_type: &str) -> String {
    format!("events:{event_type}")
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
