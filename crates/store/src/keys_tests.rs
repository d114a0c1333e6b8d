// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn entity_keys() {
    assert_eq!(job("job-1"), "job:job-1");
    assert_eq!(workflow("wfl-1"), "workflow:wfl-1");
    assert_eq!(worker("w1"), "worker:w1");
    assert_eq!(webhook("whk-1"), "webhook:whk-1");
    assert_eq!(idempotency("abc"), "idempotency:abc");
}

#[test]
fn event_keys() {
    assert_eq!(stream("job.completed"), "stream:job.completed");
    assert_eq!(channel("job.completed"), "events:job.completed");
}
