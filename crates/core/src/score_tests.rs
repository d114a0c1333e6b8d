// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn higher_priority_always_outranks_age() {
    let low_old = submit_score(1, 0);
    let high_new = submit_score(2, 1_700_000_000_000);
    assert!(high_new > low_old);
}

#[test]
fn fifo_within_priority_band() {
    let older = submit_score(5, 1_000_000);
    let newer = submit_score(5, 2_000_000);
    assert!(older > newer);
}

#[parameterized(
    fresh = { 0, 0 },
    first_retry = { 1, 5 },
    second_retry = { 2, 10 },
    third_retry = { 3, 20 },
    deep_retry = { 10, 300 },
)]
fn backoff_doubles_and_caps(attempt: u32, expected_sec: u64) {
    let params = ScoreParams::default();
    assert_eq!(backoff_sec(attempt, &params), expected_sec);
}

#[test]
fn age_boost_per_minute_capped() {
    let params = ScoreParams::default();
    assert_eq!(age_boost(60_000, 0, &params), 1);
    assert_eq!(age_boost(120_000, 0, &params), 2);
    assert_eq!(age_boost(59_000, 0, &params), 0);
    // Cap at 60 points no matter how long the wait.
    assert_eq!(age_boost(100 * 60_000 * 60, 0, &params), 60);
}

#[test]
fn aging_rescore_is_idempotent() {
    let params = ScoreParams::default();
    let now = 10 * 60_000;
    let a = pending_score(3, 0, 0, now, &params);
    let b = pending_score(3, 0, 0, now, &params);
    assert_eq!(a, b);
}

#[test]
fn backoff_sorts_retry_later_than_peers() {
    let params = ScoreParams::default();
    let retried = pending_score(5, 1_000_000, 2, 1_000_000, &params);
    let fresh = pending_score(5, 1_000_000, 0, 1_000_000, &params);
    assert!(retried < fresh);
}

#[test]
fn boosted_job_crosses_priority_band() {
    let params = ScoreParams::default();
    // After two minutes the boost is worth two priority points.
    let aged = pending_score(1, 0, 0, 2 * 60_000, &params);
    let fresh = submit_score(2, 2 * 60_000);
    assert!(aged > fresh);
}
