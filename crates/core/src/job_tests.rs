// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn status_parse_roundtrip() {
    for status in [
        JobStatus::Pending,
        JobStatus::Assigned,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ] {
        assert_eq!(JobStatus::parse(&status.to_string()), Some(status));
    }
    assert_eq!(JobStatus::parse("bogus"), None);
}

#[parameterized(
    pending = { JobStatus::Pending, false, false },
    assigned = { JobStatus::Assigned, false, true },
    running = { JobStatus::Running, false, true },
    completed = { JobStatus::Completed, true, false },
    failed = { JobStatus::Failed, true, false },
    cancelled = { JobStatus::Cancelled, true, false },
)]
fn status_classification(status: JobStatus, terminal: bool, active: bool) {
    assert_eq!(status.is_terminal(), terminal);
    assert_eq!(status.is_active(), active);
}

#[test]
fn from_spec_defaults() {
    let spec = JobSpec::new("llm-chat", serde_json::json!({"prompt": "hi"})).priority(10);
    let job = Job::from_spec(JobId::from_string("job-1"), spec, None, 5_000);

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempt, 0);
    assert_eq!(job.priority, 10);
    assert_eq!(job.submitted_at_ms, 5_000);
    assert!(job.lease.is_none());
    assert!(job.result.is_none());
}

#[test]
fn from_spec_clamps_zero_max_attempts() {
    let spec = JobSpec::new("llm-chat", serde_json::json!({})).max_attempts(0);
    let job = Job::from_spec(JobId::from_string("job-1"), spec, None, 0);
    assert_eq!(job.max_attempts, 1);
}

#[test]
fn fields_roundtrip_minimal() {
    let job = Job::builder().build();
    let map: std::collections::HashMap<String, String> = job.to_fields().into_iter().collect();
    let back = Job::from_fields(&map).unwrap();
    assert_eq!(back, job);
}

#[test]
fn fields_roundtrip_full() {
    let job = Job::builder()
        .status(JobStatus::Running)
        .attempt(2)
        .lease(Lease {
            worker_id: WorkerId::new("w1"),
            expires_at_ms: 9_000,
            last_progress_at_ms: 8_000,
        })
        .workflow(WorkflowRef { workflow_id: "wfl-a".into(), step_index: 1 })
        .correlation_id("corr-1")
        .customer_id("cust-1")
        .progress(0.5)
        .cancel_requested_at_ms(7_000u64)
        .build();
    let map: std::collections::HashMap<String, String> = job.to_fields().into_iter().collect();
    let back = Job::from_fields(&map).unwrap();
    assert_eq!(back, job);
}

#[test]
fn fingerprint_is_stable_and_spec_sensitive() {
    let a = JobSpec::new("image-gen-sdxl", serde_json::json!({"seed": 1}));
    let b = JobSpec::new("image-gen-sdxl", serde_json::json!({"seed": 1}));
    let c = JobSpec::new("image-gen-sdxl", serde_json::json!({"seed": 2}));

    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_ne!(a.fingerprint(), c.fingerprint());
}

#[test]
fn fingerprint_ignores_priority() {
    let a = JobSpec::new("llm-chat", serde_json::json!({})).priority(1);
    let b = JobSpec::new("llm-chat", serde_json::json!({})).priority(9);
    assert_eq!(a.fingerprint(), b.fingerprint());
}

#[test]
fn result_hash_differs_by_payload() {
    let a = result_hash(&serde_json::json!({"url": "a"}));
    let b = result_hash(&serde_json::json!({"url": "b"}));
    assert_ne!(a, b);
}

#[test]
fn lease_expired_failure_is_retryable() {
    let failure = JobFailure::lease_expired(&WorkerId::new("w1"));
    assert_eq!(failure.kind, "lease_expired");
    assert!(failure.retryable);
}
