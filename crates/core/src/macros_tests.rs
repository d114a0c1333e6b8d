// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::job::{JobSpec, JobStatus};
use crate::worker::CapabilityDescriptor;

#[test]
fn display_tags_match_serde_names() {
    // simple_display! output must agree with the serde snake_case tags.
    for status in [JobStatus::Pending, JobStatus::Running, JobStatus::Cancelled] {
        let tag = serde_json::to_value(status).unwrap();
        assert_eq!(tag, status.to_string());
    }
}

#[test]
fn builder_defaults_then_overrides() {
    let descriptor = CapabilityDescriptor::builder().build();
    assert_eq!(descriptor.worker_id, "worker-test-1");
    assert_eq!(descriptor.max_concurrent_jobs, 1);
    assert!(descriptor.affinity.is_none());

    let pinned = CapabilityDescriptor::builder()
        .worker_id("gpu-7")
        .gpu_memory_mb(24_000)
        .affinity("tenant-a")
        .build();
    assert_eq!(pinned.worker_id, "gpu-7");
    assert_eq!(pinned.gpu_memory_mb, 24_000);
    assert_eq!(pinned.affinity.as_deref(), Some("tenant-a"));
}

#[test]
fn setters_chain_and_wrap_options() {
    let spec = JobSpec::new("llm-chat", serde_json::json!({}))
        .priority(7)
        .correlation_id("corr-1");
    assert_eq!(spec.priority, 7);
    assert_eq!(spec.correlation_id.as_deref(), Some("corr-1"));
}
