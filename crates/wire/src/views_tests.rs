// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yard_core::{CapabilityDescriptor, Job, JobStatus, Lease, WorkerRecord};

#[test]
fn job_view_projects_all_lifecycle_fields() {
    let job = Job::builder()
        .status(JobStatus::Running)
        .attempt(2)
        .lease(Lease {
            worker_id: "w1".into(),
            expires_at_ms: 9_000,
            last_progress_at_ms: 8_000,
        })
        .progress(0.4)
        .build();
    let view = JobView::from(&job);
    assert_eq!(view.id, job.id);
    assert_eq!(view.status, JobStatus::Running);
    assert_eq!(view.attempt, 2);
    assert_eq!(view.lease.as_ref().map(|l| l.worker_id.as_str()), Some("w1"));
    assert!(view.error.is_none());
}

#[test]
fn work_assignment_requires_a_lease() {
    let unleased = Job::builder().build();
    assert!(WorkAssignment::from_claimed(&unleased).is_none());

    let claimed = Job::builder()
        .status(JobStatus::Assigned)
        .attempt(1)
        .lease(Lease {
            worker_id: "w1".into(),
            expires_at_ms: 300_000,
            last_progress_at_ms: 0,
        })
        .build();
    let assignment = WorkAssignment::from_claimed(&claimed).unwrap();
    assert_eq!(assignment.job_id, claimed.id);
    assert_eq!(assignment.lease_expires_at_ms, 300_000);
}

#[test]
fn worker_view_counts_load() {
    let mut record = WorkerRecord::new(CapabilityDescriptor::builder().build(), 1_000);
    record.active_jobs.insert("job-1".into());
    let view = WorkerView::from(&record);
    assert_eq!(view.active_jobs, 1);
    assert_eq!(view.machine_id, "machine-test-1");
}
