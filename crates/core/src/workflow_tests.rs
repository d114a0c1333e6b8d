// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn three_step() -> Workflow {
    Workflow::new(
        WorkflowId::from_string("wfl-1"),
        "pipeline",
        WorkflowMode::RunToCompletion,
        vec![
            JobId::from_string("job-a"),
            JobId::from_string("job-b"),
            JobId::from_string("job-c"),
        ],
        None,
        1_000,
    )
}

#[test]
fn new_workflow_shape() {
    let wf = three_step();
    assert_eq!(wf.total_steps, 3);
    assert_eq!(wf.step_details.len(), 3);
    assert!(wf.step_details.iter().all(|d| d.is_none()));
    assert_eq!(wf.status, WorkflowStatus::Pending);
    assert!(!wf.terminal_emitted);
}

#[test]
fn fields_roundtrip() {
    let mut wf = three_step();
    wf.status = WorkflowStatus::Running;
    wf.completed_count = 1;
    wf.step_details[0] = Some(StepDetail {
        step_index: 0,
        job_id: JobId::from_string("job-a"),
        status: StepTerminal::Completed,
        result: Some(serde_json::json!({"url": "s3://out"})),
        error: None,
        completed_at_ms: 2_000,
    });

    let map: HashMap<String, String> = wf.to_fields().into_iter().collect();
    let back = Workflow::from_fields(&map).unwrap();
    assert_eq!(back, wf);
}

#[test]
fn terminal_payload_requires_all_slots() {
    let mut wf = three_step();
    assert!(WorkflowTerminal::from_workflow(&wf).is_none());

    for (i, job_id) in wf.step_jobs.clone().iter().enumerate() {
        wf.step_details[i] = Some(StepDetail {
            step_index: i as u32,
            job_id: *job_id,
            status: StepTerminal::Completed,
            result: None,
            error: None,
            completed_at_ms: 3_000,
        });
        wf.completed_count += 1;
    }

    let terminal = WorkflowTerminal::from_workflow(&wf).unwrap();
    assert_eq!(terminal.step_details.len(), 3);
    assert_eq!(terminal.status, WorkflowStatus::Completed);
}

#[test]
fn settled_status_failed_when_any_step_not_completed() {
    let mut wf = three_step();
    wf.completed_count = 2;
    wf.failed_count = 0;
    // Third step cancelled: neither counter incremented.
    assert_eq!(wf.settled_status(), WorkflowStatus::Failed);

    wf.completed_count = 3;
    assert_eq!(wf.settled_status(), WorkflowStatus::Completed);
}

#[test]
fn mode_parse() {
    assert_eq!(WorkflowMode::parse("abort_on_failure"), Some(WorkflowMode::AbortOnFailure));
    assert_eq!(WorkflowMode::parse("run_to_completion"), Some(WorkflowMode::RunToCompletion));
    assert_eq!(WorkflowMode::parse("x"), None);
}
