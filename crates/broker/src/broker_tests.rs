// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{spec, test_broker, worker};
use yard_core::JobFailure;
use yard_wire::ErrorKind;

#[tokio::test]
async fn ping_pongs() {
    let (broker, _clock) = test_broker();
    assert_eq!(broker.handle(Request::Ping).await, Response::Pong);
}

#[tokio::test]
async fn submit_and_get_job_through_dispatch() {
    let (broker, _clock) = test_broker();
    let response = broker.handle(Request::SubmitJob { spec: spec("llm-chat") }).await;
    let Response::JobSubmitted { job_id, deduplicated } = response else {
        panic!("unexpected response {response:?}");
    };
    assert!(!deduplicated);

    let response = broker.handle(Request::GetJob { id: job_id }).await;
    let Response::Job { job: Some(view) } = response else {
        panic!("unexpected response {response:?}");
    };
    assert_eq!(view.id, job_id);
}

#[tokio::test]
async fn unknown_job_is_null_not_error() {
    let (broker, _clock) = test_broker();
    let response = broker.handle(Request::GetJob { id: "job-missing".into() }).await;
    assert_eq!(response, Response::Job { job: None });
}

#[tokio::test]
async fn cancel_terminal_maps_to_conflict_kind() {
    let (broker, _clock) = test_broker();
    broker.handle(Request::SubmitJob { spec: spec("image-gen-sdxl") }).await;
    broker.handle(Request::Register { descriptor: worker("w1") }).await;
    let Response::WorkAssignment { job: Some(assignment) } =
        broker.handle(Request::RequestWork { worker_id: "w1".into() }).await
    else {
        panic!("expected assignment");
    };
    broker
        .handle(Request::Complete {
            job_id: assignment.job_id,
            worker_id: "w1".into(),
            result: serde_json::json!({}),
        })
        .await;

    let response = broker.handle(Request::CancelJob { id: assignment.job_id }).await;
    let Response::Error { kind, .. } = response else {
        panic!("expected error, got {response:?}");
    };
    assert_eq!(kind, ErrorKind::Conflict);
}

#[tokio::test]
async fn complete_from_wrong_worker_is_conflict_and_state_untouched() {
    let (broker, _clock) = test_broker();
    broker.handle(Request::SubmitJob { spec: spec("image-gen-sdxl") }).await;
    broker.handle(Request::Register { descriptor: worker("w1") }).await;
    broker.handle(Request::Register { descriptor: worker("w2") }).await;
    let Response::WorkAssignment { job: Some(assignment) } =
        broker.handle(Request::RequestWork { worker_id: "w1".into() }).await
    else {
        panic!("expected assignment");
    };

    let response = broker
        .handle(Request::Complete {
            job_id: assignment.job_id,
            worker_id: "w2".into(),
            result: serde_json::json!({}),
        })
        .await;
    assert!(matches!(response, Response::Error { kind: ErrorKind::Conflict, .. }));

    let Response::Job { job: Some(view) } =
        broker.handle(Request::GetJob { id: assignment.job_id }).await
    else {
        panic!("job vanished");
    };
    assert_eq!(view.status, yard_core::JobStatus::Assigned);
}

#[tokio::test]
async fn fail_attests_on_worker_record() {
    let (broker, _clock) = test_broker();
    broker.handle(Request::SubmitJob { spec: spec("image-gen-sdxl") }).await;
    broker.handle(Request::Register { descriptor: worker("w1") }).await;
    let Response::WorkAssignment { job: Some(assignment) } =
        broker.handle(Request::RequestWork { worker_id: "w1".into() }).await
    else {
        panic!("expected assignment");
    };

    broker
        .handle(Request::Fail {
            job_id: assignment.job_id,
            worker_id: "w1".into(),
            error: JobFailure::new("job_execution_failure", "cuda oom", true),
        })
        .await;

    let Response::Workers { workers } =
        broker.handle(Request::Query { query: Query::Workers }).await
    else {
        panic!("expected workers");
    };
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].recent_failure_count, 1);
}

#[tokio::test]
async fn status_query_counts_indexes() {
    let (broker, _clock) = test_broker();
    broker.handle(Request::SubmitJob { spec: spec("llm-chat") }).await;
    broker.handle(Request::Register { descriptor: worker("w1") }).await;

    let Response::Status { status } =
        broker.handle(Request::Query { query: Query::Status }).await
    else {
        panic!("expected status");
    };
    assert_eq!(status.pending_jobs, 1);
    assert_eq!(status.active_jobs, 0);
    assert_eq!(status.workers, 1);
    assert!(status.store_healthy);
}

#[tokio::test]
async fn jobs_query_filters_by_status() {
    let (broker, _clock) = test_broker();
    broker.handle(Request::SubmitJob { spec: spec("llm-chat") }).await;
    broker
        .handle(Request::SubmitJob { spec: spec("image-gen-sdxl").correlation_id("other") })
        .await;

    let Response::Jobs { jobs } = broker
        .handle(Request::Query {
            query: Query::Jobs {
                status: Some(yard_core::JobStatus::Pending),
                service_type: Some("llm-chat".to_string()),
                limit: 10,
            },
        })
        .await
    else {
        panic!("expected jobs");
    };
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].service_type, "llm-chat");
}

#[tokio::test]
async fn subscribe_as_single_shot_is_rejected() {
    let (broker, _clock) = test_broker();
    let response = broker
        .handle(Request::Subscribe {
            consumer: "x".to_string(),
            event_types: vec![],
            replay_from: None,
        })
        .await;
    assert!(matches!(response, Response::Error { kind: ErrorKind::Validation, .. }));
}
