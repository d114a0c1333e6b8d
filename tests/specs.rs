// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end broker scenarios over the in-memory store.
//!
//! Each test drives the full component stack (ingress, match kernel,
//! registry, sessions, aggregator, janitor, bus) with a controllable
//! clock, asserting both observable state and the exact event history.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use yard_broker::{Aggregator, Broker, Janitor};
use yard_core::{
    BrokerConfig, CapabilityDescriptor, EventRecord, FakeClock, JobFailure, JobSpec, JobStatus,
    Requirements, WorkflowMode, WorkflowStatus,
};
use yard_store::MemoryStore;
use yard_wire::{Query, Request, Response};

type TestBroker = Broker<MemoryStore<FakeClock>, FakeClock>;

struct Harness {
    broker: Arc<TestBroker>,
    clock: FakeClock,
    aggregator: Aggregator<MemoryStore<FakeClock>, FakeClock>,
    aggregator_rx: tokio::sync::mpsc::UnboundedReceiver<EventRecord>,
    janitor: Janitor<MemoryStore<FakeClock>, FakeClock>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    fn with_config(cfg: BrokerConfig) -> Self {
        let clock = FakeClock::new();
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let broker = Broker::new(store, clock.clone(), cfg);
        let aggregator_rx = yard_broker::aggregator::subscription(&broker.bus);
        let aggregator = Aggregator::new(
            Arc::clone(&broker.store),
            clock.clone(),
            Arc::clone(&broker.bus),
            Arc::clone(&broker.registry),
        );
        let janitor = Janitor::new(
            Arc::clone(&broker.store),
            clock.clone(),
            Arc::clone(&broker.cfg),
            Arc::clone(&broker.bus),
            Arc::clone(&broker.sessions),
        );
        Self { broker, clock, aggregator, aggregator_rx, janitor }
    }

    /// Drain the aggregator channel, like its owning task would.
    async fn settle(&mut self) {
        while let Ok(record) = self.aggregator_rx.try_recv() {
            self.aggregator.apply(&record).await.unwrap();
        }
    }

    /// Event type names for one aggregate, in stream order across all
    /// per-type streams (merged by monotone event id).
    async fn history_for(&self, aggregate: &str) -> Vec<String> {
        let mut entries: Vec<(String, String)> = Vec::new();
        for event_type in yard_core::Event::ALL_TYPES {
            for (_, record) in self.broker.bus.replay(event_type, None, 1_000).await.unwrap() {
                if record.event.aggregate_id() == aggregate {
                    entries.push((record.id.to_string(), record.type_name().to_string()));
                }
            }
        }
        entries.sort();
        entries.into_iter().map(|(_, t)| t).collect()
    }
}

fn gpu_worker(id: &str, gpu_mb: u32, tags: &[&str]) -> CapabilityDescriptor {
    let mut descriptor = CapabilityDescriptor::builder().worker_id(id).build();
    descriptor.gpu_memory_mb = gpu_mb;
    descriptor.capability_tags = tags.iter().map(|t| t.to_string()).collect();
    descriptor
}

// S1: Single job happy path.
#[tokio::test]
async fn s1_single_job_happy_path() {
    let harness = Harness::new();
    let broker = &harness.broker;

    let spec = JobSpec {
        service_type: "image-gen-sdxl".to_string(),
        requirements: Requirements {
            capability_tags: BTreeSet::from(["sdxl-base".to_string()]),
            min_gpu_memory_mb: Some(8_000),
            ..Requirements::default()
        },
        payload: serde_json::json!({"prompt": "a cat"}),
        priority: 10,
        max_attempts: 3,
        correlation_id: None,
        customer_id: None,
        webhook: None,
    };
    let submitted = broker.ingress.submit_job(spec).await.unwrap();

    broker
        .sessions
        .register(gpu_worker("worker-a", 16_000, &["sdxl-base", "lora-x"]))
        .await
        .unwrap();
    let job = broker.sessions.request_work(&"worker-a".into()).await.unwrap().unwrap();
    assert_eq!(job.id, submitted.job_id);

    let result = serde_json::json!({"image": "s3://bucket/cat.png"});
    broker.registry.complete(job.id, "worker-a".into(), result.clone()).await.unwrap();

    let view = broker.ingress.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.result, Some(result));

    let history = harness.history_for(job.id.as_str()).await;
    assert_eq!(history, vec!["job.submitted", "job.assigned", "job.completed"]);
}

// S2: Capability mismatch, then aging, then a capable worker.
#[tokio::test]
async fn s2_capability_mismatch_and_aging() {
    let harness = Harness::new();
    let broker = &harness.broker;
    let clock = &harness.clock;

    let spec = JobSpec {
        service_type: "image-gen-sdxl".to_string(),
        requirements: Requirements {
            min_gpu_memory_mb: Some(24_000),
            ..Requirements::default()
        },
        payload: serde_json::json!({}),
        priority: 0,
        max_attempts: 3,
        correlation_id: None,
        customer_id: None,
        webhook: None,
    };
    let submitted = broker.ingress.submit_job(spec).await.unwrap();

    broker.sessions.register(gpu_worker("worker-b", 12_000, &[])).await.unwrap();
    assert!(broker.sessions.request_work(&"worker-b".into()).await.unwrap().is_none());
    let view = broker.ingress.get_job(&submitted.job_id).await.unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Pending);

    // Two minutes of aging raises the score by two priority points.
    clock.advance(Duration::from_secs(120));
    broker.sessions.heartbeat(&"worker-b".into(), false, vec![]).await.unwrap();
    assert!(harness.janitor.tick().await.unwrap().jobs_aged >= 1);
    assert!(broker.sessions.request_work(&"worker-b".into()).await.unwrap().is_none());

    broker.sessions.register(gpu_worker("worker-c", 24_000, &[])).await.unwrap();
    let job = broker.sessions.request_work(&"worker-c".into()).await.unwrap().unwrap();
    assert_eq!(job.id, submitted.job_id);
}

// S3: Lease expiry and retry.
#[tokio::test]
async fn s3_lease_expiry_and_retry() {
    let harness = Harness::new();
    let broker = &harness.broker;
    let clock = &harness.clock;

    let spec = JobSpec {
        max_attempts: 3,
        ..JobSpec::new("image-gen-sdxl", serde_json::json!({}))
    };
    let submitted = broker.ingress.submit_job(spec).await.unwrap();

    // Worker D claims and never heartbeats again.
    broker.sessions.register(gpu_worker("worker-d", 16_000, &[])).await.unwrap();
    let job = broker.sessions.request_work(&"worker-d".into()).await.unwrap().unwrap();
    assert_eq!(job.attempt, 1);

    clock.advance(Duration::from_secs(300 + 5 + 1));
    let report = harness.janitor.tick().await.unwrap();
    assert_eq!(report.leases_reclaimed, 1);

    // Worker E picks it up and completes.
    broker.sessions.register(gpu_worker("worker-e", 16_000, &[])).await.unwrap();
    let job = broker.sessions.request_work(&"worker-e".into()).await.unwrap().unwrap();
    assert_eq!(job.id, submitted.job_id);
    assert_eq!(job.attempt, 2);
    broker.registry.complete(job.id, "worker-e".into(), serde_json::json!({})).await.unwrap();

    let view = broker.ingress.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Completed);

    let history = harness.history_for(job.id.as_str()).await;
    assert_eq!(
        history,
        vec!["job.submitted", "job.assigned", "job.failed", "job.assigned", "job.completed"]
    );
}

// S4: Workflow, abort-on-failure.
#[tokio::test]
async fn s4_workflow_abort_on_failure() {
    let mut harness = Harness::new();
    let broker = Arc::clone(&harness.broker);

    // Descending priorities make the claim order match the step order.
    let steps = vec![
        JobSpec { priority: 3, ..JobSpec::new("image-gen-sdxl", serde_json::json!({"step": 1})) },
        JobSpec { priority: 2, ..JobSpec::new("image-gen-sdxl", serde_json::json!({"step": 2})) },
        JobSpec { priority: 1, ..JobSpec::new("image-gen-sdxl", serde_json::json!({"step": 3})) },
    ];
    let (workflow_id, job_ids) = broker
        .ingress
        .submit_workflow("render".to_string(), steps, Some(WorkflowMode::AbortOnFailure), None)
        .await
        .unwrap();

    broker.sessions.register(gpu_worker("worker-a", 16_000, &[])).await.unwrap();

    // Step 1 completes.
    let first = broker.sessions.request_work(&"worker-a".into()).await.unwrap().unwrap();
    broker.registry.complete(first.id, "worker-a".into(), serde_json::json!({})).await.unwrap();
    broker.sessions.job_detached(&"worker-a".into(), &first.id).await.unwrap();
    harness.settle().await;

    // Step 2 fails terminally.
    let second = broker.sessions.request_work(&"worker-a".into()).await.unwrap().unwrap();
    broker
        .registry
        .fail(
            second.id,
            "worker-a".into(),
            JobFailure::new("job_execution_failure", "bad checkpoint", false),
        )
        .await
        .unwrap();
    broker.sessions.job_detached(&"worker-a".into(), &second.id).await.unwrap();
    harness.settle().await;

    let workflow = harness.broker.ingress.get_workflow(&workflow_id).await.unwrap().unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Failed);
    let statuses: Vec<String> = workflow
        .step_details
        .iter()
        .map(|slot| slot.as_ref().unwrap().status.to_string())
        .collect();
    assert_eq!(statuses, vec!["completed", "failed", "cancelled"]);

    // workflow.failed emitted exactly once, step_details complete.
    let failed = harness.broker.bus.replay("workflow.failed", None, 10).await.unwrap();
    assert_eq!(failed.len(), 1);
    match &failed[0].1.event {
        yard_core::Event::WorkflowFailed(payload) => {
            assert_eq!(payload.step_details.len(), 3);
            assert_eq!(payload.total_steps, 3);
        }
        other => panic!("unexpected event {other:?}"),
    }

    // The cancelled third step never ran.
    let third = harness.broker.ingress.get_job(&job_ids[2]).await.unwrap().unwrap();
    assert_eq!(third.status, JobStatus::Cancelled);
}

// S5: Idempotent submission.
#[tokio::test]
async fn s5_idempotent_submission() {
    let harness = Harness::new();
    let broker = &harness.broker;

    let spec = JobSpec {
        correlation_id: Some("abc".to_string()),
        ..JobSpec::new("llm-chat", serde_json::json!({"prompt": "hi"}))
    };
    let first = broker.ingress.submit_job(spec.clone()).await.unwrap();
    let second = broker.ingress.submit_job(spec.clone()).await.unwrap();
    assert_eq!(first.job_id, second.job_id);
    assert!(second.deduplicated);

    // No second job.submitted event.
    let submitted = broker.bus.replay("job.submitted", None, 10).await.unwrap();
    assert_eq!(submitted.len(), 1);

    // Same correlation id, different payload: conflict.
    let conflicting = JobSpec {
        correlation_id: Some("abc".to_string()),
        ..JobSpec::new("llm-chat", serde_json::json!({"prompt": "bye"}))
    };
    let err = broker.ingress.submit_job(conflicting).await.unwrap_err();
    assert!(matches!(err, yard_broker::BrokerError::Conflict(_)));
}

// S6: Webhook visibility under cache refresh.
#[tokio::test]
async fn s6_webhook_visibility_under_cache_refresh() {
    let harness = Harness::new();
    let broker = &harness.broker;

    let id = broker
        .ingress
        .register_webhook(
            "https://example.com/notify".to_string(),
            vec!["workflow.completed".to_string()],
            "s3cret".to_string(),
        )
        .await
        .unwrap();

    broker.ingress.update_webhook(&id, false).await.unwrap();
    broker.ingress.refresh_webhook_cache().await.unwrap();

    // Still visible, with active=false, never a 404.
    let hook = broker.ingress.get_webhook(&id).await.unwrap().unwrap();
    assert!(!hook.active);

    // Re-activation flips the same registration in place.
    broker.ingress.update_webhook(&id, true).await.unwrap();
    broker.ingress.refresh_webhook_cache().await.unwrap();
    let listed = broker.ingress.list_webhooks().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].active);
}

// Invariant: single claim and index consistency under competing polls.
#[tokio::test]
async fn competing_workers_claim_distinct_jobs() {
    let harness = Harness::new();
    let broker = &harness.broker;

    for i in 0..3 {
        broker
            .ingress
            .submit_job(JobSpec {
                correlation_id: Some(format!("c{i}")),
                ..JobSpec::new("image-gen-sdxl", serde_json::json!({"n": i}))
            })
            .await
            .unwrap();
    }
    broker.sessions.register(gpu_worker("w1", 16_000, &[])).await.unwrap();
    broker.sessions.register(gpu_worker("w2", 16_000, &[])).await.unwrap();
    broker.sessions.register(gpu_worker("w3", 16_000, &[])).await.unwrap();

    let mut claimed = BTreeSet::new();
    for worker in ["w1", "w2", "w3"] {
        let job = broker.sessions.request_work(&worker.into()).await.unwrap().unwrap();
        claimed.insert(job.id);
    }
    assert_eq!(claimed.len(), 3, "every claim is exclusive");

    let status = match broker.handle(Request::Query { query: Query::Status }).await {
        Response::Status { status } => status,
        other => panic!("unexpected response {other:?}"),
    };
    assert_eq!(status.pending_jobs, 0);
    assert_eq!(status.active_jobs, 3);
}

// The worker protocol through full request dispatch, with cancellation
// riding the heartbeat reply.
#[tokio::test]
async fn cancellation_request_rides_heartbeat() {
    let harness = Harness::new();
    let broker = &harness.broker;

    broker.handle(Request::SubmitJob { spec: JobSpec::new("llm-chat", serde_json::json!({})) }).await;
    broker.handle(Request::Register { descriptor: gpu_worker("w1", 16_000, &[]) }).await;
    let assignment = match broker.handle(Request::RequestWork { worker_id: "w1".into() }).await {
        Response::WorkAssignment { job: Some(assignment) } => assignment,
        other => panic!("unexpected response {other:?}"),
    };

    broker.handle(Request::CancelJob { id: assignment.job_id }).await;

    let ack = broker
        .handle(Request::Heartbeat {
            worker_id: "w1".into(),
            active_work: false,
            cancel_ack: vec![],
        })
        .await;
    match ack {
        Response::HeartbeatAck { cancel_requested } => {
            assert_eq!(cancel_requested, vec![assignment.job_id]);
        }
        other => panic!("unexpected response {other:?}"),
    }
}

// Event ordering per aggregate across a retry (invariant 6).
#[tokio::test]
async fn per_aggregate_event_order_spans_retries() {
    let harness = Harness::new();
    let broker = &harness.broker;

    let submitted =
        broker.ingress.submit_job(JobSpec::new("llm-chat", serde_json::json!({}))).await.unwrap();
    broker.sessions.register(gpu_worker("w1", 16_000, &[])).await.unwrap();
    let job = broker.sessions.request_work(&"w1".into()).await.unwrap().unwrap();
    broker
        .registry
        .fail(job.id, "w1".into(), JobFailure::new("job_execution_failure", "blip", true))
        .await
        .unwrap();
    broker.sessions.job_detached(&"w1".into(), &job.id).await.unwrap();
    let job = broker.sessions.request_work(&"w1".into()).await.unwrap().unwrap();
    broker.registry.complete(job.id, "w1".into(), serde_json::json!({})).await.unwrap();

    let history = harness.history_for(submitted.job_id.as_str()).await;
    assert_eq!(
        history,
        vec!["job.submitted", "job.assigned", "job.failed", "job.assigned", "job.completed"]
    );
}

// Run-to-completion workflows settle once, with mixed outcomes.
#[tokio::test]
async fn run_to_completion_with_mixed_outcomes() {
    let mut harness = Harness::with_config(BrokerConfig {
        workflow_mode_default: WorkflowMode::RunToCompletion,
        ..BrokerConfig::default()
    });
    let broker = Arc::clone(&harness.broker);

    // Descending priorities make the claim order match the step order.
    let steps = vec![
        JobSpec {
            priority: 2,
            ..JobSpec::new("image-gen-sdxl", serde_json::json!({"step": 1}))
        },
        JobSpec {
            priority: 1,
            max_attempts: 1,
            ..JobSpec::new("image-gen-sdxl", serde_json::json!({"step": 2}))
        },
    ];
    let (workflow_id, _) = broker
        .ingress
        .submit_workflow("mixed".to_string(), steps, None, None)
        .await
        .unwrap();
    broker.sessions.register(gpu_worker("w1", 16_000, &[])).await.unwrap();

    let first = broker.sessions.request_work(&"w1".into()).await.unwrap().unwrap();
    broker.registry.complete(first.id, "w1".into(), serde_json::json!({})).await.unwrap();
    broker.sessions.job_detached(&"w1".into(), &first.id).await.unwrap();
    harness.settle().await;

    // Not yet terminal: one slot open.
    let workflow = harness.broker.ingress.get_workflow(&workflow_id).await.unwrap().unwrap();
    assert!(!workflow.status.is_terminal());

    let second = broker.sessions.request_work(&"w1".into()).await.unwrap().unwrap();
    broker
        .registry
        .fail(
            second.id,
            "w1".into(),
            JobFailure::new("job_execution_failure", "boom", true),
        )
        .await
        .unwrap();
    harness.settle().await;

    let workflow = harness.broker.ingress.get_workflow(&workflow_id).await.unwrap().unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Failed);
    assert_eq!(workflow.completed_count, 1);
    assert_eq!(workflow.failed_count, 1);

    let failed = harness.broker.bus.replay("workflow.failed", None, 10).await.unwrap();
    assert_eq!(failed.len(), 1);
}
