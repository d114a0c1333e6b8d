// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{spec, test_broker, worker, TestBroker};
use std::sync::Arc;
use std::time::Duration;
use yard_core::FakeClock;
use yard_store::MemoryStore;

fn janitor(broker: &Arc<TestBroker>, clock: &FakeClock) -> Janitor<MemoryStore<FakeClock>, FakeClock> {
    Janitor::new(
        Arc::clone(&broker.store),
        clock.clone(),
        Arc::clone(&broker.cfg),
        Arc::clone(&broker.bus),
        Arc::clone(&broker.sessions),
    )
}

#[tokio::test]
async fn expired_lease_is_requeued_with_attestation() {
    let (broker, clock) = test_broker();
    let jan = janitor(&broker, &clock);

    broker.registry.submit(spec("image-gen-sdxl")).await.unwrap();
    broker.sessions.register(worker("w1")).await.unwrap();
    let job = broker.sessions.request_work(&"w1".into()).await.unwrap().unwrap();

    // Lease is 300s, grace 5s. Just inside the window: nothing happens.
    clock.advance(Duration::from_secs(305));
    assert_eq!(jan.tick().await.unwrap().leases_reclaimed, 0);

    // One millisecond past expires_at + grace: reclaimed.
    clock.advance(Duration::from_millis(1));
    let report = jan.tick().await.unwrap();
    assert_eq!(report.leases_reclaimed, 1);

    let stored = broker.registry.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, yard_core::JobStatus::Pending);

    // The failure is attested on the worker and the event carries retry.
    let record = broker.sessions.load(&"w1".into()).await.unwrap().unwrap();
    assert_eq!(record.recent_failures.len(), 1);
    assert_eq!(record.recent_failures[0].kind, "lease_expired");

    let failed = broker.bus.replay("job.failed", None, 10).await.unwrap();
    assert_eq!(failed.len(), 1);
    match &failed[0].1.event {
        yard_core::Event::JobFailed { will_retry, error, .. } => {
            assert!(will_retry);
            assert_eq!(error.kind, "lease_expired");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn exhausted_lease_expiry_fails_terminally() {
    let (broker, clock) = test_broker();
    let jan = janitor(&broker, &clock);

    let mut one_shot = spec("image-gen-sdxl");
    one_shot.max_attempts = 1;
    broker.registry.submit(one_shot).await.unwrap();
    broker.sessions.register(worker("w1")).await.unwrap();
    let job = broker.sessions.request_work(&"w1".into()).await.unwrap().unwrap();

    clock.advance(Duration::from_secs(306));
    jan.tick().await.unwrap();

    let stored = broker.registry.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, yard_core::JobStatus::Failed);
    let failure = stored.failure.unwrap();
    assert_eq!(failure.kind, "lease_expired");
    assert!(!failure.retryable);
}

#[tokio::test]
async fn silent_worker_is_declared_dead() {
    let (broker, clock) = test_broker();
    let jan = janitor(&broker, &clock);
    broker.sessions.register(worker("w1")).await.unwrap();

    // Within the threshold: alive.
    clock.advance(Duration::from_secs(59));
    assert_eq!(jan.tick().await.unwrap().workers_lost, 0);

    clock.advance(Duration::from_secs(2));
    let report = jan.tick().await.unwrap();
    assert_eq!(report.workers_lost, 1);

    let record = broker.sessions.load(&"w1".into()).await.unwrap().unwrap();
    assert_eq!(record.state, yard_core::WorkerState::Dead);

    let lost = broker.bus.replay("worker.lost", None, 10).await.unwrap();
    assert_eq!(lost.len(), 1);

    // A second tick does not re-announce the loss.
    assert_eq!(jan.tick().await.unwrap().workers_lost, 0);
}

#[tokio::test]
async fn heartbeat_keeps_worker_alive() {
    let (broker, clock) = test_broker();
    let jan = janitor(&broker, &clock);
    broker.sessions.register(worker("w1")).await.unwrap();

    for _ in 0..5 {
        clock.advance(Duration::from_secs(30));
        broker.sessions.heartbeat(&"w1".into(), false, vec![]).await.unwrap();
    }
    assert_eq!(jan.tick().await.unwrap().workers_lost, 0);
}

#[tokio::test]
async fn aging_rescales_starved_pending_jobs() {
    let (broker, clock) = test_broker();
    let jan = janitor(&broker, &clock);
    broker.registry.submit(spec("image-gen-sdxl")).await.unwrap();

    clock.advance(Duration::from_secs(120));
    let report = jan.tick().await.unwrap();
    assert_eq!(report.jobs_aged, 1);
}

#[tokio::test]
async fn unacked_cancel_intent_expires_after_grace() {
    let (broker, clock) = test_broker();
    let jan = janitor(&broker, &clock);

    broker.registry.submit(spec("image-gen-sdxl")).await.unwrap();
    broker.sessions.register(worker("w1")).await.unwrap();
    let job = broker.sessions.request_work(&"w1".into()).await.unwrap().unwrap();
    broker.ingress.cancel_job(job.id).await.unwrap();

    // Intent still visible within the grace window.
    clock.advance(Duration::from_secs(10));
    jan.tick().await.unwrap();
    let record = broker.sessions.load(&"w1".into()).await.unwrap().unwrap();
    assert!(record.cancel_pending.contains(&job.id));

    // Past cancel_grace_sec (30s): the janitor force-cleans the session.
    clock.advance(Duration::from_secs(25));
    let report = jan.tick().await.unwrap();
    assert_eq!(report.intents_expired, 1);
    let record = broker.sessions.load(&"w1".into()).await.unwrap().unwrap();
    assert!(record.cancel_pending.is_empty());
    assert!(record.active_jobs.is_empty());
}

#[tokio::test]
async fn terminal_jobs_are_pruned_after_retention() {
    let (broker, clock) = test_broker();
    let jan = janitor(&broker, &clock);

    broker.registry.submit(spec("image-gen-sdxl")).await.unwrap();
    broker.sessions.register(worker("w1")).await.unwrap();
    let job = broker.sessions.request_work(&"w1".into()).await.unwrap().unwrap();
    broker.registry.complete(job.id, "w1".into(), serde_json::json!({})).await.unwrap();

    clock.advance(Duration::from_secs(71 * 3600));
    assert_eq!(jan.tick().await.unwrap().terminals_pruned, 0);

    clock.advance(Duration::from_secs(2 * 3600));
    assert_eq!(jan.tick().await.unwrap().terminals_pruned, 1);
    assert!(broker.registry.get_job(&job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn stream_retention_is_enforced() {
    let cfg = yard_core::BrokerConfig {
        stream_retention_count: 3,
        ..yard_core::BrokerConfig::default()
    };
    let (broker, clock) = crate::test_helpers::test_broker_with(cfg);
    let jan = janitor(&broker, &clock);

    for i in 0..6 {
        broker
            .registry
            .submit(spec("image-gen-sdxl").correlation_id(format!("c{i}")))
            .await
            .unwrap();
    }
    jan.tick().await.unwrap();

    let history = broker.bus.replay("job.submitted", None, 100).await.unwrap();
    assert_eq!(history.len(), 3);
}
