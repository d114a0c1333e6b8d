// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::test_broker;
use yard_core::WorkerId;

fn lost(worker: &str) -> Event {
    Event::WorkerLost { worker_id: WorkerId::new(worker), last_heartbeat_at_ms: 0 }
}

#[tokio::test]
async fn publish_reaches_all_three_tiers() {
    let (broker, _clock) = test_broker();
    let mut local = broker.bus.subscribe_local(&["worker.lost"]);
    let mut live = broker.bus.subscribe_live("worker.lost").await.unwrap();

    let record = broker.bus.publish(lost("w1")).await.unwrap();

    // Local tier: synchronous with publish.
    assert_eq!(local.try_recv().unwrap().id, record.id);
    // Live tier.
    assert_eq!(live.recv().await.unwrap().id, record.id);
    // Durable tier.
    let history = broker.bus.replay("worker.lost", None, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].1.id, record.id);
}

#[tokio::test]
async fn local_subscription_filters_by_type() {
    let (broker, _clock) = test_broker();
    let mut lost_only = broker.bus.subscribe_local(&["worker.lost"]);
    let mut all = broker.bus.subscribe_local(&[]);

    broker
        .bus
        .publish(Event::WorkerHeartbeat { worker_id: WorkerId::new("w1"), at_ms: 1 })
        .await
        .unwrap();
    broker.bus.publish(lost("w1")).await.unwrap();

    assert_eq!(lost_only.try_recv().unwrap().type_name(), "worker.lost");
    assert!(lost_only.try_recv().is_err());

    assert_eq!(all.try_recv().unwrap().type_name(), "worker.heartbeat");
    assert_eq!(all.try_recv().unwrap().type_name(), "worker.lost");
}

#[tokio::test]
async fn event_ids_increase_within_a_stream() {
    let (broker, clock) = test_broker();
    let a = broker.bus.publish(lost("w1")).await.unwrap();
    clock.advance(std::time::Duration::from_millis(5));
    let b = broker.bus.publish(lost("w2")).await.unwrap();
    let c = broker.bus.publish(lost("w3")).await.unwrap();

    assert!(a.id.as_str() < b.id.as_str());
    assert!(b.id.as_str() < c.id.as_str());

    let history = broker.bus.replay("worker.lost", None, 10).await.unwrap();
    let ids: Vec<&str> = history.iter().map(|(_, r)| r.id.as_str()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[tokio::test]
async fn replay_resumes_after_cursor() {
    let (broker, _clock) = test_broker();
    broker.bus.publish(lost("w1")).await.unwrap();
    broker.bus.publish(lost("w2")).await.unwrap();

    let all = broker.bus.replay("worker.lost", None, 10).await.unwrap();
    assert_eq!(all.len(), 2);

    let rest = broker.bus.replay("worker.lost", Some(&all[0].0), 10).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].1.id, all[1].1.id);
}

#[tokio::test]
async fn dropped_local_subscribers_are_pruned() {
    let (broker, _clock) = test_broker();
    let rx = broker.bus.subscribe_local(&[]);
    drop(rx);
    // Publishing after the drop neither fails nor leaks.
    broker.bus.publish(lost("w1")).await.unwrap();
    broker.bus.publish(lost("w2")).await.unwrap();
}
