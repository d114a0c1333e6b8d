// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for broker tests: a full broker over the in-memory
//! store with a controllable clock.

use crate::broker::Broker;
use std::sync::Arc;
use yard_core::{BrokerConfig, CapabilityDescriptor, FakeClock, JobSpec};
use yard_store::MemoryStore;

pub(crate) type TestBroker = Broker<MemoryStore<FakeClock>, FakeClock>;

pub(crate) fn test_broker() -> (Arc<TestBroker>, FakeClock) {
    test_broker_with(BrokerConfig::default())
}

pub(crate) fn test_broker_with(cfg: BrokerConfig) -> (Arc<TestBroker>, FakeClock) {
    let clock = FakeClock::new();
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let broker = Broker::new(store, clock.clone(), cfg);
    (broker, clock)
}

pub(crate) fn spec(service: &str) -> JobSpec {
    JobSpec::new(service, serde_json::json!({"input": true}))
}

pub(crate) fn worker(id: &str) -> CapabilityDescriptor {
    CapabilityDescriptor::builder().worker_id(id).build()
}
