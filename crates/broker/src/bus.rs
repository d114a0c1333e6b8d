// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hybrid event bus.
//!
//! One `publish` drives three tiers: synchronous in-process fan-out,
//! best-effort pub/sub, and the persistent per-type stream. The latter
//! two happen in one atomic store operation (`publish_event`). In-process
//! handlers run before the durable append and may run again on a publish
//! retry, so they must be idempotent.
//!
//! Store scripts that emit records as part of a larger atomic step
//! (claim, complete, fail, ...) bypass `publish`, since their records are
//! already durable, and re-enter the bus through [`EventBus::deliver_local`].

use crate::error::{BrokerError, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use yard_core::{Clock, Event, EventId, EventIdGen, EventRecord};
use yard_store::{keys, ScriptCall, ScriptReply, Store};

/// Attempts for the durable half of a publish before the error surfaces.
const PUBLISH_ATTEMPTS: u32 = 3;

struct LocalSubscriber {
    /// `None` subscribes to every type.
    types: Option<HashSet<String>>,
    tx: mpsc::UnboundedSender<EventRecord>,
}

pub struct EventBus<S, C: Clock> {
    store: Arc<S>,
    clock: C,
    ids: EventIdGen,
    local: Mutex<Vec<LocalSubscriber>>,
}

impl<S: Store, C: Clock> EventBus<S, C> {
    pub fn new(store: Arc<S>, clock: C) -> Self {
        Self { store, clock, ids: EventIdGen::new(), local: Mutex::new(Vec::new()) }
    }

    pub fn next_event_id(&self) -> EventId {
        self.ids.next(self.clock.epoch_ms())
    }

    /// Register an in-process subscriber for the given event types
    /// (empty slice = all types). Delivery is synchronous with publish.
    pub fn subscribe_local(&self, types: &[&str]) -> mpsc::UnboundedReceiver<EventRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        let types = if types.is_empty() {
            None
        } else {
            Some(types.iter().map(|t| t.to_string()).collect())
        };
        self.local.lock().push(LocalSubscriber { types, tx });
        rx
    }

    /// Synchronous in-process fan-out; closed subscribers are pruned.
    pub fn deliver_local(&self, record: &EventRecord) {
        let mut subscribers = self.local.lock();
        subscribers.retain(|sub| {
            let wanted = match &sub.types {
                None => true,
                Some(types) => types.contains(record.type_name()),
            };
            if !wanted {
                return !sub.tx.is_closed();
            }
            sub.tx.send(record.clone()).is_ok()
        });
    }

    /// Fan out records that a store script already appended and published.
    pub fn deliver_all(&self, records: &[EventRecord]) {
        for record in records {
            self.deliver_local(record);
        }
    }

    /// Full publish contract: local fan-out, then stream append + pub/sub
    /// in one atomic store operation, retried on transient store faults.
    pub async fn publish(&self, event: Event) -> Result<EventRecord> {
        let now_ms = self.clock.epoch_ms();
        let record = EventRecord::new(self.ids.next(now_ms), now_ms, event);
        self.deliver_local(&record);

        let mut last_err = None;
        for attempt in 0..PUBLISH_ATTEMPTS {
            match self.store.script_call(ScriptCall::PublishEvent { record: record.clone() }).await
            {
                Ok(ScriptReply::Published { .. }) => return Ok(record),
                Ok(other) => {
                    return Err(BrokerError::Internal(format!(
                        "unexpected publish reply: {other:?}"
                    )))
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "event publish failed, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(50u64 << attempt)).await;
                }
            }
        }
        Err(last_err.map(BrokerError::from).unwrap_or_else(|| {
            BrokerError::Internal("publish failed with no error".to_string())
        }))
    }

    /// Live (pub/sub) subscription for one event type; lossy by design.
    pub async fn subscribe_live(
        &self,
        event_type: &str,
    ) -> Result<mpsc::UnboundedReceiver<EventRecord>> {
        let mut raw = self.store.pubsub_subscribe(&keys::channel(event_type)).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(body) = raw.recv().await {
                match EventRecord::from_stream_body(&body) {
                    Ok(record) => {
                        if tx.send(record).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "dropping malformed live event"),
                }
            }
        });
        Ok(rx)
    }

    /// Replay persisted history for one event type from a stream cursor
    /// (`None` = from the start). Returns `(stream_id, record)` pairs so
    /// the caller can continue from the last id.
    pub async fn replay(
        &self,
        event_type: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, EventRecord)>> {
        let entries =
            self.store.stream_range_from(&keys::stream(event_type), after, limit).await?;
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            match EventRecord::from_stream_body(&entry.body) {
                Ok(record) => out.push((entry.id, record)),
                Err(e) => tracing::warn!(error = %e, id = %entry.id, "skipping corrupt entry"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
