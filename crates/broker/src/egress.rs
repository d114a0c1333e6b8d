// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Egress subscriber surface.
//!
//! Durable consumers read the persistent per-type streams through
//! consumer groups: each logical consumer (webhook delivery, monitor
//! push, external sync) owns an independent cursor, acknowledges what it
//! has handled, and can replay history after a restart. Delivery is
//! at-least-once; the stable event id is the dedupe key. A consumer that
//! keeps draining full batches raises a lag alert; the stream is never
//! trimmed for being behind.

use crate::error::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use yard_core::EventRecord;
use yard_store::{keys, Store, StreamEntry};

/// How a handler disposed of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled; acknowledge and advance the cursor.
    Ack,
    /// Not handled; leave pending for redelivery.
    Retry,
}

/// One delivered event with its stream cursor position.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub event_type: String,
    pub stream_id: String,
    pub record: EventRecord,
}

/// A durable, named subscription over a set of event types.
pub struct DurableConsumer<S> {
    store: Arc<S>,
    consumer: String,
    event_types: Vec<String>,
    batch: usize,
    lag_alert_batches: u32,
}

impl<S: Store> DurableConsumer<S> {
    pub fn new(store: Arc<S>, consumer: impl Into<String>, event_types: Vec<String>) -> Self {
        Self {
            store,
            consumer: consumer.into(),
            event_types,
            batch: 64,
            lag_alert_batches: 10,
        }
    }

    pub fn with_lag_alert_batches(mut self, batches: u32) -> Self {
        self.lag_alert_batches = batches;
        self
    }

    /// Create the consumer groups; idempotent.
    pub async fn ensure_groups(&self) -> Result<()> {
        for event_type in &self.event_types {
            self.store.ensure_group(&keys::stream(event_type), &self.consumer).await?;
        }
        Ok(())
    }

    /// Pull the next batch of deliveries across all subscribed types.
    /// Blocks up to `block_ms` when nothing is immediately available.
    pub async fn next_batch(&self, block_ms: u64) -> Result<Vec<Delivery>> {
        let mut deliveries = Vec::new();
        for event_type in &self.event_types {
            let entries = self
                .store
                .stream_read_group(
                    &keys::stream(event_type),
                    &self.consumer,
                    "consumer-0",
                    self.batch,
                    if deliveries.is_empty() { block_ms } else { 0 },
                )
                .await?;
            deliveries.extend(decode_entries(event_type, entries));
        }
        Ok(deliveries)
    }

    /// Acknowledge one delivery.
    pub async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.store
            .stream_ack(&keys::stream(&delivery.event_type), &self.consumer, &delivery.stream_id)
            .await?;
        Ok(())
    }

    /// Replay persisted history from a stream id (`None` = from the
    /// start), oldest first. The caller dedupes by event id when mixing
    /// replay with live delivery.
    pub async fn replay(
        &self,
        event_type: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Delivery>> {
        let entries =
            self.store.stream_range_from(&keys::stream(event_type), after, limit).await?;
        Ok(decode_entries(event_type, entries))
    }

    /// Run the consumer loop until cancellation, handing each delivery to
    /// `handler` and acknowledging on [`Disposition::Ack`].
    pub async fn run<F, Fut>(&self, cancel: CancellationToken, mut handler: F) -> Result<()>
    where
        F: FnMut(Delivery) -> Fut,
        Fut: std::future::Future<Output = Disposition>,
    {
        self.ensure_groups().await?;
        let mut full_batches = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let batch = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                batch = self.next_batch(1_000) => batch?,
            };
            // Back-pressure alert: continuously full batches mean the
            // consumer is falling behind. Alert, never drop.
            if batch.len() >= self.batch {
                full_batches += 1;
                if full_batches >= self.lag_alert_batches {
                    tracing::warn!(
                        consumer = %self.consumer,
                        batches = full_batches,
                        "durable consumer is lagging"
                    );
                    full_batches = 0;
                }
            } else {
                full_batches = 0;
            }
            for delivery in batch {
                match handler(delivery.clone()).await {
                    Disposition::Ack => self.ack(&delivery).await?,
                    Disposition::Retry => {}
                }
            }
        }
    }
}

fn decode_entries(event_type: &str, entries: Vec<StreamEntry>) -> Vec<Delivery> {
    entries
        .into_iter()
        .filter_map(|entry| match EventRecord::from_stream_body(&entry.body) {
            Ok(record) => Some(Delivery {
                event_type: event_type.to_string(),
                stream_id: entry.id,
                record,
            }),
            Err(e) => {
                tracing::warn!(stream = event_type, id = %entry.id, error = %e, "corrupt entry");
                None
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "egress_tests.rs"]
mod tests;
