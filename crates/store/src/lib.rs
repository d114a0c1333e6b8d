// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! yard-store: the authoritative state store behind the broker.
//!
//! The [`Store`] trait is the only mutation path in the system. All
//! cross-key invariants live in named atomic scripts ([`ScriptCall`]);
//! application code never performs check-then-act over job state.
//!
//! Two backends: [`RedisStore`] for production (hashes, sorted sets,
//! streams, pub/sub, Lua scripts) and [`MemoryStore`] for tests and
//! embedded single-process deployments, with identical script semantics.

mod error;
pub mod keys;
mod lua;
mod memory;
mod redis_store;
mod script;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use script::{IdempotencyCheck, ScriptCall, ScriptReply};

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;
use yard_core::Fields;

/// One entry of a persistent event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Store-assigned id, `{millis}-{seq}`, monotone within the stream.
    pub id: String,
    /// The serialized event record.
    pub body: String,
}

/// Abstract store operations, each atomic with respect to the keys it
/// touches. Transient unavailability is an error; logical misses are
/// `None`/`false`/typed replies.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Liveness probe, used by status reporting and startup.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Replace an entire hash record.
    async fn hash_put(&self, key: &str, fields: &Fields) -> Result<(), StoreError>;

    async fn hash_get(&self, key: &str) -> Result<Option<HashMap<String, String>>, StoreError>;

    /// Merge fields into an existing hash (creates it when absent).
    async fn hash_update(&self, key: &str, fields: &Fields) -> Result<(), StoreError>;

    /// Optimistic concurrency: apply `update` only when every expected
    /// field currently holds the expected value. Returns whether it did.
    async fn hash_conditional_update(
        &self,
        key: &str,
        expected: &Fields,
        update: &Fields,
    ) -> Result<bool, StoreError>;

    async fn hash_delete(&self, key: &str) -> Result<(), StoreError>;

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;

    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Members in descending score order, ties broken by ascending member.
    async fn sorted_set_range_desc(
        &self,
        key: &str,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, StoreError>;

    async fn sorted_set_len(&self, key: &str) -> Result<u64, StoreError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Append to a stream; returns the assigned entry id.
    async fn stream_append(&self, stream: &str, body: &str) -> Result<String, StoreError>;

    /// Create the consumer group if it does not exist yet.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), StoreError>;

    /// Read new entries for a consumer group, blocking up to `block_ms`.
    async fn stream_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, StoreError>;

    async fn stream_ack(&self, stream: &str, group: &str, id: &str) -> Result<(), StoreError>;

    /// Entries strictly after `after_id` (from the beginning when `None`),
    /// oldest first, up to `count`.
    async fn stream_range_from(
        &self,
        stream: &str,
        after_id: Option<&str>,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StoreError>;

    /// Drop entries beyond `max_len` (oldest first) and entries whose
    /// timestamp is below `min_ms`.
    async fn stream_trim(&self, stream: &str, max_len: u64, min_ms: u64)
        -> Result<(), StoreError>;

    async fn stream_len(&self, stream: &str) -> Result<u64, StoreError>;

    /// Best-effort fan-out; no persistence, missed messages are gone.
    async fn pubsub_publish(&self, channel: &str, body: &str) -> Result<(), StoreError>;

    /// Subscribe to a channel; messages arrive on the returned receiver
    /// until it is dropped.
    async fn pubsub_subscribe(
        &self,
        channel: &str,
    ) -> Result<mpsc::UnboundedReceiver<String>, StoreError>;

    /// Execute a named atomic script.
    async fn script_call(&self, call: ScriptCall) -> Result<ScriptReply, StoreError>;
}
