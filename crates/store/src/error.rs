// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store error types.
//!
//! Transport faults are [`StoreError::Unavailable`] so callers can retry;
//! logical outcomes ("no eligible job", "conflict") are never errors; they
//! are typed replies from the scripts.

use thiserror::Error;
use yard_core::RecordError;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient infrastructure fault; the operation may be retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored record failed to decode; indicates corruption or a
    /// version mismatch, not a transient fault.
    #[error("corrupt record at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: RecordError,
    },

    /// A script returned a reply the caller cannot interpret.
    #[error("malformed script reply for {script}: {detail}")]
    MalformedReply { script: &'static str, detail: String },
}

impl StoreError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable(err.to_string())
    }

    pub fn corrupt(key: impl Into<String>, source: RecordError) -> Self {
        StoreError::Corrupt { key: key.into(), source }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}
