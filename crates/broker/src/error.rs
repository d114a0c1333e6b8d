// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker error types and their protocol mapping.

use thiserror::Error;
use yard_store::StoreError;
use yard_wire::ErrorKind;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Surfaced only after internal retries are exhausted.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("worker protocol violation: {0}")]
    WorkerProtocol(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::Validation(_) => ErrorKind::Validation,
            BrokerError::Conflict(_) => ErrorKind::Conflict,
            BrokerError::NotFound(_) => ErrorKind::NotFound,
            BrokerError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            BrokerError::WorkerProtocol(_) => ErrorKind::WorkerProtocolViolation,
            BrokerError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BrokerError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        BrokerError::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        BrokerError::NotFound(message.into())
    }

    pub fn worker_protocol(message: impl Into<String>) -> Self {
        BrokerError::WorkerProtocol(message.into())
    }
}

impl From<StoreError> for BrokerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(m) => BrokerError::StoreUnavailable(m),
            other => BrokerError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
