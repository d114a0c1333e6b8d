// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker protocol: ingress API and worker protocol over one socket.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod codec;
mod error;
mod query;
mod request;
mod response;
mod views;

pub use codec::{
    decode, encode, read_message, read_request, read_response, write_message, write_request,
    write_response, ProtocolError, MAX_FRAME_LEN,
};
pub use error::ErrorKind;
pub use query::Query;
pub use request::Request;
pub use response::Response;
pub use views::{
    BrokerStatus, JobSummary, JobView, WebhookView, WorkAssignment, WorkerView, WorkflowView,
};

/// Protocol version carried in the Hello handshake.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod property_tests;
