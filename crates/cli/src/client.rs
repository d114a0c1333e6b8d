// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker client: one request/response exchange over the daemon socket,
//! and the client-side failure domain.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UnixStream;
use yard_wire::{read_response, write_request, ErrorKind, Request, Response};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a command can fail with. `main()` derives the process
/// exit code from the variant (and, for broker errors, the protocol
/// error kind) rather than commands picking codes ad hoc.
#[derive(Debug)]
pub enum CliError {
    /// Bad local input (arguments, payload files); no request was made.
    Usage(String),
    /// The broker socket is unreachable or the exchange broke down.
    Unreachable(String),
    /// The broker answered with a typed protocol error.
    Broker { kind: ErrorKind, message: String },
    /// The broker answered with a response this command cannot use.
    Unexpected(String),
}

impl CliError {
    pub fn usage(message: impl Into<String>) -> Self {
        CliError::Usage(message.into())
    }

    /// An entity lookup that came back empty.
    pub fn not_found(message: impl Into<String>) -> Self {
        CliError::Broker { kind: ErrorKind::NotFound, message: message.into() }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Usage(message) => write!(f, "{message}"),
            CliError::Unreachable(message) => write!(f, "{message}"),
            CliError::Broker { kind, message } => write!(f, "{kind}: {message}"),
            CliError::Unexpected(message) => write!(f, "unexpected response: {message}"),
        }
    }
}

impl std::error::Error for CliError {}

/// Resolve the daemon socket path the same way `yardd` does.
pub fn socket_path() -> Result<PathBuf, CliError> {
    let state_dir = match std::env::var_os("YARD_STATE_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::state_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".local/state")))
            .ok_or_else(|| CliError::Unreachable("cannot determine state directory".to_string()))?
            .join("yard"),
    };
    Ok(state_dir.join("yardd.sock"))
}

/// Send one request and read one response.
pub async fn send(request: Request) -> Result<Response, CliError> {
    let path = socket_path()?;
    let stream = UnixStream::connect(&path).await.map_err(|e| {
        CliError::Unreachable(format!(
            "cannot connect to broker at {}: {e} (is yardd running?)",
            path.display()
        ))
    })?;
    let (mut reader, mut writer) = stream.into_split();
    write_request(&mut writer, &request, REQUEST_TIMEOUT)
        .await
        .map_err(|e| CliError::Unreachable(format!("protocol error: {e}")))?;
    read_response(&mut reader, REQUEST_TIMEOUT)
        .await
        .map_err(|e| CliError::Unreachable(format!("protocol error: {e}")))
}

/// Send a request, lifting a broker `Error` response into [`CliError`].
pub async fn send_expecting_ok(request: Request) -> Result<Response, CliError> {
    let response = send(request).await?;
    if let Response::Error { kind, message } = response {
        return Err(CliError::Broker { kind, message });
    }
    Ok(response)
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
