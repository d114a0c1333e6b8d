// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: paths, pid lock, socket bind, shutdown.

use fs2::FileExt;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("another broker already holds the lock: {0}")]
    LockFailed(std::io::Error),

    #[error("cannot bind {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("no usable state directory")]
    NoStateDir,
}

/// Daemon file layout and endpoints.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    /// Root state directory (e.g. ~/.local/state/yard)
    pub state_dir: PathBuf,
    /// Path to Unix socket
    pub socket_path: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to version file
    pub version_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
}

impl DaemonPaths {
    /// Fixed paths under `$XDG_STATE_HOME/yard` (or `~/.local/state/yard`),
    /// overridable with `YARD_STATE_DIR`.
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = match std::env::var_os("YARD_STATE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::state_dir()
                .or_else(|| dirs::home_dir().map(|home| home.join(".local/state")))
                .ok_or(LifecycleError::NoStateDir)?
                .join("yard"),
        };
        Ok(Self::at(state_dir))
    }

    pub fn at(state_dir: PathBuf) -> Self {
        Self {
            socket_path: state_dir.join("yardd.sock"),
            lock_path: state_dir.join("yardd.pid"),
            version_path: state_dir.join("yardd.version"),
            log_path: state_dir.join("yardd.log"),
            state_dir,
        }
    }
}

/// Held for the daemon's lifetime; dropping releases the advisory lock.
#[derive(Debug)]
pub struct PidLock {
    _file: std::fs::File,
}

/// Acquire the pid lock, write our pid, and bind the Unix socket.
/// Lock first: a stale socket from a crashed broker is removed, but a
/// live broker's lock makes startup fail fast.
pub fn acquire(paths: &DaemonPaths) -> Result<(PidLock, UnixListener), LifecycleError> {
    std::fs::create_dir_all(&paths.state_dir)?;

    // Open without truncating so a failed lock doesn't wipe the running
    // broker's pid.
    let mut lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&paths.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    std::fs::write(&paths.version_path, env!("CARGO_PKG_VERSION"))?;

    if paths.socket_path.exists() {
        std::fs::remove_file(&paths.socket_path)?;
    }
    let listener = UnixListener::bind(&paths.socket_path)
        .map_err(|e| LifecycleError::BindFailed(paths.socket_path.clone(), e))?;

    Ok((PidLock { _file: lock_file }, listener))
}

/// Bind the optional TCP listener.
pub async fn bind_tcp(addr: &str) -> Result<TcpListener, LifecycleError> {
    Ok(TcpListener::bind(addr).await?)
}

/// Remove the socket and pid file on clean shutdown.
pub fn cleanup(paths: &DaemonPaths) {
    let _ = std::fs::remove_file(&paths.socket_path);
    let _ = std::fs::remove_file(&paths.lock_path);
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
