// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn acquire_locks_and_binds() {
    let dir = tempfile::tempdir().unwrap();
    let paths = DaemonPaths::at(dir.path().join("state"));

    let (lock, _listener) = acquire(&paths).unwrap();
    assert!(paths.lock_path.exists());
    assert!(paths.socket_path.exists());
    assert!(paths.version_path.exists());

    // A second broker against the same state dir fails fast.
    let err = acquire(&paths).unwrap_err();
    assert!(matches!(err, LifecycleError::LockFailed(_)));

    drop(lock);
    cleanup(&paths);
    assert!(!paths.socket_path.exists());
}

#[tokio::test]
#[serial]
async fn stale_socket_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let paths = DaemonPaths::at(dir.path().join("state"));
    std::fs::create_dir_all(&paths.state_dir).unwrap();
    std::fs::write(&paths.socket_path, b"stale").unwrap();

    let (_lock, _listener) = acquire(&paths).unwrap();
    // The stale file was replaced by a live socket.
    let metadata = std::fs::symlink_metadata(&paths.socket_path).unwrap();
    assert!(!metadata.is_file());
}

#[test]
#[serial]
fn state_dir_env_override() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("YARD_STATE_DIR", dir.path());
    let paths = DaemonPaths::load().unwrap();
    std::env::remove_var("YARD_STATE_DIR");
    assert_eq!(paths.state_dir, dir.path());
    assert_eq!(paths.socket_path, dir.path().join("yardd.sock"));
}
