// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    unreachable = { CliError::Unreachable("gone".into()), 2 },
    usage = { CliError::usage("bad flag"), 3 },
    validation = { CliError::Broker { kind: ErrorKind::Validation, message: "no".into() }, 3 },
    not_found = { CliError::not_found("job job-x not found"), 4 },
    conflict = { CliError::Broker { kind: ErrorKind::Conflict, message: "done".into() }, 5 },
    worker = { CliError::Broker { kind: ErrorKind::WorkerProtocolViolation, message: "who".into() }, 6 },
    store = { CliError::Broker { kind: ErrorKind::StoreUnavailable, message: "down".into() }, 8 },
    unexpected = { CliError::Unexpected("Pong".into()), 9 },
)]
fn exit_codes_are_stable(err: CliError, code: i32) {
    assert_eq!(process_exit_code(&err), code);
}

#[test]
fn broker_errors_render_with_their_kind() {
    let err = CliError::Broker { kind: ErrorKind::Conflict, message: "job is completed".into() };
    assert_eq!(err.to_string(), "conflict: job is completed");
}
