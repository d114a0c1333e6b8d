// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn payload_parses_inline_json() {
    let value = parse_payload(r#"{"prompt": "cat"}"#).unwrap();
    assert_eq!(value["prompt"], "cat");
}

#[test]
fn payload_reads_file_reference() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payload.json");
    std::fs::write(&path, r#"{"n": 7}"#).unwrap();
    let value = parse_payload(&format!("@{}", path.display())).unwrap();
    assert_eq!(value["n"], 7);
}

#[test]
fn payload_rejects_garbage() {
    let err = parse_payload("not json").unwrap_err();
    assert!(matches!(err, CliError::Usage(_)));
}

#[test]
fn mode_parser_accepts_both_modes() {
    assert_eq!(parse_mode("abort_on_failure"), Ok(WorkflowMode::AbortOnFailure));
    assert_eq!(parse_mode("run_to_completion"), Ok(WorkflowMode::RunToCompletion));
    assert!(parse_mode("yolo").is_err());
}
