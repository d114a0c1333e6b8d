// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn jobs_query_defaults_limit() {
    let back: Query = serde_json::from_str(r#"{"type":"Jobs"}"#).unwrap();
    assert_eq!(back, Query::Jobs { status: None, service_type: None, limit: 100 });
}

#[test]
fn jobs_query_filters_roundtrip() {
    let query = Query::Jobs {
        status: Some(JobStatus::Pending),
        service_type: Some("llm-chat".to_string()),
        limit: 10,
    };
    let json = serde_json::to_string(&query).unwrap();
    let back: Query = serde_json::from_str(&json).unwrap();
    assert_eq!(back, query);
}
