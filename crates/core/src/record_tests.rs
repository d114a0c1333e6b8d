// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::HashMap;

fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn get_str_missing_field() {
    let m = map(&[]);
    assert_eq!(get_str(&m, "id"), Err(RecordError::Missing("id")));
}

#[test]
fn get_opt_str_treats_empty_as_absent() {
    let m = map(&[("a", ""), ("b", "x")]);
    assert_eq!(get_opt_str(&m, "a"), None);
    assert_eq!(get_opt_str(&m, "b"), Some("x".to_string()));
}

#[test]
fn get_u64_rejects_garbage() {
    let m = map(&[("n", "abc")]);
    assert!(matches!(get_u64(&m, "n"), Err(RecordError::Invalid { field: "n", .. })));
}

#[test]
fn json_roundtrip() {
    let mut fields = Fields::new();
    put_json(&mut fields, "v", &vec![1u32, 2, 3]);
    let m: HashMap<String, String> = fields.into_iter().collect();
    let back: Vec<u32> = get_json(&m, "v").unwrap();
    assert_eq!(back, vec![1, 2, 3]);
}

#[test]
fn opt_json_absent_is_none() {
    let m = map(&[]);
    let v: Option<Vec<u32>> = get_opt_json(&m, "v").unwrap();
    assert!(v.is_none());
}

#[test]
fn put_opt_skips_none() {
    let mut fields = Fields::new();
    put_opt(&mut fields, "a", &None);
    put_opt(&mut fields, "b", &Some("x".to_string()));
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].0, "b");
}
