// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Flat field-map encoding for store hashes.
//!
//! Jobs, workflows, and workers persist as string-keyed hashes so that
//! server-side scripts can read and write individual fields. Structured
//! fields are JSON-encoded strings; absent optional fields are omitted
//! entirely rather than stored as empty strings.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// A flat field map, the unit of hash storage.
pub type Fields = Vec<(String, String)>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing field '{0}'")]
    Missing(&'static str),

    #[error("field '{field}' is not a valid {expected}: {value:?}")]
    Invalid { field: &'static str, expected: &'static str, value: String },
}

/// Require a string field.
pub fn get_str(map: &HashMap<String, String>, field: &'static str) -> Result<String, RecordError> {
    map.get(field).cloned().ok_or(RecordError::Missing(field))
}

/// Optional string field; empty-string values count as absent.
pub fn get_opt_str(map: &HashMap<String, String>, field: &'static str) -> Option<String> {
    map.get(field).filter(|v| !v.is_empty()).cloned()
}

/// Require an integer field.
pub fn get_u64(map: &HashMap<String, String>, field: &'static str) -> Result<u64, RecordError> {
    let raw = get_str(map, field)?;
    raw.parse().map_err(|_| RecordError::Invalid { field, expected: "integer", value: raw })
}

pub fn get_u32(map: &HashMap<String, String>, field: &'static str) -> Result<u32, RecordError> {
    let raw = get_str(map, field)?;
    raw.parse().map_err(|_| RecordError::Invalid { field, expected: "integer", value: raw })
}

pub fn get_i64(map: &HashMap<String, String>, field: &'static str) -> Result<i64, RecordError> {
    let raw = get_str(map, field)?;
    raw.parse().map_err(|_| RecordError::Invalid { field, expected: "integer", value: raw })
}

pub fn get_f64(map: &HashMap<String, String>, field: &'static str) -> Result<f64, RecordError> {
    let raw = get_str(map, field)?;
    raw.parse().map_err(|_| RecordError::Invalid { field, expected: "number", value: raw })
}

/// Require a JSON-encoded field.
pub fn get_json<T: DeserializeOwned>(
    map: &HashMap<String, String>,
    field: &'static str,
) -> Result<T, RecordError> {
    let raw = get_str(map, field)?;
    serde_json::from_str(&raw)
        .map_err(|_| RecordError::Invalid { field, expected: "json", value: raw })
}

/// Optional JSON-encoded field; absent or empty means `None`.
pub fn get_opt_json<T: DeserializeOwned>(
    map: &HashMap<String, String>,
    field: &'static str,
) -> Result<Option<T>, RecordError> {
    match map.get(field) {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|_| RecordError::Invalid { field, expected: "json", value: raw.clone() }),
    }
}

/// Push a field unconditionally.
pub fn put(fields: &mut Fields, field: &'static str, value: impl Into<String>) {
    fields.push((field.to_string(), value.into()));
}

/// Push a JSON-encoded field.
pub fn put_json(fields: &mut Fields, field: &'static str, value: &impl Serialize) {
    // Serialization of our own record types cannot fail.
    let raw = serde_json::to_string(value).unwrap_or_default();
    fields.push((field.to_string(), raw));
}

/// Push an optional JSON-encoded field only when present.
pub fn put_opt_json(fields: &mut Fields, field: &'static str, value: &Option<impl Serialize>) {
    if let Some(v) = value {
        put_json(fields, field, v);
    }
}

/// Push an optional string field only when present.
pub fn put_opt(fields: &mut Fields, field: &'static str, value: &Option<String>) {
    if let Some(v) = value {
        fields.push((field.to_string(), v.clone()));
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
