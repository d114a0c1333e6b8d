// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Webhook endpoint registrations.

use crate::record::{self, Fields, RecordError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

crate::define_id! {
    /// Unique identifier for a registered webhook endpoint.
    pub struct WebhookId("whk-");
}

/// A registered webhook endpoint.
///
/// Delivery itself is out of scope here; this record is what the
/// delivery engine resolves an endpoint reference against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: WebhookId,
    pub url: String,
    /// Event type names this endpoint wants, e.g. "job.completed".
    pub event_types: BTreeSet<String>,
    pub secret: String,
    pub active: bool,
    pub created_at_ms: u64,
}

impl Webhook {
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        record::put(&mut fields, "id", self.id.as_str());
        record::put(&mut fields, "url", self.url.clone());
        record::put_json(&mut fields, "event_types", &self.event_types);
        record::put(&mut fields, "secret", self.secret.clone());
        record::put(&mut fields, "active", if self.active { "1" } else { "0" });
        record::put(&mut fields, "created_at_ms", self.created_at_ms.to_string());
        fields
    }

    pub fn from_fields(map: &HashMap<String, String>) -> Result<Self, RecordError> {
        Ok(Self {
            id: WebhookId::from_string(record::get_str(map, "id")?),
            url: record::get_str(map, "url")?,
            event_types: record::get_json(map, "event_types")?,
            secret: record::get_str(map, "secret")?,
            active: record::get_str(map, "active")? == "1",
            created_at_ms: record::get_u64(map, "created_at_ms")?,
        })
    }
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;
