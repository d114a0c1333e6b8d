// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn endpoint() -> Webhook {
    Webhook {
        id: WebhookId::from_string("whk-1"),
        url: "https://example.com/hook".to_string(),
        event_types: ["job.completed".to_string(), "job.failed".to_string()].into(),
        secret: "s3cret".to_string(),
        active: true,
        created_at_ms: 1_000,
    }
}

#[test]
fn fields_roundtrip() {
    let hook = endpoint();
    let map: HashMap<String, String> = hook.to_fields().into_iter().collect();
    assert_eq!(Webhook::from_fields(&map).unwrap(), hook);
}

#[test]
fn inactive_flag_survives_roundtrip() {
    let mut hook = endpoint();
    hook.active = false;
    let map: HashMap<String, String> = hook.to_fields().into_iter().collect();
    assert!(!Webhook::from_fields(&map).unwrap().active);
}
