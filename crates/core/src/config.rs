// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker configuration knobs.

use crate::score::ScoreParams;
use crate::workflow::WorkflowMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// All tunable broker behavior, with the defaults the system is designed
/// around. Loaded from a toml file; every field is optional there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// How long a claim is exclusive before the janitor may reclaim it.
    pub lease_duration_sec: u64,
    pub heartbeat_interval_sec: u64,
    /// Heartbeat silence after which a worker is declared dead.
    pub worker_dead_after_sec: u64,
    pub janitor_period_sec: u64,
    /// Reclaim slack past lease expiry; `expires_at == now` is not expired.
    pub lease_grace_sec: u64,
    /// Candidate cap per match-kernel scan.
    pub match_scan_cap: u32,
    pub aging_boost_per_minute: u32,
    pub aging_boost_cap: u32,
    pub retry_backoff_base_sec: u64,
    pub retry_backoff_max_sec: u64,
    /// Window in which a repeated correlation id returns the same job.
    pub idempotency_ttl_sec: u64,
    pub stream_retention_count: u64,
    pub stream_retention_sec: u64,
    pub workflow_mode_default: WorkflowMode,
    pub max_concurrent_jobs_per_worker_default: u32,
    /// How long a cancelled running job may linger before the janitor
    /// treats its lease as expired.
    pub cancel_grace_sec: u64,
    /// Terminal jobs are garbage-collected after this window.
    pub terminal_retention_sec: u64,
    /// Webhook cache refresh period.
    pub webhook_refresh_sec: u64,
    /// Durable consumer batches at this size this many times in a row
    /// trigger a lag alert.
    pub consumer_lag_alert_batches: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            lease_duration_sec: 300,
            heartbeat_interval_sec: 15,
            worker_dead_after_sec: 60,
            janitor_period_sec: 10,
            lease_grace_sec: 5,
            match_scan_cap: 100,
            aging_boost_per_minute: 1,
            aging_boost_cap: 60,
            retry_backoff_base_sec: 5,
            retry_backoff_max_sec: 300,
            idempotency_ttl_sec: 86_400,
            stream_retention_count: 10_000,
            stream_retention_sec: 7 * 24 * 3600,
            workflow_mode_default: WorkflowMode::RunToCompletion,
            max_concurrent_jobs_per_worker_default: 1,
            cancel_grace_sec: 30,
            terminal_retention_sec: 72 * 3600,
            webhook_refresh_sec: 60,
            consumer_lag_alert_batches: 10,
        }
    }
}

impl BrokerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn score_params(&self) -> ScoreParams {
        ScoreParams {
            backoff_base_sec: self.retry_backoff_base_sec,
            backoff_max_sec: self.retry_backoff_max_sec,
            aging_boost_per_minute: self.aging_boost_per_minute,
            aging_boost_cap: self.aging_boost_cap,
        }
    }

    pub fn lease_duration_ms(&self) -> u64 {
        self.lease_duration_sec * 1000
    }

    pub fn lease_grace_ms(&self) -> u64 {
        self.lease_grace_sec * 1000
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
