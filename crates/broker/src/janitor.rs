// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The janitor: the only component that requeues jobs it did not submit.
//!
//! Each tick sweeps expired leases, dead workers, overdue cancellation
//! intents, pending-index aging, stream retention, and terminal-job
//! garbage collection.

use crate::bus::EventBus;
use crate::error::Result;
use crate::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use yard_core::{BrokerConfig, Clock, Event, FailureAttestation, Job, JobId, WorkerState};
use yard_store::{keys, ScriptCall, ScriptReply, Store};

/// What one tick accomplished, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub leases_reclaimed: u32,
    pub workers_lost: u32,
    pub intents_expired: u32,
    pub jobs_aged: u32,
    pub terminals_pruned: u32,
}

pub struct Janitor<S, C: Clock> {
    store: Arc<S>,
    clock: C,
    cfg: Arc<BrokerConfig>,
    bus: Arc<EventBus<S, C>>,
    sessions: Arc<SessionManager<S, C>>,
}

impl<S: Store, C: Clock> Janitor<S, C> {
    pub fn new(
        store: Arc<S>,
        clock: C,
        cfg: Arc<BrokerConfig>,
        bus: Arc<EventBus<S, C>>,
        sessions: Arc<SessionManager<S, C>>,
    ) -> Self {
        Self { store, clock, cfg, bus, sessions }
    }

    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_secs(self.cfg.janitor_period_sec.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.tick().await {
                            Ok(report) => {
                                if report != TickReport::default() {
                                    tracing::info!(?report, "janitor tick");
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "janitor tick failed"),
                        }
                    }
                }
            }
        })
    }

    /// One full sweep. Each step is independent; a transient store fault
    /// aborts the tick and the next period retries.
    pub async fn tick(&self) -> Result<TickReport> {
        let leases_reclaimed = self.reclaim_expired_leases().await?;
        let workers_lost = self.detect_dead_workers().await?;
        let intents_expired = self.expire_cancel_intents().await?;
        let jobs_aged = self.age_pending().await?;
        self.trim_streams().await?;
        let terminals_pruned = self.prune_terminal().await?;
        Ok(TickReport {
            leases_reclaimed,
            workers_lost,
            intents_expired,
            jobs_aged,
            terminals_pruned,
        })
    }

    /// Sweep the active index for leases past `expires_at + grace`.
    /// The reclaim script re-verifies ownership and expiry atomically.
    async fn reclaim_expired_leases(&self) -> Result<u32> {
        let now_ms = self.clock.epoch_ms();
        let grace_ms = self.cfg.lease_grace_ms();
        let mut reclaimed = 0;
        for job_id in self.store.set_members(keys::ACTIVE).await? {
            let Some(job) = self.load_job(&job_id).await? else { continue };
            let Some(lease) = &job.lease else { continue };
            if now_ms <= lease.expires_at_ms + grace_ms {
                continue;
            }
            let worker_id = lease.worker_id.clone();
            let reply = self
                .store
                .script_call(ScriptCall::ReclaimLease {
                    job_id: job.id,
                    expected_worker: worker_id.clone(),
                    now_ms,
                    grace_ms,
                    score_params: self.cfg.score_params(),
                    event_id: self.bus.next_event_id(),
                })
                .await?;
            match reply {
                ScriptReply::Reclaimed { will_retry, record } => {
                    self.bus.deliver_local(&record);
                    reclaimed += 1;
                    self.sessions
                        .attest_failure(
                            &worker_id,
                            FailureAttestation {
                                job_id: job.id,
                                kind: "lease_expired".to_string(),
                                message: format!(
                                    "reclaimed by janitor, will_retry={will_retry}"
                                ),
                                at_ms: now_ms,
                            },
                        )
                        .await?;
                }
                ScriptReply::LeaseIntact => {}
                other => {
                    tracing::warn!(job = %job.id, reply = ?other, "unexpected reclaim reply")
                }
            }
        }
        Ok(reclaimed)
    }

    /// Mark workers silent past the dead threshold and emit `worker.lost`.
    async fn detect_dead_workers(&self) -> Result<u32> {
        let now_ms = self.clock.epoch_ms();
        let dead_after_ms = self.cfg.worker_dead_after_sec * 1000;
        let mut lost = 0;
        for mut record in self.sessions.list().await? {
            if record.state == WorkerState::Dead {
                continue;
            }
            if now_ms.saturating_sub(record.last_heartbeat_at_ms) <= dead_after_ms {
                continue;
            }
            record.state = WorkerState::Dead;
            self.sessions.save(&record).await?;
            self.bus
                .publish(Event::WorkerLost {
                    worker_id: record.worker_id().clone(),
                    last_heartbeat_at_ms: record.last_heartbeat_at_ms,
                })
                .await?;
            lost += 1;
        }
        Ok(lost)
    }

    /// Drop cancellation intents whose job has settled and whose grace
    /// window has passed; the worker never acknowledged them.
    async fn expire_cancel_intents(&self) -> Result<u32> {
        let now_ms = self.clock.epoch_ms();
        let grace_ms = self.cfg.cancel_grace_sec * 1000;
        let mut expired = 0;
        for record in self.sessions.list().await? {
            for job_id in record.cancel_pending.iter().copied().collect::<Vec<JobId>>() {
                let Some(job) = self.load_job(job_id.as_str()).await? else {
                    self.sessions.job_detached(record.worker_id(), &job_id).await?;
                    expired += 1;
                    continue;
                };
                let overdue = job
                    .cancel_requested_at_ms
                    .map(|at| now_ms > at + grace_ms)
                    .unwrap_or(false);
                if job.is_terminal() && overdue {
                    self.sessions.job_detached(record.worker_id(), &job_id).await?;
                    expired += 1;
                }
            }
        }
        Ok(expired)
    }

    async fn age_pending(&self) -> Result<u32> {
        let reply = self
            .store
            .script_call(ScriptCall::AgePending {
                now_ms: self.clock.epoch_ms(),
                scan_cap: self.cfg.match_scan_cap,
                score_params: self.cfg.score_params(),
            })
            .await?;
        match reply {
            ScriptReply::Aged { rescored } => Ok(rescored),
            other => {
                tracing::warn!(reply = ?other, "unexpected age_pending reply");
                Ok(0)
            }
        }
    }

    /// Enforce stream retention: bounded by count and by age, whichever
    /// is stricter.
    async fn trim_streams(&self) -> Result<()> {
        let min_ms =
            self.clock.epoch_ms().saturating_sub(self.cfg.stream_retention_sec * 1000);
        for event_type in Event::ALL_TYPES {
            self.store
                .stream_trim(&keys::stream(event_type), self.cfg.stream_retention_count, min_ms)
                .await?;
        }
        Ok(())
    }

    /// Garbage-collect terminal jobs past the retention window.
    async fn prune_terminal(&self) -> Result<u32> {
        let now_ms = self.clock.epoch_ms();
        let retention_ms = self.cfg.terminal_retention_sec * 1000;
        let mut pruned = 0;
        for job_id in self.store.set_members(keys::TERMINAL).await? {
            let Some(map) = self.store.hash_get(&keys::job(&job_id)).await? else {
                self.store.set_remove(keys::TERMINAL, &job_id).await?;
                continue;
            };
            let terminal_at: u64 =
                map.get("terminal_at_ms").and_then(|v| v.parse().ok()).unwrap_or(now_ms);
            if now_ms.saturating_sub(terminal_at) > retention_ms {
                self.store.hash_delete(&keys::job(&job_id)).await?;
                self.store.set_remove(keys::TERMINAL, &job_id).await?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    async fn load_job(&self, job_id: &str) -> Result<Option<Job>> {
        let Some(map) = self.store.hash_get(&keys::job(job_id)).await? else {
            return Ok(None);
        };
        match Job::from_fields(&map) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                tracing::error!(job = job_id, error = %e, "skipping corrupt job record");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
#[path = "janitor_tests.rs"]
mod tests;
