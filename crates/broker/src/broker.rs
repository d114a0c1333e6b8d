// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker wiring and request dispatch.

use crate::aggregator::Aggregator;
use crate::bus::EventBus;
use crate::error::{BrokerError, Result};
use crate::ingress::Ingress;
use crate::janitor::Janitor;
use crate::registry::Registry;
use crate::session::SessionManager;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use yard_core::{BrokerConfig, Clock, FailureAttestation, JobStatus};
use yard_store::{keys, Store};
use yard_wire::{
    BrokerStatus, JobSummary, Query, Request, Response, WorkAssignment, WorkerView,
    WorkflowView, PROTOCOL_VERSION,
};

/// One broker process: shared components plus background tasks.
pub struct Broker<S, C: Clock> {
    pub store: Arc<S>,
    pub clock: C,
    pub cfg: Arc<BrokerConfig>,
    pub bus: Arc<EventBus<S, C>>,
    pub registry: Arc<Registry<S, C>>,
    pub sessions: Arc<SessionManager<S, C>>,
    pub ingress: Arc<Ingress<S, C>>,
    start_time: Instant,
}

impl<S: Store, C: Clock> Broker<S, C> {
    pub fn new(store: Arc<S>, clock: C, cfg: BrokerConfig) -> Arc<Self> {
        let cfg = Arc::new(cfg);
        let bus = Arc::new(EventBus::new(Arc::clone(&store), clock.clone()));
        let registry = Arc::new(Registry::new(
            Arc::clone(&store),
            clock.clone(),
            Arc::clone(&cfg),
            Arc::clone(&bus),
        ));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&store),
            clock.clone(),
            Arc::clone(&cfg),
            Arc::clone(&bus),
        ));
        let ingress = Arc::new(Ingress::new(
            Arc::clone(&store),
            clock.clone(),
            Arc::clone(&cfg),
            Arc::clone(&registry),
            Arc::clone(&sessions),
        ));
        Arc::new(Self {
            store,
            clock: clock.clone(),
            cfg,
            bus,
            registry,
            sessions,
            ingress,
            start_time: clock.now(),
        })
    }

    /// Spawn the aggregator, janitor, and webhook-cache refresher.
    pub fn spawn_background(self: &Arc<Self>, cancel: &CancellationToken) {
        Aggregator::new(
            Arc::clone(&self.store),
            self.clock.clone(),
            Arc::clone(&self.bus),
            Arc::clone(&self.registry),
        )
        .spawn(cancel.clone());
        Janitor::new(
            Arc::clone(&self.store),
            self.clock.clone(),
            Arc::clone(&self.cfg),
            Arc::clone(&self.bus),
            Arc::clone(&self.sessions),
        )
        .spawn(cancel.clone());
        self.ingress.spawn_webhook_refresh(cancel.clone());
    }

    /// Handle one single-shot request. `Subscribe`/`Ack` are connection
    /// level and handled by the listener.
    pub async fn handle(&self, request: Request) -> Response {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                let kind = e.kind();
                if matches!(e, BrokerError::Internal(_) | BrokerError::StoreUnavailable(_)) {
                    tracing::error!(error = %e, "request failed");
                }
                Response::error(kind, e.to_string())
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Response> {
        match request {
            Request::Ping => Ok(Response::Pong),

            Request::Hello { .. } => {
                Ok(Response::Hello { version: PROTOCOL_VERSION.to_string() })
            }

            Request::SubmitJob { spec } => {
                let submitted = self.ingress.submit_job(spec).await?;
                Ok(Response::JobSubmitted {
                    job_id: submitted.job_id,
                    deduplicated: submitted.deduplicated,
                })
            }

            Request::GetJob { id } => {
                Ok(Response::Job { job: self.ingress.get_job(&id).await?.map(Box::new) })
            }

            Request::CancelJob { id } => {
                self.ingress.cancel_job(id).await?;
                Ok(Response::Cancelled)
            }

            Request::SubmitWorkflow { name, steps, mode, webhook } => {
                let (workflow_id, job_ids) =
                    self.ingress.submit_workflow(name, steps, mode, webhook).await?;
                Ok(Response::WorkflowSubmitted { workflow_id, job_ids })
            }

            Request::GetWorkflow { id } => Ok(Response::Workflow {
                workflow: self.ingress.get_workflow(&id).await?.map(Box::new),
            }),

            Request::CancelWorkflow { id } => {
                self.ingress.cancel_workflow(id).await?;
                Ok(Response::Cancelled)
            }

            Request::RegisterWebhook { url, event_types, secret } => {
                let webhook_id = self.ingress.register_webhook(url, event_types, secret).await?;
                Ok(Response::WebhookRegistered { webhook_id })
            }

            Request::ListWebhooks => {
                Ok(Response::Webhooks { webhooks: self.ingress.list_webhooks().await? })
            }

            Request::GetWebhook { id } => Ok(Response::Webhook {
                webhook: self
                    .ingress
                    .get_webhook(&id)
                    .await?
                    .map(|hook| Box::new(yard_wire::WebhookView::from(&hook))),
            }),

            Request::DeleteWebhook { id } => {
                self.ingress.delete_webhook(&id).await?;
                Ok(Response::Ok)
            }

            Request::UpdateWebhook { id, active } => {
                self.ingress.update_webhook(&id, active).await?;
                Ok(Response::Ok)
            }

            Request::Register { descriptor } => {
                self.sessions.register(descriptor).await?;
                Ok(Response::Registered)
            }

            Request::Heartbeat { worker_id, active_work, cancel_ack } => {
                let cancel_requested =
                    self.sessions.heartbeat(&worker_id, active_work, cancel_ack).await?;
                Ok(Response::HeartbeatAck { cancel_requested })
            }

            Request::RequestWork { worker_id } => {
                let job = self.sessions.request_work(&worker_id).await?;
                Ok(Response::WorkAssignment {
                    job: job.as_ref().and_then(WorkAssignment::from_claimed).map(Box::new),
                })
            }

            Request::MarkStarted { job_id, worker_id } => {
                self.registry.mark_started(job_id, worker_id).await?;
                Ok(Response::Ok)
            }

            Request::ReportProgress { job_id, worker_id, fraction, message } => {
                self.registry.report_progress(job_id, worker_id, fraction, message).await?;
                Ok(Response::Ok)
            }

            Request::Complete { job_id, worker_id, result } => {
                self.registry.complete(job_id, worker_id.clone(), result).await?;
                self.sessions.job_detached(&worker_id, &job_id).await?;
                Ok(Response::Ok)
            }

            Request::Fail { job_id, worker_id, error } => {
                let kind = error.kind.clone();
                let message = error.message.clone();
                self.registry.fail(job_id, worker_id.clone(), error).await?;
                self.sessions
                    .attest_failure(
                        &worker_id,
                        FailureAttestation {
                            job_id,
                            kind,
                            message,
                            at_ms: self.clock.epoch_ms(),
                        },
                    )
                    .await?;
                Ok(Response::Ok)
            }

            Request::Release { worker_id, drain } => {
                self.sessions.release(&worker_id, drain).await?;
                Ok(Response::Ok)
            }

            Request::Query { query } => self.query(query).await,

            Request::Shutdown => Ok(Response::ShuttingDown),

            // Connection-level requests arriving as single shots.
            Request::Subscribe { .. } | Request::Ack { .. } => Err(BrokerError::validation(
                "subscriptions require a dedicated connection",
            )),
        }
    }

    async fn query(&self, query: Query) -> Result<Response> {
        match query {
            Query::Jobs { status, service_type, limit } => {
                let ids = self.job_ids_for(status).await?;
                let mut jobs = Vec::new();
                for id in ids {
                    if jobs.len() >= limit {
                        break;
                    }
                    let Some(job) = self.registry.get_job(&id.as_str().into()).await? else {
                        continue;
                    };
                    if let Some(status) = status {
                        if job.status != status {
                            continue;
                        }
                    }
                    if let Some(service) = &service_type {
                        if &job.service_type != service {
                            continue;
                        }
                    }
                    jobs.push(JobSummary::from(&job));
                }
                Ok(Response::Jobs { jobs })
            }

            Query::Workflows { limit } => {
                let ids = self.store.set_members(keys::WORKFLOWS).await?;
                let mut workflows = Vec::new();
                for id in ids.into_iter().take(limit) {
                    if let Some(wf) = self.registry.get_workflow(&id.as_str().into()).await? {
                        workflows.push(WorkflowView::from(&wf));
                    }
                }
                Ok(Response::Workflows { workflows })
            }

            Query::Workers => {
                let workers =
                    self.sessions.list().await?.iter().map(WorkerView::from).collect();
                Ok(Response::Workers { workers })
            }

            Query::Status => {
                let pending = self.store.sorted_set_len(keys::PENDING).await?;
                let active = self.store.set_members(keys::ACTIVE).await?.len() as u64;
                let terminal = self.store.set_members(keys::TERMINAL).await?.len() as u64;
                let workers = self.store.set_members(keys::WORKERS).await?.len() as u64;
                let store_healthy = self.store.ping().await.is_ok();
                Ok(Response::Status {
                    status: BrokerStatus {
                        uptime_secs: self.clock.now().duration_since(self.start_time).as_secs(),
                        pending_jobs: pending,
                        active_jobs: active,
                        terminal_jobs: terminal,
                        workers,
                        store_healthy,
                    },
                })
            }
        }
    }

    /// Candidate id set for a job listing, narrowed by index when the
    /// status filter allows it.
    async fn job_ids_for(&self, status: Option<JobStatus>) -> Result<Vec<String>> {
        let ids = match status {
            Some(JobStatus::Pending) => self
                .store
                .sorted_set_range_desc(keys::PENDING, usize::MAX)
                .await?
                .into_iter()
                .map(|(id, _)| id)
                .collect(),
            Some(JobStatus::Assigned) | Some(JobStatus::Running) => {
                self.store.set_members(keys::ACTIVE).await?
            }
            Some(_) => self.store.set_members(keys::TERMINAL).await?,
            None => {
                let mut ids = self
                    .store
                    .sorted_set_range_desc(keys::PENDING, usize::MAX)
                    .await?
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect::<Vec<_>>();
                ids.extend(self.store.set_members(keys::ACTIVE).await?);
                ids.extend(self.store.set_members(keys::TERMINAL).await?);
                ids
            }
        };
        Ok(ids)
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
