// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request-side API: submissions, views, cancellation, webhook registry.
//!
//! The webhook cache is strictly advisory: refreshes load the FULL
//! population (active and inactive endpoints alike), and individual
//! lookups fall back to the store on a miss. Correctness never depends
//! on the cache.

use crate::error::{BrokerError, Result};
use crate::registry::{Registry, Submitted};
use crate::session::SessionManager;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use yard_core::{
    BrokerConfig, Clock, Event, JobId, JobSpec, Webhook, WebhookId, WorkflowId, WorkflowMode,
};
use yard_store::{keys, Store};
use yard_wire::{JobView, WebhookView, WorkflowView};

/// In-memory advisory index of all known webhook endpoints.
#[derive(Default)]
pub struct WebhookCache {
    entries: Mutex<HashMap<WebhookId, Webhook>>,
}

impl WebhookCache {
    fn get(&self, id: &WebhookId) -> Option<Webhook> {
        self.entries.lock().get(id).cloned()
    }

    fn insert(&self, hook: Webhook) {
        self.entries.lock().insert(hook.id, hook);
    }

    fn remove(&self, id: &WebhookId) {
        self.entries.lock().remove(id);
    }

    /// Replace the cache with a full snapshot. Never narrows: callers
    /// must pass every endpoint, not a filtered subset.
    fn replace(&self, hooks: Vec<Webhook>) {
        let mut entries = self.entries.lock();
        entries.clear();
        for hook in hooks {
            entries.insert(hook.id, hook);
        }
    }
}

pub struct Ingress<S, C: Clock> {
    store: Arc<S>,
    clock: C,
    cfg: Arc<BrokerConfig>,
    registry: Arc<Registry<S, C>>,
    sessions: Arc<SessionManager<S, C>>,
    webhooks: Arc<WebhookCache>,
}

impl<S: Store, C: Clock> Ingress<S, C> {
    pub fn new(
        store: Arc<S>,
        clock: C,
        cfg: Arc<BrokerConfig>,
        registry: Arc<Registry<S, C>>,
        sessions: Arc<SessionManager<S, C>>,
    ) -> Self {
        Self { store, clock, cfg, registry, sessions, webhooks: Arc::new(WebhookCache::default()) }
    }

    /// Periodic full-population cache refresh.
    pub fn spawn_webhook_refresh(self: &Arc<Self>, cancel: CancellationToken)
        -> tokio::task::JoinHandle<()>
    {
        let ingress = Arc::clone(self);
        let period = Duration::from_secs(ingress.cfg.webhook_refresh_sec.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = ingress.refresh_webhook_cache().await {
                            tracing::warn!(error = %e, "webhook cache refresh failed");
                        }
                    }
                }
            }
        })
    }

    pub async fn submit_job(&self, spec: JobSpec) -> Result<Submitted> {
        validate_spec(&spec)?;
        if let Some(webhook) = &spec.webhook {
            if self.get_webhook(webhook).await?.is_none() {
                return Err(BrokerError::validation(format!("unknown webhook {webhook}")));
            }
        }
        self.registry.submit(spec).await
    }

    pub async fn submit_workflow(
        &self,
        name: String,
        steps: Vec<JobSpec>,
        mode: Option<WorkflowMode>,
        webhook: Option<WebhookId>,
    ) -> Result<(WorkflowId, Vec<JobId>)> {
        if name.is_empty() {
            return Err(BrokerError::validation("workflow name must not be empty"));
        }
        if steps.is_empty() {
            return Err(BrokerError::validation("workflow must have at least one step"));
        }
        for spec in &steps {
            validate_spec(spec)?;
        }
        if let Some(webhook) = &webhook {
            if self.get_webhook(webhook).await?.is_none() {
                return Err(BrokerError::validation(format!("unknown webhook {webhook}")));
            }
        }
        let mode = mode.unwrap_or(self.cfg.workflow_mode_default);
        self.registry.submit_workflow(name, steps, mode, webhook).await
    }

    /// Read-your-writes view straight from the store.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<JobView>> {
        Ok(self.registry.get_job(id).await?.map(|job| JobView::from(&job)))
    }

    pub async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowView>> {
        Ok(self.registry.get_workflow(id).await?.map(|wf| WorkflowView::from(&wf)))
    }

    /// Cancel a job; when it was leased, the holding worker gets a
    /// cancellation request on its next heartbeat.
    pub async fn cancel_job(&self, id: JobId) -> Result<()> {
        let was_leased_to = self.registry.cancel(id, None).await?;
        if let Some(worker_id) = was_leased_to {
            self.sessions.cancel_intent(&worker_id, id).await?;
        }
        Ok(())
    }

    /// Cancel every non-terminal step of a workflow.
    pub async fn cancel_workflow(&self, id: WorkflowId) -> Result<()> {
        let Some(workflow) = self.registry.get_workflow(&id).await? else {
            return Err(BrokerError::not_found(id.to_string()));
        };
        if workflow.status.is_terminal() {
            return Err(BrokerError::conflict(format!("workflow is {}", workflow.status)));
        }
        for job_id in workflow.step_jobs {
            match self.cancel_job(job_id).await {
                Ok(()) => {}
                // Terminal steps keep their recorded outcome.
                Err(BrokerError::Conflict(_)) | Err(BrokerError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub async fn register_webhook(
        &self,
        url: String,
        event_types: Vec<String>,
        secret: String,
    ) -> Result<WebhookId> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(BrokerError::validation("webhook url must be http(s)"));
        }
        if event_types.is_empty() {
            return Err(BrokerError::validation("webhook must subscribe to at least one type"));
        }
        for event_type in &event_types {
            if !Event::ALL_TYPES.contains(&event_type.as_str()) {
                return Err(BrokerError::validation(format!(
                    "unknown event type {event_type:?}"
                )));
            }
        }
        if secret.is_empty() {
            return Err(BrokerError::validation("webhook secret must not be empty"));
        }
        let hook = Webhook {
            id: WebhookId::new(),
            url,
            event_types: event_types.into_iter().collect(),
            secret,
            active: true,
            created_at_ms: self.clock.epoch_ms(),
        };
        self.store.hash_put(&keys::webhook(hook.id.as_str()), &hook.to_fields()).await?;
        self.store.set_add(keys::WEBHOOKS, hook.id.as_str()).await?;
        self.webhooks.insert(hook.clone());
        Ok(hook.id)
    }

    /// Lookup by id: cache first, store on miss. The record is returned
    /// whatever its `active` flag says.
    pub async fn get_webhook(&self, id: &WebhookId) -> Result<Option<Webhook>> {
        if let Some(hook) = self.webhooks.get(id) {
            return Ok(Some(hook));
        }
        let Some(map) = self.store.hash_get(&keys::webhook(id.as_str())).await? else {
            return Ok(None);
        };
        let hook = Webhook::from_fields(&map)
            .map_err(|e| BrokerError::Internal(format!("corrupt webhook {id}: {e}")))?;
        self.webhooks.insert(hook.clone());
        Ok(Some(hook))
    }

    pub async fn list_webhooks(&self) -> Result<Vec<WebhookView>> {
        let hooks = self.load_all_webhooks().await?;
        Ok(hooks.iter().map(WebhookView::from).collect())
    }

    pub async fn update_webhook(&self, id: &WebhookId, active: bool) -> Result<()> {
        let Some(mut hook) = self.get_webhook(id).await? else {
            return Err(BrokerError::not_found(id.to_string()));
        };
        hook.active = active;
        self.store.hash_put(&keys::webhook(id.as_str()), &hook.to_fields()).await?;
        self.webhooks.insert(hook);
        Ok(())
    }

    pub async fn delete_webhook(&self, id: &WebhookId) -> Result<()> {
        if self.get_webhook(id).await?.is_none() {
            return Err(BrokerError::not_found(id.to_string()));
        }
        self.store.hash_delete(&keys::webhook(id.as_str())).await?;
        self.store.set_remove(keys::WEBHOOKS, id.as_str()).await?;
        self.webhooks.remove(id);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn clear_webhook_cache(&self) {
        self.webhooks.replace(Vec::new());
    }

    /// Reload the cache with the full endpoint population.
    pub async fn refresh_webhook_cache(&self) -> Result<()> {
        let hooks = self.load_all_webhooks().await?;
        self.webhooks.replace(hooks);
        Ok(())
    }

    async fn load_all_webhooks(&self) -> Result<Vec<Webhook>> {
        let ids = self.store.set_members(keys::WEBHOOKS).await?;
        let mut hooks = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(map) = self.store.hash_get(&keys::webhook(&id)).await? else { continue };
            match Webhook::from_fields(&map) {
                Ok(hook) => hooks.push(hook),
                Err(e) => tracing::error!(webhook = %id, error = %e, "skipping corrupt webhook"),
            }
        }
        Ok(hooks)
    }
}

fn validate_spec(spec: &JobSpec) -> Result<()> {
    if spec.service_type.is_empty() {
        return Err(BrokerError::validation("service_type must not be empty"));
    }
    if spec.max_attempts == 0 {
        return Err(BrokerError::validation("max_attempts must be at least 1"));
    }
    if let Some(min) = spec.requirements.min_gpu_memory_mb {
        if min == 0 {
            return Err(BrokerError::validation("min_gpu_memory_mb must be positive when set"));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "ingress_tests.rs"]
mod tests;
