// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redis store backend.
//!
//! Commands go through a shared `ConnectionManager`; each pub/sub
//! subscription gets its own connection. The named atomic scripts run as
//! server-side Lua (see [`crate::lua`]), giving every script a single
//! execution thread and a consistent snapshot.

use crate::error::StoreError;
use crate::lua;
use crate::script::{ScriptCall, ScriptReply};
use crate::{Store, StreamEntry};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::streams::{StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::HashMap;
use tokio::sync::mpsc;
use yard_core::Fields;

/// Conditional hash update used by `hash_conditional_update`; small
/// enough to live here rather than in the script registry.
const HASH_CAS: &str = r#"
local args = cjson.decode(ARGV[1])
local existing = redis.call('EXISTS', KEYS[1])
if existing == 0 then return 0 end
for field, value in pairs(args.expected) do
  if redis.call('HGET', KEYS[1], field) ~= value then return 0 end
end
for field, value in pairs(args.update) do
  redis.call('HSET', KEYS[1], field, value)
end
return 1
"#;

struct Scripts {
    submit_job: redis::Script,
    submit_workflow: redis::Script,
    match_claim: redis::Script,
    mark_started: redis::Script,
    report_progress: redis::Script,
    complete_job: redis::Script,
    fail_job: redis::Script,
    cancel_job: redis::Script,
    renew_lease: redis::Script,
    reclaim_lease: redis::Script,
    workflow_step: redis::Script,
    age_pending: redis::Script,
    publish_event: redis::Script,
    hash_cas: redis::Script,
}

impl Scripts {
    fn new() -> Self {
        Self {
            submit_job: redis::Script::new(&lua::source("submit_job")),
            submit_workflow: redis::Script::new(&lua::source("submit_workflow")),
            match_claim: redis::Script::new(&lua::source("match_claim")),
            mark_started: redis::Script::new(&lua::source("mark_started")),
            report_progress: redis::Script::new(&lua::source("report_progress")),
            complete_job: redis::Script::new(&lua::source("complete_job")),
            fail_job: redis::Script::new(&lua::source("fail_job")),
            cancel_job: redis::Script::new(&lua::source("cancel_job")),
            renew_lease: redis::Script::new(&lua::source("renew_lease")),
            reclaim_lease: redis::Script::new(&lua::source("reclaim_lease")),
            workflow_step: redis::Script::new(&lua::source("workflow_step")),
            age_pending: redis::Script::new(&lua::source("age_pending")),
            publish_event: redis::Script::new(&lua::source("publish_event")),
            hash_cas: redis::Script::new(HASH_CAS),
        }
    }
}

/// Redis-backed [`Store`].
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    scripts: Scripts,
}

impl RedisStore {
    /// Connect to the given Redis URL (`redis://host:port/db`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::from)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, conn, scripts: Scripts::new() })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn invoke(
        &self,
        name: &'static str,
        script: &redis::Script,
        args: serde_json::Value,
    ) -> Result<ScriptReply, StoreError> {
        let mut conn = self.conn();
        let reply: String = script.arg(args.to_string()).invoke_async(&mut conn).await?;
        serde_json::from_str(&reply)
            .map_err(|e| StoreError::MalformedReply { script: name, detail: e.to_string() })
    }
}

fn fields_object(fields: &Fields) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    serde_json::Value::Object(map)
}

fn entry_body(id: &redis::streams::StreamId) -> Option<String> {
    id.map.get("body").and_then(|v| redis::from_redis_value::<String>(v).ok())
}

#[async_trait]
impl Store for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn hash_put(&self, key: &str, fields: &Fields) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let pairs: Vec<(&str, &str)> =
            fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let _: () = redis::pipe()
            .atomic()
            .del(key)
            .hset_multiple(key, &pairs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn hash_get(&self, key: &str) -> Result<Option<HashMap<String, String>>, StoreError> {
        let mut conn = self.conn();
        let map: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(if map.is_empty() { None } else { Some(map) })
    }

    async fn hash_update(&self, key: &str, fields: &Fields) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let pairs: Vec<(&str, &str)> =
            fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        conn.hset_multiple::<_, _, _, ()>(key, &pairs).await?;
        Ok(())
    }

    async fn hash_conditional_update(
        &self,
        key: &str,
        expected: &Fields,
        update: &Fields,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let args = serde_json::json!({
            "expected": fields_object(expected),
            "update": fields_object(update),
        });
        let applied: i64 = self
            .scripts
            .hash_cas
            .key(key)
            .arg(args.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn hash_delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut conn = self.conn();
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let removed: i64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn sorted_set_range_desc(
        &self,
        key: &str,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let stop = isize::try_from(limit - 1).unwrap_or(isize::MAX);
        let members: Vec<(String, f64)> = conn.zrevrange_withscores(key, 0, stop).await?;
        Ok(members)
    }

    async fn sorted_set_len(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        Ok(conn.zcard(key).await?)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let removed: i64 = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        Ok(conn.smembers(key).await?)
    }

    async fn stream_append(&self, stream: &str, body: &str) -> Result<String, StoreError> {
        let mut conn = self.conn();
        let id: String = conn.xadd(stream, "*", &[("body", body)]).await?;
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            // The group already existing is the normal steady state.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn stream_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let mut conn = self.conn();
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms as usize);
        let reply: StreamReadReply = conn.xread_options(&[stream], &[">"], &options).await?;
        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                if let Some(body) = entry_body(&id) {
                    entries.push(StreamEntry { id: id.id, body });
                }
            }
        }
        Ok(entries)
    }

    async fn stream_ack(&self, stream: &str, group: &str, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        conn.xack::<_, _, _, ()>(stream, group, &[id]).await?;
        Ok(())
    }

    async fn stream_range_from(
        &self,
        stream: &str,
        after_id: Option<&str>,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let mut conn = self.conn();
        let start = match after_id {
            Some(id) => format!("({id}"),
            None => "-".to_string(),
        };
        let reply: StreamRangeReply = conn.xrange_count(stream, start, "+", count).await?;
        Ok(reply
            .ids
            .into_iter()
            .filter_map(|id| entry_body(&id).map(|body| StreamEntry { id: id.id, body }))
            .collect())
    }

    async fn stream_trim(
        &self,
        stream: &str,
        max_len: u64,
        min_ms: u64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = redis::cmd("XTRIM")
            .arg(stream)
            .arg("MINID")
            .arg(min_ms)
            .query_async(&mut conn)
            .await?;
        let _: () = redis::cmd("XTRIM")
            .arg(stream)
            .arg("MAXLEN")
            .arg(max_len)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn stream_len(&self, stream: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        Ok(conn.xlen(stream).await?)
    }

    async fn pubsub_publish(&self, channel: &str, body: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        conn.publish::<_, _, ()>(channel, body).await?;
        Ok(())
    }

    async fn pubsub_subscribe(
        &self,
        channel: &str,
    ) -> Result<mpsc::UnboundedReceiver<String>, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(message) = messages.next().await {
                let Ok(payload) = message.get_payload::<String>() else { continue };
                if tx.send(payload).is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn script_call(&self, call: ScriptCall) -> Result<ScriptReply, StoreError> {
        match call {
            ScriptCall::SubmitJob { job, score, idempotency, record } => {
                let args = serde_json::json!({
                    "job_id": job.id.as_str(),
                    "fields": fields_object(&job.to_fields()),
                    "score": score,
                    "record": record.to_stream_body(),
                    "idem": idempotency,
                });
                self.invoke("submit_job", &self.scripts.submit_job, args).await
            }

            ScriptCall::SubmitWorkflow { workflow, jobs, records } => {
                let job_args: Vec<serde_json::Value> = jobs
                    .iter()
                    .map(|(job, score)| {
                        serde_json::json!({
                            "id": job.id.as_str(),
                            "fields": fields_object(&job.to_fields()),
                            "score": score,
                        })
                    })
                    .collect();
                let types: Vec<&str> = records.iter().map(|r| r.type_name()).collect();
                let bodies: Vec<String> = records.iter().map(|r| r.to_stream_body()).collect();
                let args = serde_json::json!({
                    "workflow_id": workflow.id.as_str(),
                    "workflow_fields": fields_object(&workflow.to_fields()),
                    "jobs": job_args,
                    "records": bodies,
                    "types": types,
                });
                self.invoke("submit_workflow", &self.scripts.submit_workflow, args).await
            }

            ScriptCall::MatchClaim { descriptor, now_ms, lease_ms, scan_cap, event_id } => {
                let args = serde_json::json!({
                    "descriptor": descriptor,
                    "now_ms": now_ms,
                    "lease_ms": lease_ms,
                    "scan_cap": scan_cap,
                    "event_id": event_id,
                });
                self.invoke("match_claim", &self.scripts.match_claim, args).await
            }

            ScriptCall::MarkStarted { job_id, worker_id, now_ms } => {
                let args = serde_json::json!({
                    "job_id": job_id.as_str(),
                    "worker_id": worker_id.as_str(),
                    "now_ms": now_ms,
                });
                self.invoke("mark_started", &self.scripts.mark_started, args).await
            }

            ScriptCall::ReportProgress {
                job_id,
                worker_id,
                fraction,
                message,
                now_ms,
                lease_ms,
                event_id,
            } => {
                let args = serde_json::json!({
                    "job_id": job_id.as_str(),
                    "worker_id": worker_id.as_str(),
                    "fraction": fraction,
                    "message": message,
                    "now_ms": now_ms,
                    "lease_ms": lease_ms,
                    "event_id": event_id,
                });
                self.invoke("report_progress", &self.scripts.report_progress, args).await
            }

            ScriptCall::CompleteJob { job_id, worker_id, result, result_hash, now_ms, event_id } => {
                let args = serde_json::json!({
                    "job_id": job_id.as_str(),
                    "worker_id": worker_id.as_str(),
                    "result": result.to_string(),
                    "result_hash": result_hash,
                    "now_ms": now_ms,
                    "event_id": event_id,
                });
                self.invoke("complete_job", &self.scripts.complete_job, args).await
            }

            ScriptCall::FailJob { job_id, worker_id, failure, now_ms, score_params, event_id } => {
                let args = serde_json::json!({
                    "job_id": job_id.as_str(),
                    "worker_id": worker_id.as_str(),
                    "failure": serde_json::to_string(&failure).unwrap_or_default(),
                    "now_ms": now_ms,
                    "score_params": score_params,
                    "event_id": event_id,
                });
                self.invoke("fail_job", &self.scripts.fail_job, args).await
            }

            ScriptCall::CancelJob { job_id, now_ms, event_id, cause } => {
                let args = serde_json::json!({
                    "job_id": job_id.as_str(),
                    "now_ms": now_ms,
                    "event_id": event_id,
                    "cause": cause,
                });
                self.invoke("cancel_job", &self.scripts.cancel_job, args).await
            }

            ScriptCall::RenewLease { job_id, worker_id, now_ms, lease_ms } => {
                let args = serde_json::json!({
                    "job_id": job_id.as_str(),
                    "worker_id": worker_id.as_str(),
                    "now_ms": now_ms,
                    "lease_ms": lease_ms,
                });
                self.invoke("renew_lease", &self.scripts.renew_lease, args).await
            }

            ScriptCall::ReclaimLease {
                job_id,
                expected_worker,
                now_ms,
                grace_ms,
                score_params,
                event_id,
            } => {
                let args = serde_json::json!({
                    "job_id": job_id.as_str(),
                    "expected_worker": expected_worker.as_str(),
                    "now_ms": now_ms,
                    "grace_ms": grace_ms,
                    "score_params": score_params,
                    "event_id": event_id,
                });
                self.invoke("reclaim_lease", &self.scripts.reclaim_lease, args).await
            }

            ScriptCall::WorkflowStep {
                workflow_id,
                detail,
                now_ms,
                step_event_id,
                terminal_event_id,
                cause,
            } => {
                let args = serde_json::json!({
                    "workflow_id": workflow_id.as_str(),
                    "step_index": detail.step_index,
                    "job_id": detail.job_id.as_str(),
                    "status": detail.status.to_string(),
                    "detail": serde_json::to_string(&detail).unwrap_or_default(),
                    "now_ms": now_ms,
                    "step_event_id": step_event_id,
                    "terminal_event_id": terminal_event_id,
                    "cause": cause,
                });
                self.invoke("workflow_step", &self.scripts.workflow_step, args).await
            }

            ScriptCall::AgePending { now_ms, scan_cap, score_params } => {
                let args = serde_json::json!({
                    "now_ms": now_ms,
                    "scan_cap": scan_cap,
                    "score_params": score_params,
                });
                self.invoke("age_pending", &self.scripts.age_pending, args).await
            }

            ScriptCall::PublishEvent { record } => {
                let args = serde_json::json!({
                    "event_type": record.type_name(),
                    "record": record.to_stream_body(),
                });
                self.invoke("publish_event", &self.scripts.publish_event, args).await
            }
        }
    }
}
