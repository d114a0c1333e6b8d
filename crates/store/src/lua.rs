// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lua sources for the named atomic scripts.
//!
//! Conventions shared with the Rust backend:
//! - `ARGV[1]` is one JSON-encoded argument object per call.
//! - Every script returns a JSON string in the [`crate::ScriptReply`]
//!   wire shape (`{"tag": ...}`).
//! - Raw JSON hash fields (`payload`, `requirements`, `lease`, step
//!   details, pre-built event records) are spliced into output by string
//!   concatenation, never decoded and re-encoded (cjson cannot
//!   round-trip empty arrays).
//! - Keys are constructed inside the scripts; the store is a single
//!   node (cluster redirection is a non-goal).

/// Helpers prepended to every script body.
const PRELUDE: &str = r#"
local args = cjson.decode(ARGV[1])
-- Optional args arrive as JSON null; cjson.null is truthy, so drop it.
for k, v in pairs(args) do
  if v == cjson.null then args[k] = nil end
end

local function fmt(n)
  return string.format('%d', n)
end

local function jkey(id) return 'job:' .. id end
local function wkey(id) return 'workflow:' .. id end

local function publish(typ, record)
  local id = redis.call('XADD', 'stream:' .. typ, '*', 'body', record)
  redis.call('PUBLISH', 'events:' .. typ, record)
  return id
end

local function envelope(id, now, corr, cause, typ, payload)
  local s = '{"id":' .. cjson.encode(id) .. ',"emitted_at":' .. fmt(now)
  if corr and corr ~= '' then s = s .. ',"correlation_id":' .. cjson.encode(corr) end
  if cause and cause ~= '' then s = s .. ',"causation_id":' .. cjson.encode(cause) end
  return s .. ',"type":"' .. typ .. '","payload":' .. payload .. '}'
end

local function hget_all(key)
  local flat = redis.call('HGETALL', key)
  if #flat == 0 then return nil end
  local t = {}
  for i = 1, #flat, 2 do t[flat[i]] = flat[i + 1] end
  return t
end

local function set_of(arr)
  local s = {}
  for _, v in ipairs(arr or {}) do s[v] = true end
  return s
end

-- Assemble the job JSON from hash fields; raw JSON fields are spliced.
local function job_json(f)
  local parts = {
    '"id":' .. cjson.encode(f.id),
    '"service_type":' .. cjson.encode(f.service_type),
    '"requirements":' .. f.requirements,
    '"payload":' .. f.payload,
    '"priority":' .. f.priority,
    '"submitted_at_ms":' .. f.submitted_at_ms,
    '"status":' .. cjson.encode(f.status),
    '"attempt":' .. f.attempt,
    '"max_attempts":' .. f.max_attempts,
    '"progress":' .. f.progress,
  }
  if f.lease then parts[#parts + 1] = '"lease":' .. f.lease end
  if f.workflow then parts[#parts + 1] = '"workflow":' .. f.workflow end
  if f.result then parts[#parts + 1] = '"result":' .. f.result end
  if f.failure then parts[#parts + 1] = '"failure":' .. f.failure end
  if f.webhook then parts[#parts + 1] = '"webhook":' .. cjson.encode(f.webhook) end
  if f.correlation_id then
    parts[#parts + 1] = '"correlation_id":' .. cjson.encode(f.correlation_id)
  end
  if f.customer_id then parts[#parts + 1] = '"customer_id":' .. cjson.encode(f.customer_id) end
  if f.cancel_requested_at_ms then
    parts[#parts + 1] = '"cancel_requested_at_ms":' .. f.cancel_requested_at_ms
  end
  return '{' .. table.concat(parts, ',') .. '}'
end

-- Mirror of yard_core::score::pending_score.
local function pending_score(priority, submitted_at_ms, attempt, now_ms, p)
  local boost = math.floor((now_ms - submitted_at_ms) / 60000) * p.aging_boost_per_minute
  if boost < 0 then boost = 0 end
  if boost > p.aging_boost_cap then boost = p.aging_boost_cap end
  local backoff = 0
  if attempt > 0 then
    backoff = p.backoff_base_sec * 2 ^ (attempt - 1)
    if backoff > p.backoff_max_sec then backoff = p.backoff_max_sec end
  end
  return (priority + boost) * 10000000000 - math.floor(submitted_at_ms / 1000) - backoff
end

local function conflict(reason)
  return '{"tag":"conflict","reason":' .. cjson.encode(reason) .. '}'
end

-- Shared requeue-or-fail tail for worker failures and lease reclaim.
-- Mutates the hash and indexes; caller publishes the job.failed record.
local function requeue_or_fail(key, f, will_retry, failure_json, now_ms, params)
  redis.call('SREM', 'jobs:active', f.id)
  redis.call('HDEL', key, 'lease')
  if will_retry then
    redis.call('HSET', key, 'status', 'pending', 'progress', '0')
    redis.call('HDEL', key, 'failure')
    local score = pending_score(
      tonumber(f.priority), tonumber(f.submitted_at_ms), tonumber(f.attempt), now_ms, params)
    redis.call('ZADD', 'jobs:pending', tostring(score), f.id)
  else
    redis.call('HSET', key, 'status', 'failed', 'failure', failure_json,
      'terminal_at_ms', fmt(now_ms))
    redis.call('SADD', 'jobs:terminal', f.id)
  end
end
"#;

const SUBMIT_JOB: &str = r#"
if args.idem then
  local ikey = 'idempotency:' .. args.idem.key
  local stored = redis.call('GET', ikey)
  if stored then
    local sep = string.find(stored, ' ', 1, true)
    local job_id = string.sub(stored, 1, sep - 1)
    local fingerprint = string.sub(stored, sep + 1)
    if fingerprint == args.idem.fingerprint then
      return '{"tag":"duplicate","job_id":' .. cjson.encode(job_id) .. '}'
    end
    return '{"tag":"idempotency_conflict","job_id":' .. cjson.encode(job_id) .. '}'
  end
  redis.call('SET', ikey, args.job_id .. ' ' .. args.idem.fingerprint, 'EX', args.idem.ttl_sec)
end
local key = jkey(args.job_id)
for field, value in pairs(args.fields) do
  redis.call('HSET', key, field, value)
end
redis.call('ZADD', 'jobs:pending', tostring(args.score), args.job_id)
publish('job.submitted', args.record)
return '{"tag":"submitted","record":' .. args.record .. '}'
"#;

const SUBMIT_WORKFLOW: &str = r#"
local wfk = wkey(args.workflow_id)
for field, value in pairs(args.workflow_fields) do
  redis.call('HSET', wfk, field, value)
end
redis.call('SADD', 'workflows:index', args.workflow_id)
for _, job in ipairs(args.jobs) do
  local key = jkey(job.id)
  for field, value in pairs(job.fields) do
    redis.call('HSET', key, field, value)
  end
  redis.call('ZADD', 'jobs:pending', tostring(job.score), job.id)
end
for i, record in ipairs(args.records) do
  publish(args.types[i], record)
end
return '{"tag":"workflow_submitted","records":[' .. table.concat(args.records, ',') .. ']}'
"#;

const MATCH_CLAIM: &str = r#"
local d = args.descriptor
local services = set_of(d.service_types)
local tags = set_of(d.capability_tags)
local candidates = redis.call('ZRANGE', 'jobs:pending', 0, args.scan_cap - 1, 'REV')
for _, job_id in ipairs(candidates) do
  local key = jkey(job_id)
  local f = hget_all(key)
  if f and f.status == 'pending' and services[f.service_type] then
    local req = cjson.decode(f.requirements)
    local ok = true
    for _, tag in ipairs(req.capability_tags or {}) do
      if not tags[tag] then ok = false break end
    end
    if ok then
      for _, model in ipairs(req.models or {}) do
        if not tags[model] then ok = false break end
      end
    end
    if ok and req.min_gpu_memory_mb and (d.gpu_memory_mb or 0) < req.min_gpu_memory_mb then
      ok = false
    end
    if ok and req.affinity and req.affinity ~= d.affinity then ok = false end
    if ok and req.region and req.region ~= d.region then ok = false end
    if ok then
      local attempt = tonumber(f.attempt) + 1
      local expires = args.now_ms + args.lease_ms
      local lease = '{"worker_id":' .. cjson.encode(d.worker_id)
        .. ',"expires_at_ms":' .. fmt(expires)
        .. ',"last_progress_at_ms":' .. fmt(args.now_ms) .. '}'
      redis.call('ZREM', 'jobs:pending', job_id)
      redis.call('SADD', 'jobs:active', job_id)
      redis.call('HSET', key, 'status', 'assigned', 'attempt', fmt(attempt), 'lease', lease)
      f.status = 'assigned'
      f.attempt = fmt(attempt)
      f.lease = lease
      local payload = '{"job_id":' .. cjson.encode(job_id)
        .. ',"worker_id":' .. cjson.encode(d.worker_id)
        .. ',"attempt":' .. fmt(attempt)
        .. ',"lease_expires_at_ms":' .. fmt(expires)
      if f.workflow then payload = payload .. ',"workflow":' .. f.workflow end
      payload = payload .. '}'
      local record = envelope(
        args.event_id, args.now_ms, f.correlation_id, nil, 'job.assigned', payload)
      publish('job.assigned', record)
      return '{"tag":"claimed","job":' .. job_json(f) .. ',"record":' .. record .. '}'
    end
  end
end
return '{"tag":"no_match"}'
"#;

const MARK_STARTED: &str = r#"
local key = jkey(args.job_id)
local f = hget_all(key)
if not f then return '{"tag":"not_found"}' end
if f.status ~= 'assigned' then
  return conflict('expected assigned, found ' .. f.status)
end
local lease = cjson.decode(f.lease)
if lease.worker_id ~= args.worker_id then
  return conflict('lease not held by caller')
end
lease.last_progress_at_ms = args.now_ms
local updated = '{"worker_id":' .. cjson.encode(lease.worker_id)
  .. ',"expires_at_ms":' .. fmt(lease.expires_at_ms)
  .. ',"last_progress_at_ms":' .. fmt(args.now_ms) .. '}'
redis.call('HSET', key, 'status', 'running', 'lease', updated)
return '{"tag":"started"}'
"#;

const REPORT_PROGRESS: &str = r#"
local key = jkey(args.job_id)
local f = hget_all(key)
if not f then return '{"tag":"not_found"}' end
if f.status ~= 'assigned' and f.status ~= 'running' then
  return conflict('job is ' .. f.status)
end
local lease = cjson.decode(f.lease)
if lease.worker_id ~= args.worker_id then
  return conflict('lease not held by caller')
end
local current = tonumber(f.progress)
if args.fraction <= current and current > 0 then
  return '{"tag":"progress"}'
end
local fraction = args.fraction
if fraction < 0 then fraction = 0 end
if fraction > 1 then fraction = 1 end
local expires = args.now_ms + args.lease_ms
local updated = '{"worker_id":' .. cjson.encode(lease.worker_id)
  .. ',"expires_at_ms":' .. fmt(expires)
  .. ',"last_progress_at_ms":' .. fmt(args.now_ms) .. '}'
redis.call('HSET', key, 'progress', tostring(fraction), 'lease', updated)
local payload = '{"job_id":' .. cjson.encode(args.job_id)
  .. ',"worker_id":' .. cjson.encode(args.worker_id)
  .. ',"fraction":' .. tostring(fraction)
if args.message then payload = payload .. ',"message":' .. cjson.encode(args.message) end
payload = payload .. '}'
local record = envelope(
  args.event_id, args.now_ms, f.correlation_id, nil, 'job.progress', payload)
publish('job.progress', record)
return '{"tag":"progress","record":' .. record .. '}'
"#;

const COMPLETE_JOB: &str = r#"
local key = jkey(args.job_id)
local f = hget_all(key)
if not f then return '{"tag":"not_found"}' end
if f.status == 'completed' then
  if f.completed_by == args.worker_id and f.result_hash == args.result_hash then
    return '{"tag":"completed"}'
  end
  return conflict('job already completed')
end
if f.status ~= 'assigned' and f.status ~= 'running' then
  return conflict('job is ' .. f.status)
end
local lease = cjson.decode(f.lease)
if lease.worker_id ~= args.worker_id then
  return conflict('lease not held by caller')
end
redis.call('HSET', key, 'status', 'completed', 'result', args.result, 'progress', '1',
  'completed_by', args.worker_id, 'result_hash', args.result_hash,
  'terminal_at_ms', fmt(args.now_ms))
redis.call('HDEL', key, 'lease', 'cancel_requested_at_ms')
redis.call('SREM', 'jobs:active', args.job_id)
redis.call('SADD', 'jobs:terminal', args.job_id)
local payload = '{"job_id":' .. cjson.encode(args.job_id)
  .. ',"worker_id":' .. cjson.encode(args.worker_id)
  .. ',"result":' .. args.result
if f.workflow then payload = payload .. ',"workflow":' .. f.workflow end
if f.webhook then payload = payload .. ',"webhook":' .. cjson.encode(f.webhook) end
payload = payload .. '}'
local record = envelope(
  args.event_id, args.now_ms, f.correlation_id, nil, 'job.completed', payload)
publish('job.completed', record)
return '{"tag":"completed","record":' .. record .. '}'
"#;

const FAIL_JOB: &str = r#"
local key = jkey(args.job_id)
local f = hget_all(key)
if not f then return '{"tag":"not_found"}' end
if f.status ~= 'assigned' and f.status ~= 'running' then
  return conflict('job is ' .. f.status)
end
local lease = cjson.decode(f.lease)
if lease.worker_id ~= args.worker_id then
  return conflict('lease not held by caller')
end
local failure = cjson.decode(args.failure)
local attempt = tonumber(f.attempt)
local will_retry = failure.retryable and attempt < tonumber(f.max_attempts)
requeue_or_fail(key, f, will_retry, args.failure, args.now_ms, args.score_params)
local payload = '{"job_id":' .. cjson.encode(args.job_id)
  .. ',"worker_id":' .. cjson.encode(args.worker_id)
  .. ',"error":' .. args.failure
  .. ',"will_retry":' .. tostring(will_retry)
  .. ',"attempt":' .. fmt(attempt)
if f.workflow then payload = payload .. ',"workflow":' .. f.workflow end
if f.webhook then payload = payload .. ',"webhook":' .. cjson.encode(f.webhook) end
payload = payload .. '}'
local record = envelope(
  args.event_id, args.now_ms, f.correlation_id, nil, 'job.failed', payload)
publish('job.failed', record)
return '{"tag":"failed","will_retry":' .. tostring(will_retry)
  .. ',"record":' .. record .. '}'
"#;

const CANCEL_JOB: &str = r#"
local key = jkey(args.job_id)
local f = hget_all(key)
if not f then return '{"tag":"not_found"}' end
if f.status == 'completed' or f.status == 'failed' or f.status == 'cancelled' then
  return conflict('job is ' .. f.status)
end
local was_leased_to = nil
if f.status == 'pending' then
  redis.call('ZREM', 'jobs:pending', args.job_id)
else
  redis.call('SREM', 'jobs:active', args.job_id)
  if f.lease then
    was_leased_to = cjson.decode(f.lease).worker_id
  end
end
redis.call('HSET', key, 'status', 'cancelled',
  'cancel_requested_at_ms', fmt(args.now_ms), 'terminal_at_ms', fmt(args.now_ms))
redis.call('HDEL', key, 'lease')
redis.call('SADD', 'jobs:terminal', args.job_id)
local payload = '{"job_id":' .. cjson.encode(args.job_id)
if f.workflow then payload = payload .. ',"workflow":' .. f.workflow end
if f.webhook then payload = payload .. ',"webhook":' .. cjson.encode(f.webhook) end
payload = payload .. '}'
local record = envelope(
  args.event_id, args.now_ms, f.correlation_id, args.cause, 'job.cancelled', payload)
publish('job.cancelled', record)
local reply = '{"tag":"cancelled","record":' .. record
if was_leased_to then reply = reply .. ',"was_leased_to":' .. cjson.encode(was_leased_to) end
return reply .. '}'
"#;

const RENEW_LEASE: &str = r#"
local key = jkey(args.job_id)
local f = hget_all(key)
if not f then return '{"tag":"not_found"}' end
if f.status ~= 'assigned' and f.status ~= 'running' then
  return conflict('job is ' .. f.status)
end
local lease = cjson.decode(f.lease)
if lease.worker_id ~= args.worker_id then
  return conflict('lease not held by caller')
end
local updated = '{"worker_id":' .. cjson.encode(lease.worker_id)
  .. ',"expires_at_ms":' .. fmt(args.now_ms + args.lease_ms)
  .. ',"last_progress_at_ms":' .. fmt(args.now_ms) .. '}'
redis.call('HSET', key, 'lease', updated)
return '{"tag":"renewed"}'
"#;

const RECLAIM_LEASE: &str = r#"
local key = jkey(args.job_id)
local f = hget_all(key)
if not f then return '{"tag":"lease_intact"}' end
if f.status ~= 'assigned' and f.status ~= 'running' then
  return '{"tag":"lease_intact"}'
end
if not f.lease then return '{"tag":"lease_intact"}' end
local lease = cjson.decode(f.lease)
if lease.worker_id ~= args.expected_worker then
  return '{"tag":"lease_intact"}'
end
if args.now_ms <= lease.expires_at_ms + args.grace_ms then
  return '{"tag":"lease_intact"}'
end
local attempt = tonumber(f.attempt)
local will_retry = attempt < tonumber(f.max_attempts)
local failure = '{"kind":"lease_expired","message":'
  .. cjson.encode('lease held by ' .. args.expected_worker .. ' expired')
  .. ',"retryable":' .. tostring(will_retry) .. '}'
requeue_or_fail(key, f, will_retry, failure, args.now_ms, args.score_params)
local payload = '{"job_id":' .. cjson.encode(args.job_id)
  .. ',"worker_id":' .. cjson.encode(args.expected_worker)
  .. ',"error":' .. failure
  .. ',"will_retry":' .. tostring(will_retry)
  .. ',"attempt":' .. fmt(attempt)
if f.workflow then payload = payload .. ',"workflow":' .. f.workflow end
if f.webhook then payload = payload .. ',"webhook":' .. cjson.encode(f.webhook) end
payload = payload .. '}'
local record = envelope(
  args.event_id, args.now_ms, f.correlation_id, nil, 'job.failed', payload)
publish('job.failed', record)
return '{"tag":"reclaimed","will_retry":' .. tostring(will_retry)
  .. ',"record":' .. record .. '}'
"#;

const WORKFLOW_STEP: &str = r#"
local key = wkey(args.workflow_id)
local wf = hget_all(key)
if not wf then return '{"tag":"not_found"}' end
local total = tonumber(wf.total_steps)
local idx = args.step_index
if idx >= total then
  return conflict('step index ' .. idx .. ' out of range')
end
-- CAS on the slot: HSETNX fills exactly once under redelivery.
if redis.call('HSETNX', key, 'step:' .. idx, args.detail) == 0 then
  return '{"tag":"step_recorded","first_fill":false}'
end
local completed = tonumber(wf.completed_count)
local failed = tonumber(wf.failed_count)
if args.status == 'completed' then
  completed = redis.call('HINCRBY', key, 'completed_count', 1)
elseif args.status == 'failed' then
  failed = redis.call('HINCRBY', key, 'failed_count', 1)
end
local status = wf.status
if status == 'pending' then
  status = 'running'
  redis.call('HSET', key, 'status', 'running')
end
local cancel_steps = {}
if wf.mode == 'abort_on_failure' and args.status == 'failed'
    and status ~= 'completed' and status ~= 'failed' then
  status = 'failed'
  redis.call('HSET', key, 'status', 'failed')
  local step_jobs = cjson.decode(wf.step_jobs)
  for i = 0, total - 1 do
    if i ~= idx and redis.call('HEXISTS', key, 'step:' .. i) == 0 then
      cancel_steps[#cancel_steps + 1] = step_jobs[i + 1]
    end
  end
end
local step_payload = '{"workflow_id":' .. cjson.encode(args.workflow_id)
  .. ',"step_index":' .. fmt(idx)
  .. ',"job_id":' .. cjson.encode(args.job_id)
  .. ',"status":"' .. args.status .. '"}'
local step_record = envelope(
  args.step_event_id, args.now_ms, nil, args.cause, 'workflow.step_completed', step_payload)
publish('workflow.step_completed', step_record)
local records = step_record
local terminal = nil
local filled = 0
for i = 0, total - 1 do
  if redis.call('HEXISTS', key, 'step:' .. i) == 1 then filled = filled + 1 end
end
if filled == total and wf.terminal_emitted == '0' then
  if status ~= 'completed' and status ~= 'failed' then
    if completed == total then status = 'completed' else status = 'failed' end
    redis.call('HSET', key, 'status', status)
  end
  redis.call('HSET', key, 'terminal_emitted', '1')
  local details = {}
  for i = 0, total - 1 do
    details[#details + 1] = redis.call('HGET', key, 'step:' .. i)
  end
  local typ = 'workflow.completed'
  if status == 'failed' then typ = 'workflow.failed' end
  local payload = '{"workflow_id":' .. cjson.encode(args.workflow_id)
    .. ',"name":' .. cjson.encode(wf.name)
    .. ',"status":"' .. status .. '"'
    .. ',"total_steps":' .. fmt(total)
    .. ',"completed_count":' .. fmt(completed)
    .. ',"failed_count":' .. fmt(failed)
    .. ',"step_details":[' .. table.concat(details, ',') .. ']}'
  local terminal_record = envelope(
    args.terminal_event_id, args.now_ms, nil, args.cause, typ, payload)
  publish(typ, terminal_record)
  records = records .. ',' .. terminal_record
  terminal = status
end
local reply = '{"tag":"step_recorded","first_fill":true,"records":[' .. records .. ']'
if #cancel_steps > 0 then
  reply = reply .. ',"cancel_steps":' .. cjson.encode(cancel_steps)
end
if terminal then reply = reply .. ',"terminal":"' .. terminal .. '"' end
return reply .. '}'
"#;

const AGE_PENDING: &str = r#"
local tail = redis.call('ZRANGE', 'jobs:pending', 0, args.scan_cap - 1, 'WITHSCORES')
local rescored = 0
for i = 1, #tail, 2 do
  local job_id = tail[i]
  local old_score = tonumber(tail[i + 1])
  local fields = redis.call('HMGET', jkey(job_id), 'priority', 'submitted_at_ms', 'attempt')
  if fields[1] then
    local score = pending_score(
      tonumber(fields[1]), tonumber(fields[2]), tonumber(fields[3]),
      args.now_ms, args.score_params)
    if score ~= old_score then
      redis.call('ZADD', 'jobs:pending', tostring(score), job_id)
      rescored = rescored + 1
    end
  end
end
return '{"tag":"aged","rescored":' .. fmt(rescored) .. '}'
"#;

const PUBLISH_EVENT: &str = r#"
local id = publish(args.event_type, args.record)
return '{"tag":"published","stream_id":' .. cjson.encode(id) .. '}'
"#;

/// Full source for a named script.
pub fn source(name: &str) -> String {
    let body = match name {
        "submit_job" => SUBMIT_JOB,
        "submit_workflow" => SUBMIT_WORKFLOW,
        "match_claim" => MATCH_CLAIM,
        "mark_started" => MARK_STARTED,
        "report_progress" => REPORT_PROGRESS,
        "complete_job" => COMPLETE_JOB,
        "fail_job" => FAIL_JOB,
        "cancel_job" => CANCEL_JOB,
        "renew_lease" => RENEW_LEASE,
        "reclaim_lease" => RECLAIM_LEASE,
        "workflow_step" => WORKFLOW_STEP,
        "age_pending" => AGE_PENDING,
        "publish_event" => PUBLISH_EVENT,
        other => unreachable!("unknown script {other}"),
    };
    format!("{PRELUDE}\n{body}")
}

#[cfg(test)]
#[path = "lua_tests.rs"]
mod tests;
