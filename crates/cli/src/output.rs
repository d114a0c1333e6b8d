// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human and JSON rendering of broker views.

use yard_wire::{BrokerStatus, JobSummary, JobView, WebhookView, WorkerView, WorkflowView};

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("cannot encode output: {e}"),
    }
}

pub fn print_job(view: &JobView, json: bool) {
    if json {
        return print_json(view);
    }
    println!("{}  {}  {}", view.id, view.service_type, view.status);
    println!(
        "  priority {}  attempt {}/{}  progress {:.0}%",
        view.priority,
        view.attempt,
        view.max_attempts,
        view.progress * 100.0
    );
    if let Some(lease) = &view.lease {
        println!("  leased to {} until {}", lease.worker_id, lease.expires_at_ms);
    }
    if let Some(workflow) = &view.workflow {
        println!("  workflow {} step {}", workflow.workflow_id, workflow.step_index);
    }
    if let Some(error) = &view.error {
        println!("  error [{}] {} (retryable: {})", error.kind, error.message, error.retryable);
    }
    if let Some(result) = &view.result {
        println!("  result {result}");
    }
}

pub fn print_jobs(jobs: &[JobSummary], json: bool) {
    if json {
        return print_json(&jobs);
    }
    for job in jobs {
        println!(
            "{}  {}  {}  priority {}  attempt {}",
            job.id, job.service_type, job.status, job.priority, job.attempt
        );
    }
    if jobs.is_empty() {
        println!("no jobs");
    }
}

pub fn print_workflow(view: &WorkflowView, json: bool) {
    if json {
        return print_json(view);
    }
    println!("{}  {}  {}  ({} steps)", view.id, view.name, view.status, view.total_steps);
    for (index, slot) in view.step_details.iter().enumerate() {
        match slot {
            Some(detail) => {
                println!("  step {}: {}  {}", index, detail.job_id, detail.status)
            }
            None => println!("  step {}: {}  pending", index, view.step_jobs[index]),
        }
    }
}

pub fn print_workers(workers: &[WorkerView], json: bool) {
    if json {
        return print_json(&workers);
    }
    for worker in workers {
        println!(
            "{}  {}  {}  {} MB  active {}  failures {}",
            worker.id,
            worker.machine_id,
            worker.state,
            worker.gpu_memory_mb,
            worker.active_jobs,
            worker.recent_failure_count
        );
    }
    if workers.is_empty() {
        println!("no workers");
    }
}

pub fn print_webhooks(webhooks: &[WebhookView], json: bool) {
    if json {
        return print_json(&webhooks);
    }
    for hook in webhooks {
        let state = if hook.active { "active" } else { "inactive" };
        println!("{}  {}  {}  [{}]", hook.id, hook.url, state, hook.event_types.join(", "));
    }
    if webhooks.is_empty() {
        println!("no webhooks");
    }
}

pub fn print_status(status: &BrokerStatus, json: bool) {
    if json {
        return print_json(status);
    }
    let store = if status.store_healthy { "healthy" } else { "unreachable" };
    println!("uptime {}s  store {}", status.uptime_secs, store);
    println!(
        "jobs: {} pending, {} active, {} terminal",
        status.pending_jobs, status.active_jobs, status.terminal_jobs
    );
    println!("workers: {}", status.workers);
}
