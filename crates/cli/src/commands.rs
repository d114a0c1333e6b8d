// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command implementations for the `yard` client.

use crate::client::{send_expecting_ok, CliError};
use crate::output;
use clap::Subcommand;
use std::collections::BTreeSet;
use yard_core::{JobSpec, JobStatus, Requirements, WorkflowMode};
use yard_wire::{Query, Request, Response};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a single job
    Submit {
        /// Service family tag, e.g. image-gen-sdxl
        service_type: String,
        /// Inline JSON payload, or @path to read a file
        #[arg(long, default_value = "{}")]
        payload: String,
        #[arg(long, default_value_t = 0)]
        priority: i32,
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,
        /// Required capability tags (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        min_gpu_memory_mb: Option<u32>,
        #[arg(long)]
        correlation_id: Option<String>,
        #[arg(long)]
        customer_id: Option<String>,
    },

    /// Show a job
    Job {
        id: String,
        #[arg(long)]
        json: bool,
    },

    /// List jobs
    Jobs {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        service_type: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },

    /// Cancel a job
    Cancel { id: String },

    /// Workflow operations
    #[command(subcommand)]
    Workflow(WorkflowCommand),

    /// Webhook registry operations
    #[command(subcommand)]
    Webhook(WebhookCommand),

    /// List registered workers
    Workers {
        #[arg(long)]
        json: bool,
    },

    /// Broker health snapshot
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Stop the broker
    Shutdown,
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommand {
    /// Submit a workflow: steps come from a JSON file (array of job specs)
    Submit {
        name: String,
        /// Path to a JSON array of job specs
        steps: String,
        #[arg(long, value_parser = parse_mode)]
        mode: Option<WorkflowMode>,
    },

    /// Show a workflow with its canonical step details
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },

    /// Cancel a workflow's non-terminal steps
    Cancel { id: String },
}

#[derive(Subcommand, Debug)]
pub enum WebhookCommand {
    /// Register an endpoint
    Add {
        url: String,
        /// Event types to deliver (repeatable)
        #[arg(long = "event", required = true)]
        events: Vec<String>,
        #[arg(long)]
        secret: String,
    },

    /// List all endpoints, active and inactive
    List {
        #[arg(long)]
        json: bool,
    },

    /// Enable or disable an endpoint
    SetActive {
        id: String,
        #[arg(long)]
        active: bool,
    },

    /// Delete an endpoint
    Remove { id: String },
}

fn parse_mode(raw: &str) -> Result<WorkflowMode, String> {
    WorkflowMode::parse(raw)
        .ok_or_else(|| "expected abort_on_failure or run_to_completion".to_string())
}

/// Resolve `@file` payload arguments.
fn parse_payload(raw: &str) -> Result<serde_json::Value, CliError> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| CliError::usage(format!("cannot read {path}: {e}")))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).map_err(|e| CliError::usage(format!("invalid payload: {e}")))
}

pub async fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Submit {
            service_type,
            payload,
            priority,
            max_attempts,
            tags,
            min_gpu_memory_mb,
            correlation_id,
            customer_id,
        } => {
            let spec = JobSpec {
                service_type,
                requirements: Requirements {
                    capability_tags: tags.into_iter().collect::<BTreeSet<String>>(),
                    min_gpu_memory_mb,
                    ..Requirements::default()
                },
                payload: parse_payload(&payload)?,
                priority,
                max_attempts,
                correlation_id,
                customer_id,
                webhook: None,
            };
            match send_expecting_ok(Request::SubmitJob { spec }).await? {
                Response::JobSubmitted { job_id, deduplicated } => {
                    if deduplicated {
                        println!("{job_id} (existing submission)");
                    } else {
                        println!("{job_id}");
                    }
                    Ok(())
                }
                other => Err(unexpected(other)),
            }
        }

        Command::Job { id, json } => {
            match send_expecting_ok(Request::GetJob { id: id.as_str().into() }).await? {
                Response::Job { job: Some(view) } => {
                    output::print_job(&view, json);
                    Ok(())
                }
                Response::Job { job: None } => Err(CliError::not_found(format!("job {id} not found"))),
                other => Err(unexpected(other)),
            }
        }

        Command::Jobs { status, service_type, limit, json } => {
            let status = match status.as_deref() {
                None => None,
                Some(raw) => Some(JobStatus::parse(raw).ok_or_else(|| {
                    CliError::usage(format!("unknown status {raw:?}"))
                })?),
            };
            let query = Query::Jobs { status, service_type, limit };
            match send_expecting_ok(Request::Query { query }).await? {
                Response::Jobs { jobs } => {
                    output::print_jobs(&jobs, json);
                    Ok(())
                }
                other => Err(unexpected(other)),
            }
        }

        Command::Cancel { id } => {
            send_expecting_ok(Request::CancelJob { id: id.as_str().into() }).await?;
            println!("cancelled {id}");
            Ok(())
        }

        Command::Workflow(command) => run_workflow(command).await,
        Command::Webhook(command) => run_webhook(command).await,

        Command::Workers { json } => {
            match send_expecting_ok(Request::Query { query: Query::Workers }).await? {
                Response::Workers { workers } => {
                    output::print_workers(&workers, json);
                    Ok(())
                }
                other => Err(unexpected(other)),
            }
        }

        Command::Status { json } => {
            match send_expecting_ok(Request::Query { query: Query::Status }).await? {
                Response::Status { status } => {
                    output::print_status(&status, json);
                    Ok(())
                }
                other => Err(unexpected(other)),
            }
        }

        Command::Shutdown => {
            send_expecting_ok(Request::Shutdown).await?;
            println!("broker shutting down");
            Ok(())
        }
    }
}

async fn run_workflow(command: WorkflowCommand) -> Result<(), CliError> {
    match command {
        WorkflowCommand::Submit { name, steps, mode } => {
            let raw = std::fs::read_to_string(&steps)
                .map_err(|e| CliError::usage(format!("cannot read {steps}: {e}")))?;
            let specs: Vec<JobSpec> = serde_json::from_str(&raw)
                .map_err(|e| CliError::usage(format!("invalid steps file: {e}")))?;
            match send_expecting_ok(Request::SubmitWorkflow {
                name,
                steps: specs,
                mode,
                webhook: None,
            })
            .await?
            {
                Response::WorkflowSubmitted { workflow_id, job_ids } => {
                    println!("{workflow_id}");
                    for job_id in job_ids {
                        println!("  {job_id}");
                    }
                    Ok(())
                }
                other => Err(unexpected(other)),
            }
        }

        WorkflowCommand::Show { id, json } => {
            match send_expecting_ok(Request::GetWorkflow { id: id.as_str().into() }).await? {
                Response::Workflow { workflow: Some(view) } => {
                    output::print_workflow(&view, json);
                    Ok(())
                }
                Response::Workflow { workflow: None } => {
                    Err(CliError::not_found(format!("workflow {id} not found")))
                }
                other => Err(unexpected(other)),
            }
        }

        WorkflowCommand::Cancel { id } => {
            send_expecting_ok(Request::CancelWorkflow { id: id.as_str().into() }).await?;
            println!("cancelled {id}");
            Ok(())
        }
    }
}

async fn run_webhook(command: WebhookCommand) -> Result<(), CliError> {
    match command {
        WebhookCommand::Add { url, events, secret } => {
            match send_expecting_ok(Request::RegisterWebhook {
                url,
                event_types: events,
                secret,
            })
            .await?
            {
                Response::WebhookRegistered { webhook_id } => {
                    println!("{webhook_id}");
                    Ok(())
                }
                other => Err(unexpected(other)),
            }
        }

        WebhookCommand::List { json } => {
            match send_expecting_ok(Request::ListWebhooks).await? {
                Response::Webhooks { webhooks } => {
                    output::print_webhooks(&webhooks, json);
                    Ok(())
                }
                other => Err(unexpected(other)),
            }
        }

        WebhookCommand::SetActive { id, active } => {
            send_expecting_ok(Request::UpdateWebhook { id: id.as_str().into(), active }).await?;
            Ok(())
        }

        WebhookCommand::Remove { id } => {
            send_expecting_ok(Request::DeleteWebhook { id: id.as_str().into() }).await?;
            Ok(())
        }
    }
}

fn unexpected(response: Response) -> CliError {
    CliError::Unexpected(format!("{response:?}"))
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
