//! Job command handlers
//!
//! Handles queueing, listing, running and inspecting jobs.

use anyhow::{Context, Result, anyhow};
use colored::*;
use minihpc_core::domain::job::{Job, JobStatus};
use minihpc_core::dto::job::CreateJob;
use minihpc_runner::{Config, EnqueueError, JobStore, RunOutcome, SqliteJobStore};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{build_scheduler, open_store};
use crate::id_resolver::resolve_job_id;
use crate::types::IdOrPrefix;

const NO_PENDING_MATCH: &str = "No pending job matches";

/// Validate, queue and persist a new job
pub async fn add_job(config: &Config, request: CreateJob) -> Result<()> {
    request.validate().context("Invalid job")?;

    let store = open_store(config).await?;
    let mut scheduler = build_scheduler(config, store).await?;

    let job = Job::new(request);
    let id = job.id;
    let name = job.name.clone();

    match scheduler.add_job(job).await {
        Ok(()) => {
            println!("{}", "Job queued".green().bold());
            println!("  ID:   {}", id.to_string().cyan());
            println!("  Name: {}", name);
            Ok(())
        }
        Err(e @ EnqueueError::Persist { .. }) => {
            println!("{} {}", "Warning:".yellow().bold(), e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// List pending jobs in queue order
pub async fn list_pending(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let scheduler = build_scheduler(config, store).await?;
    let jobs = scheduler.list_pending();

    if jobs.is_empty() {
        println!("{}", "No pending jobs.".yellow());
    } else {
        println!("{}", format!("{} pending job(s):", jobs.len()).bold());
        println!();
        for job in &jobs {
            print_job_summary(job);
        }
    }

    Ok(())
}

/// Run one job (the head of the queue or the given one) or drain the queue
pub async fn run_jobs(config: &Config, id: Option<&str>, all: bool) -> Result<()> {
    let store = open_store(config).await?;
    let mut scheduler = build_scheduler(config, store.clone()).await?;
    let cancel = cancel_on_ctrl_c();

    if all {
        let mut ran = 0usize;
        loop {
            if cancel.is_cancelled() {
                println!("{}", "Interrupted, remaining jobs stay queued.".yellow());
                break;
            }
            match scheduler.run_next(&cancel).await {
                RunOutcome::Empty => break,
                outcome => {
                    ran += 1;
                    report_outcome(&store, &outcome).await?;
                }
            }
        }
        if ran == 0 {
            println!("{}", "No pending jobs.".yellow());
        }
        return Ok(());
    }

    let outcome = match id {
        Some(id) => {
            let id_or_prefix = IdOrPrefix::parse(id);
            match resolve_job_id(&scheduler.list_pending(), &id_or_prefix)? {
                Some(uuid) => scheduler.run_by_id(uuid, &cancel).await,
                None => {
                    println!("{} {}", NO_PENDING_MATCH.yellow(), id_or_prefix);
                    return Ok(());
                }
            }
        }
        None => scheduler.run_next(&cancel).await,
    };

    report_outcome(&store, &outcome).await
}

/// List every recorded job in storage order
pub async fn history(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let jobs = store.load_all().await.context("Failed to load jobs")?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in &jobs {
            print_job_summary(job);
        }
    }

    Ok(())
}

/// Show a single job record
pub async fn show_job(config: &Config, id: &str, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let jobs = store.load_all().await.context("Failed to load jobs")?;

    let id_or_prefix = IdOrPrefix::parse(id);
    let uuid = resolve_job_id(&jobs, &id_or_prefix)?
        .ok_or_else(|| anyhow!("No job matches '{}'", id_or_prefix))?;

    let job = store
        .find_by_id(uuid)
        .await?
        .ok_or_else(|| anyhow!("Job {} not found", uuid))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        print_job_details(&job);
    }

    Ok(())
}

/// Token cancelled on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the running job");
            child.cancel();
        }
    });
    token
}

/// Print the result of a run request, re-reading the stored record
async fn report_outcome(store: &SqliteJobStore, outcome: &RunOutcome) -> Result<()> {
    match outcome {
        RunOutcome::Empty => println!("{}", "No pending jobs.".yellow()),
        RunOutcome::NotFound(id) => println!("{} {}", NO_PENDING_MATCH.yellow(), id),
        RunOutcome::Finished { id, status } => match store.find_by_id(*id).await? {
            Some(job) => print_job_details(&job),
            None => println!("Job {} finished: {}", id, colorize_status(status)),
        },
    }
    Ok(())
}

/// Print a one-line job summary
fn print_job_summary(job: &Job) {
    println!(
        "  {} {} [{}]",
        job.id.to_string()[..8].cyan(),
        job.name.bold(),
        colorize_status(&job.status)
    );
    println!("    {} {}", job.image.dimmed(), job.command.dimmed());
    println!("    Created: {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!();
}

/// Print full job details
fn print_job_details(job: &Job) {
    println!("{}", "Job Details:".bold());
    println!("  ID:          {}", job.id.to_string().cyan());
    println!("  Name:        {}", job.name);
    println!("  Status:      {}", colorize_status(&job.status));
    println!("  Image:       {}", job.image);
    println!("  Command:     {}", job.command);
    println!("  CPU:         {}", job.cpu);
    println!("  Memory:      {} bytes", job.memory);
    println!(
        "  Created:     {}",
        job.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(started) = job.started_at {
        println!("  Started:     {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(completed) = job.completed_at {
        println!("  Completed:   {}", completed.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = job.started_at {
            let duration = completed.signed_duration_since(started);
            println!("  Duration:    {}s", duration.num_seconds());
        }
    }

    if let Some(code) = job.exit_code {
        let shown = code.to_string();
        let shown = if code == 0 { shown.green() } else { shown.red() };
        println!("  Exit Code:   {}", shown);
    }

    if let Some(error) = &job.error {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }

    if !job.log.is_empty() {
        println!("\n{}", "Log:".bold());
        print!("{}", job.log);
        if !job.log.ends_with('\n') {
            println!();
        }
    }
}

/// Colorize job status for display
fn colorize_status(status: &JobStatus) -> colored::ColoredString {
    let status_str = status.as_str();
    match status {
        JobStatus::Pending => status_str.yellow(),
        JobStatus::Running => status_str.cyan(),
        JobStatus::Complete => status_str.green(),
        JobStatus::Failed => status_str.red(),
    }
}
