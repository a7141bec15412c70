//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;

use anyhow::{Context, Result};
use clap::Subcommand;
use minihpc_core::CreateJob;
use minihpc_runner::{CliRuntime, Config, Scheduler, SqliteJobStore, Timeouts};
use std::sync::Arc;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Queue a new job
    Add {
        /// Container image to run
        image: String,

        /// Shell command executed inside the container
        command: String,

        /// Human-readable job name
        #[arg(long)]
        name: Option<String>,

        /// Whole CPU cores
        #[arg(long)]
        cpu: Option<u32>,

        /// Memory ceiling in bytes
        #[arg(long)]
        memory: Option<u64>,
    },
    /// List pending jobs in queue order
    List,
    /// Run the next pending job, or a specific one
    Run {
        /// Job ID or unambiguous prefix
        id: Option<String>,

        /// Run every pending job until the queue is empty
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
    /// List every recorded job
    History,
    /// Show a job record including its log
    Show {
        /// Job ID or unambiguous prefix
        id: String,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The loaded configuration
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Add {
            image,
            command,
            name,
            cpu,
            memory,
        } => {
            let request = CreateJob {
                name,
                image,
                command,
                cpu: cpu.unwrap_or(config.default_cpu),
                memory: memory.unwrap_or(config.default_memory),
            };
            job::add_job(config, request).await
        }
        Commands::List => job::list_pending(config).await,
        Commands::Run { id, all } => job::run_jobs(config, id.as_deref(), all).await,
        Commands::History => job::history(config).await,
        Commands::Show { id, json } => job::show_job(config, &id, json).await,
    }
}

/// Open the job database
async fn open_store(config: &Config) -> Result<SqliteJobStore> {
    SqliteJobStore::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open job database at {}", config.database_url))
}

/// Build a scheduler over the configured store and container runtime
///
/// The queue is rehydrated from the store's pending records.
async fn build_scheduler(config: &Config, store: SqliteJobStore) -> Result<Scheduler> {
    let runtime = CliRuntime::connect(config.runtime.as_str())
        .await
        .with_context(|| format!("Container runtime '{}' is not usable", config.runtime))?;

    Scheduler::new(Arc::new(store), Arc::new(runtime), Timeouts::from(config))
        .await
        .context("Failed to load jobs from the store")
}
