//! minihpc CLI
//!
//! Command-line interface for queueing and running containerized jobs.

mod commands;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use minihpc_runner::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minihpc")]
#[command(about = "Minimal containerized job manager", long_about = None)]
struct Cli {
    /// SQLite database URL
    #[arg(long, env = "MINIHPC_DATABASE_URL")]
    database_url: Option<String>,

    /// Container CLI used to run jobs (podman or docker)
    #[arg(long, env = "MINIHPC_RUNTIME")]
    runtime: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "minihpc_runner=info,minihpc_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }
    if let Some(runtime) = cli.runtime {
        config.runtime = runtime;
    }
    config.validate()?;

    handle_command(cli.command, &config).await
}
