//! Relay Worker
//!
//! Triggers builds on a remote CI job runner, mirrors their console output
//! and records their outcome.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repositories: remote runner, build records, log sink, checkpoints
//! - Services: the orchestrator driving one build record to completion
//! - Scheduler: picks up unfinished records and runs them concurrently
//!
//! A record created PENDING is driven until it reaches a terminal status.
//! Checkpoints let a restarted worker reattach to builds still running.

mod clock;
mod commands;
mod config;
mod db;
mod repository;
mod scheduler;
mod service;

#[cfg(test)]
mod test_support;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{Commands, handle_command};
use crate::config::Config;

#[derive(Parser)]
#[command(name = "relay-worker")]
#[command(about = "Remote CI build orchestrator and log mirror", long_about = None)]
struct Cli {
    /// Build record store, overrides DATABASE_URL from the environment
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }
    config.validate()?;

    info!(
        "Loaded configuration: jenkins_url={}, log_root={}",
        config.jenkins_url,
        config.log_root.display()
    );

    handle_command(cli.command, &config).await
}
