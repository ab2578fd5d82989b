//! Commands module
//!
//! Defines the worker subcommands and wires the collaborators they need.

mod builds;
mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use relay_client::RunnerClient;
use tracing::info;
use uuid::Uuid;

use crate::clock::SystemClock;
use crate::config::Config;
use crate::db;
use crate::repository::{BuildLayout, FileCheckpointStore, FileLogSink, PgBuildRecordGateway};
use crate::service::BuildOrchestrator;

/// Top-level worker commands
#[derive(Subcommand)]
pub enum Commands {
    /// Drive unfinished builds until interrupted
    Work,
    /// Drive one build record to completion in the foreground
    Run {
        /// Build record ID
        id: Uuid,
    },
    /// Create a pending build record for a job
    Start {
        /// Remote job name
        job: String,
    },
    /// Ask the worker driving a build to stop it
    Stop {
        /// Build record ID
        id: Uuid,
    },
    /// List the most recent build records, newest first
    List {
        /// Maximum number of records to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show a build record
    Status {
        /// Build record ID
        id: Uuid,
    },
    /// Show mirrored console output
    Logs {
        /// Build record ID
        id: Uuid,

        /// Number of trailing lines to show
        #[arg(long, default_value_t = 1000)]
        last: usize,

        /// Show the whole log instead of the tail
        #[arg(long)]
        full: bool,
    },
}

/// Handle a worker command
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let services = Services::connect(config).await?;

    match command {
        Commands::Work => worker::work(config, &services).await,
        Commands::Run { id } => worker::run_one(config, &services, id).await,
        Commands::Start { job } => builds::start(services.records.as_ref(), &job).await,
        Commands::Stop { id } => builds::stop(services.records.as_ref(), id).await,
        Commands::List { limit } => builds::list(services.records.as_ref(), limit).await,
        Commands::Status { id } => builds::status(services.records.as_ref(), id).await,
        Commands::Logs { id, last, full } => {
            let lines = if full { None } else { Some(last) };
            builds::logs(services.records.as_ref(), services.logs.as_ref(), id, lines).await
        }
    }
}

/// Storage shared by every command
struct Services {
    records: Arc<PgBuildRecordGateway>,
    logs: Arc<FileLogSink>,
    checkpoints: Arc<FileCheckpointStore>,
}

impl Services {
    async fn connect(config: &Config) -> Result<Self> {
        let pool = db::create_pool(&config.database_url)
            .await
            .context("Failed to connect to the record store")?;
        db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        let layout = BuildLayout::new(config.log_root.clone());
        info!("Mirroring logs under {}", layout.root().display());

        Ok(Self {
            records: Arc::new(PgBuildRecordGateway::new(pool)),
            logs: Arc::new(FileLogSink::new(layout.clone())),
            checkpoints: Arc::new(FileCheckpointStore::new(layout)),
        })
    }

    fn orchestrator(&self, config: &Config) -> BuildOrchestrator {
        let mut client = RunnerClient::new(config.jenkins_url.clone());
        if let (Some(user), Some(token)) = (&config.jenkins_user, &config.jenkins_token) {
            client = client.with_credentials(user.clone(), token.clone());
        }

        BuildOrchestrator::new(
            Arc::new(client),
            self.records.clone(),
            self.logs.clone(),
            self.checkpoints.clone(),
            Arc::new(SystemClock),
            config.poll_settings(),
        )
    }
}
