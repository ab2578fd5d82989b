//! Orchestration commands

use std::sync::Arc;

use anyhow::{Result, bail};
use colored::*;
use tracing::info;
use uuid::Uuid;

use super::Services;
use crate::config::Config;
use crate::scheduler::BuildDispatcher;
use crate::service::RunOutcome;

pub(super) async fn work(config: &Config, services: &Services) -> Result<()> {
    info!(
        "Dispatching up to {} build(s) against {}",
        config.max_parallel_builds, config.jenkins_url
    );

    let dispatcher = BuildDispatcher::new(
        Arc::new(services.orchestrator(config)),
        services.records.clone(),
        config.dispatch_interval,
        config.max_parallel_builds,
    );

    dispatcher.run().await
}

pub(super) async fn run_one(config: &Config, services: &Services, id: Uuid) -> Result<()> {
    let orchestrator = services.orchestrator(config);

    match orchestrator.run(id).await {
        RunOutcome::Finished(status) => {
            println!("Build {} finished: {}", id.to_string().dimmed(), status);
            Ok(())
        }
        RunOutcome::AlreadyFinished(status) => {
            println!(
                "{}",
                format!("Build {} had already finished: {}", id, status).yellow()
            );
            Ok(())
        }
        RunOutcome::NotFound => bail!("Build record {} not found", id),
    }
}
