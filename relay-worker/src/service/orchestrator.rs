//! Build orchestrator
//!
//! Drives one build record to a terminal status:
//! 1. Entry checks (missing, already finished, stopped before starting)
//! 2. Attach to a running remote build or trigger a new one
//! 3. Collect console output until the build ends, stalls or is stopped
//! 4. Write the final status and checkpoint
//!
//! Whatever goes wrong, a run never leaves the record in an active status.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use relay_core::domain::build::{BuildRecord, BuildStatus};
use relay_core::domain::checkpoint::LogCheckpoint;
use relay_core::domain::result::RemoteResult;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::collector::{Collector, Finish, FinishReason};
use super::error::OrchestratorError;
use crate::clock::Clock;
use crate::repository::{
    BuildAssignment, BuildRecordGateway, CheckpointStore, LogSink, RemoteRunner,
};

/// Timing knobs of a run
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Delay between log fetches
    pub poll_interval: Duration,
    /// Minimum delay between record re-reads looking for a stop marker
    pub record_refresh_interval: Duration,
    /// Time without any sign of life after which the build counts as over
    pub stability_timeout: Duration,
    /// Time allowed for the remote to assign a build number
    pub build_number_timeout: Duration,
    /// Delay between queue polls
    pub queue_poll_interval: Duration,
    /// Upper bound on draining after a stop request
    pub drain_timeout: Duration,
    /// Attempts for trigger and stop requests
    pub request_attempts: u32,
    /// Delay between those attempts
    pub retry_delay: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            record_refresh_interval: Duration::from_secs(5),
            stability_timeout: Duration::from_secs(15),
            build_number_timeout: Duration::from_secs(30),
            queue_poll_interval: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(300),
            request_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// This run wrote the terminal status
    Finished(BuildStatus),
    /// The record was already terminal; nothing was done
    AlreadyFinished(BuildStatus),
    /// No such record
    NotFound,
}

/// Orchestrates builds against injected collaborators
pub struct BuildOrchestrator {
    pub(super) remote: Arc<dyn RemoteRunner>,
    pub(super) records: Arc<dyn BuildRecordGateway>,
    pub(super) logs: Arc<dyn LogSink>,
    pub(super) checkpoints: Arc<dyn CheckpointStore>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) settings: PollSettings,
}

impl BuildOrchestrator {
    pub fn new(
        remote: Arc<dyn RemoteRunner>,
        records: Arc<dyn BuildRecordGateway>,
        logs: Arc<dyn LogSink>,
        checkpoints: Arc<dyn CheckpointStore>,
        clock: Arc<dyn Clock>,
        settings: PollSettings,
    ) -> Self {
        Self {
            remote,
            records,
            logs,
            checkpoints,
            clock,
            settings,
        }
    }

    /// Drives the record `id` until it reaches a terminal status
    ///
    /// Errors never escape: they are logged and the record is forced to
    /// FAILED.
    pub async fn run(&self, id: Uuid) -> RunOutcome {
        info!("Orchestrating build record {}", id);

        match self.drive(id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Build record {} failed: {:#}", id, e);
                self.force_failed(id).await;
                RunOutcome::Finished(BuildStatus::Failed)
            }
        }
    }

    async fn drive(&self, id: Uuid) -> Result<RunOutcome, OrchestratorError> {
        let Some(record) = self
            .records
            .get(id)
            .await
            .context("Failed to load build record")?
        else {
            warn!("Build record {} does not exist", id);
            return Ok(RunOutcome::NotFound);
        };

        if record.status.is_terminal() {
            info!("Build {} already finished with {}", record, record.status);
            return Ok(RunOutcome::AlreadyFinished(record.status));
        }

        if record.status == BuildStatus::StopRequested && record.build_number.is_none() {
            info!("Stop requested for {} before a build started", record);
            self.records
                .finish(id, BuildStatus::Stopped, self.end_time(record.started_at))
                .await
                .context("Failed to mark build stopped")?;
            return Ok(RunOutcome::Finished(BuildStatus::Stopped));
        }

        let number = self.resolve_build_number(&record).await?;

        // Persisted before collecting so a crash from here on can reattach
        let record = self
            .records
            .assign_build(
                id,
                BuildAssignment {
                    build_number: number,
                    started_at: self.clock.utc_now(),
                    log_location: self.log_location(&record.job_name, number),
                },
            )
            .await
            .context("Failed to record build number")?;
        info!("Build {} is running (record {})", record, id);

        let offset = self.resume_offset(&record.job_name, number).await?;
        let finish = Collector::new(self, &record, number, offset).run().await;
        let status = self.finalize(&record, number, finish).await?;

        Ok(RunOutcome::Finished(status))
    }

    async fn resume_offset(&self, job_name: &str, number: u64) -> Result<u64, OrchestratorError> {
        let checkpoint = self
            .checkpoints
            .read(job_name, number)
            .await
            .context("Failed to read checkpoint")?;

        match checkpoint {
            Some(checkpoint) => {
                info!(
                    "Resuming {} #{} from offset {}",
                    job_name, number, checkpoint.offset
                );
                Ok(checkpoint.offset)
            }
            None => Ok(0),
        }
    }

    fn log_location(&self, job_name: &str, number: u64) -> Option<String> {
        match self.logs.location(job_name, number) {
            Ok(location) => Some(location),
            Err(e) => {
                warn!("No log location for {} #{}: {:#}", job_name, number, e);
                None
            }
        }
    }

    // =============================================================================
    // Finalization
    // =============================================================================

    async fn finalize(
        &self,
        record: &BuildRecord,
        number: u64,
        finish: Finish,
    ) -> Result<BuildStatus, OrchestratorError> {
        let result = match finish.result {
            Some(result) => Some(result),
            None => self.final_result(&record.job_name, number).await,
        };

        let status = match (finish.reason, result) {
            (FinishReason::Stopped, Some(result)) => result.stopped_status(),
            (FinishReason::Stopped, None) => BuildStatus::Stopped,
            (_, Some(result)) => result.completed_status(),
            (_, None) => BuildStatus::Failed,
        };

        let ended_at = self.end_time(record.started_at);
        self.records
            .finish(record.id, status, ended_at)
            .await
            .context("Failed to write final status")?;

        let checkpoint = LogCheckpoint {
            status,
            started_at: record.started_at,
            ended_at: Some(ended_at),
            offset: finish.offset,
        };
        if let Err(e) = self
            .checkpoints
            .write(&record.job_name, number, &checkpoint)
            .await
        {
            warn!("Failed to write final checkpoint for {}: {:#}", record, e);
        }

        info!(
            "Build {} finished with {} ({:?}, offset {})",
            record, status, finish.reason, finish.offset
        );
        Ok(status)
    }

    /// Fetches the remote result once; `None` when the remote cannot be reached
    async fn final_result(&self, job_name: &str, number: u64) -> Option<RemoteResult> {
        match self.remote.get_build(job_name, number).await {
            Ok(info) => {
                if info.building {
                    warn!("{} #{} still reports building at finalization", job_name, number);
                }
                Some(RemoteResult::from_raw(info.result.as_deref()))
            }
            Err(e) => {
                warn!("Failed to fetch final result of {} #{}: {}", job_name, number, e);
                None
            }
        }
    }

    async fn force_failed(&self, id: Uuid) {
        let started_at = match self.records.get(id).await {
            Ok(Some(record)) if record.status.is_terminal() => return,
            Ok(Some(record)) => record.started_at,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to reload build record {}: {:#}", id, e);
                None
            }
        };

        if let Err(e) = self
            .records
            .finish(id, BuildStatus::Failed, self.end_time(started_at))
            .await
        {
            error!("Failed to mark build record {} FAILED: {:#}", id, e);
        }
    }

    /// End time that is never before the start time
    fn end_time(&self, started_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let now = self.clock.utc_now();
        match started_at {
            Some(started_at) if started_at > now => started_at,
            _ => now,
        }
    }

    // =============================================================================
    // Retries
    // =============================================================================

    /// Retries a remote call a fixed number of times
    ///
    /// 4xx responses are returned immediately.
    pub(super) async fn with_retries<T, F, Fut>(
        &self,
        what: &str,
        mut op: F,
    ) -> relay_client::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = relay_client::Result<T>>,
    {
        let attempts = self.settings.request_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts || e.is_client_error() => return Err(e),
                Err(e) => {
                    warn!("{} attempt {}/{} failed: {}", what, attempt, attempts, e);
                    self.clock.sleep(self.settings.retry_delay).await;
                }
            }
        }
    }
}
