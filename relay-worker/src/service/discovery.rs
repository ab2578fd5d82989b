//! Trigger/attach phase
//!
//! Finds the remote build a record should follow: the one already recorded,
//! one already running or queued for the job, or a freshly triggered one.

use anyhow::Context;
use relay_core::domain::build::BuildRecord;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::OrchestratorError;
use super::orchestrator::BuildOrchestrator;

impl BuildOrchestrator {
    pub(super) async fn resolve_build_number(
        &self,
        record: &BuildRecord,
    ) -> Result<u64, OrchestratorError> {
        let job = record.job_name.as_str();

        if let Some(number) = record.build_number {
            info!("Attaching to {} #{} recorded earlier", job, number);
            return Ok(number);
        }

        // Ok(None) means the job has never been built
        let baseline = match self
            .with_retries(&format!("Inspection of {}", job), || self.remote.get_job(job))
            .await
        {
            Ok(info) => {
                if let Some(last) = &info.last_build {
                    if self.is_building(job, last.number).await {
                        info!("Attaching to {} #{} already running remotely", job, last.number);
                        return Ok(last.number);
                    }
                }

                if let Some(item) = info.queue_item.as_ref().filter(|_| info.in_queue) {
                    info!("{} is already queued remotely (item {})", job, item.id);
                    self.mark_queued(record.id).await?;
                    let url = self.remote.queue_item_url(item.id);
                    return self.wait_for_queue_item(job, &url).await;
                }

                Ok(info.latest_number())
            }
            Err(e) => {
                warn!("Could not inspect {} before triggering: {}", job, e);
                Err(e)
            }
        };

        let receipt = self
            .with_retries(&format!("Trigger of {}", job), || {
                self.remote.trigger_build(job)
            })
            .await
            .map_err(|e| OrchestratorError::TriggerRejected {
                job: job.to_string(),
                reason: e.to_string(),
            })?;
        info!("Triggered {}", job);

        self.mark_queued(record.id).await?;

        match (receipt.queue_url, baseline) {
            (Some(url), _) => self.wait_for_queue_item(job, &url).await,
            (None, Ok(baseline)) => {
                info!("No queue location for {}, watching its build list", job);
                self.wait_for_new_build(job, baseline).await
            }
            // Any build in the list could predate the trigger
            (None, Err(e)) => Err(OrchestratorError::UnknownBaseline {
                job: job.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn is_building(&self, job: &str, number: u64) -> bool {
        match self.remote.get_build(job, number).await {
            Ok(info) => info.building,
            Err(e) if e.is_not_found() => {
                debug!("{} #{} no longer exists: {}", job, number, e);
                false
            }
            Err(e) => {
                warn!("Could not check {} #{}: {}", job, number, e);
                false
            }
        }
    }

    async fn mark_queued(&self, id: Uuid) -> Result<(), OrchestratorError> {
        self.records
            .mark_queued(id)
            .await
            .context("Failed to mark build queued")?;
        Ok(())
    }

    /// Polls a queue item until it turns into a build
    async fn wait_for_queue_item(&self, job: &str, url: &str) -> Result<u64, OrchestratorError> {
        let started = self.clock.now();

        loop {
            match self.remote.get_queue_item(url).await {
                Ok(item) => {
                    if let Some(executable) = item.executable {
                        info!("{} left the queue as #{}", job, executable.number);
                        return Ok(executable.number);
                    }
                    if item.cancelled {
                        return Err(OrchestratorError::QueueCancelled {
                            job: job.to_string(),
                            reason: item.why.unwrap_or_else(|| "no reason given".to_string()),
                        });
                    }
                    debug!(
                        "{} still queued: {}",
                        job,
                        item.why.as_deref().unwrap_or("waiting")
                    );
                }
                Err(e) => warn!("Failed to poll queue item {}: {}", url, e),
            }

            self.wait_or_give_up(job, started).await?;
        }
    }

    /// Polls the job's build list for a build newer than `baseline`
    async fn wait_for_new_build(
        &self,
        job: &str,
        baseline: Option<u64>,
    ) -> Result<u64, OrchestratorError> {
        let started = self.clock.now();

        loop {
            match self.remote.get_job(job).await {
                Ok(info) => {
                    let newer = info.latest_number().filter(|number| match baseline {
                        Some(baseline) => *number > baseline,
                        None => true,
                    });
                    if let Some(number) = newer {
                        info!("{} started as #{}", job, number);
                        return Ok(number);
                    }
                }
                Err(e) => warn!("Failed to list builds of {}: {}", job, e),
            }

            self.wait_or_give_up(job, started).await?;
        }
    }

    async fn wait_or_give_up(
        &self,
        job: &str,
        started: std::time::Instant,
    ) -> Result<(), OrchestratorError> {
        let waited = self.clock.now().duration_since(started);
        if waited >= self.settings.build_number_timeout {
            return Err(OrchestratorError::BuildNumberTimeout {
                job: job.to_string(),
                waited,
            });
        }

        self.clock.sleep(self.settings.queue_poll_interval).await;
        Ok(())
    }
}
