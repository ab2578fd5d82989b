//! Build dispatcher
//!
//! Polls the record store for unfinished builds and runs each in its own
//! task. A job name is driven by at most one task at a time, so two records
//! of the same job never race to attach to the same remote build.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::repository::BuildRecordGateway;
use crate::service::{BuildOrchestrator, RunOutcome};

/// Dispatcher that continuously picks up unfinished builds
pub struct BuildDispatcher {
    orchestrator: Arc<BuildOrchestrator>,
    records: Arc<dyn BuildRecordGateway>,
    interval: Duration,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl BuildDispatcher {
    pub fn new(
        orchestrator: Arc<BuildOrchestrator>,
        records: Arc<dyn BuildRecordGateway>,
        interval: Duration,
        max_parallel_builds: usize,
    ) -> Self {
        Self {
            orchestrator,
            records,
            interval,
            semaphore: Arc::new(Semaphore::new(max_parallel_builds)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Starts the dispatch loop
    pub async fn run(&self) -> Result<()> {
        info!("Starting build dispatcher (interval: {:?})", self.interval);

        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            match self.dispatch_once().await {
                Ok(handles) if !handles.is_empty() => {
                    info!("Dispatched {} build(s) this cycle", handles.len());
                }
                Ok(_) => debug!("Nothing to dispatch"),
                Err(e) => error!("Error during dispatch cycle: {:#}", e),
            }
        }
    }

    /// Performs a single dispatch cycle
    ///
    /// Returns the handles of the tasks started in this cycle.
    pub async fn dispatch_once(&self) -> Result<Vec<JoinHandle<()>>> {
        let records = self
            .records
            .list_unfinished()
            .await
            .context("Failed to list unfinished builds")?;

        let mut handles = Vec::new();

        for record in records {
            let Some(claim) = InFlightClaim::acquire(&self.in_flight, &record.job_name) else {
                debug!("{} is already being driven, skipping record {}", record.job_name, record.id);
                continue;
            };

            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                debug!("Max parallel builds reached, leaving record {} for later", record.id);
                break;
            };

            handles.push(self.spawn_build_task(record.id, claim, permit));
        }

        Ok(handles)
    }

    fn spawn_build_task(
        &self,
        id: Uuid,
        claim: InFlightClaim,
        permit: OwnedSemaphorePermit,
    ) -> JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);

        tokio::spawn(async move {
            let _permit = permit;
            match orchestrator.run(id).await {
                RunOutcome::Finished(status) => {
                    info!("Record {} ({}) finished with {}", id, claim.job_name, status)
                }
                RunOutcome::AlreadyFinished(status) => {
                    debug!("Record {} was already {}", id, status)
                }
                RunOutcome::NotFound => debug!("Record {} vanished before it ran", id),
            }
            drop(claim);
        })
    }
}

/// Marks a job name as driven until dropped
struct InFlightClaim {
    in_flight: Arc<Mutex<HashSet<String>>>,
    job_name: String,
}

impl InFlightClaim {
    fn acquire(in_flight: &Arc<Mutex<HashSet<String>>>, job_name: &str) -> Option<Self> {
        if !in_flight.lock().insert(job_name.to_string()) {
            return None;
        }
        Some(Self {
            in_flight: Arc::clone(in_flight),
            job_name: job_name.to_string(),
        })
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.job_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Harness, finished};
    use relay_core::domain::build::BuildStatus;

    fn dispatcher(h: &Harness, max_parallel_builds: usize) -> BuildDispatcher {
        BuildDispatcher::new(
            h.orchestrator.clone(),
            h.records.clone(),
            Duration::from_secs(5),
            max_parallel_builds,
        )
    }

    async fn join(handles: Vec<JoinHandle<()>>) {
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_one_task_per_job() {
        let h = Harness::new();
        let first = h.records.seed("demo", BuildStatus::Running, Some(1));
        let second = h.records.seed("demo", BuildStatus::Running, Some(2));
        let other = h.records.seed("other", BuildStatus::Running, Some(3));
        for number in 1..=3 {
            h.remote.build(number, finished("SUCCESS"));
        }
        let dispatcher = dispatcher(&h, 4);

        let handles = dispatcher.dispatch_once().await.unwrap();
        assert_eq!(handles.len(), 2);
        join(handles).await;

        assert_eq!(h.records.record(first).unwrap().status, BuildStatus::Success);
        assert_eq!(h.records.record(other).unwrap().status, BuildStatus::Success);
        assert_eq!(h.records.record(second).unwrap().status, BuildStatus::Running);

        let handles = dispatcher.dispatch_once().await.unwrap();
        assert_eq!(handles.len(), 1);
        join(handles).await;
        assert_eq!(h.records.record(second).unwrap().status, BuildStatus::Success);
    }

    #[tokio::test]
    async fn test_parallel_limit() {
        let h = Harness::new();
        h.records.seed("a", BuildStatus::Running, Some(1));
        h.records.seed("b", BuildStatus::Running, Some(2));
        h.remote.build(1, finished("SUCCESS"));
        h.remote.build(2, finished("FAILURE"));
        let dispatcher = dispatcher(&h, 1);

        let handles = dispatcher.dispatch_once().await.unwrap();
        assert_eq!(handles.len(), 1);
        join(handles).await;

        let handles = dispatcher.dispatch_once().await.unwrap();
        assert_eq!(handles.len(), 1);
        join(handles).await;

        assert!(dispatcher.dispatch_once().await.unwrap().is_empty());
        assert!(dispatcher.in_flight.lock().is_empty());
    }

    #[test]
    fn test_claim_released_on_drop() {
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let claim = InFlightClaim::acquire(&in_flight, "demo").unwrap();
        assert!(InFlightClaim::acquire(&in_flight, "demo").is_none());
        drop(claim);
        assert!(InFlightClaim::acquire(&in_flight, "demo").is_some());
    }
}
