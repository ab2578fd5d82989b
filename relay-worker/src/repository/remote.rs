//! Remote runner repository
//!
//! Thin seam over [`RunnerClient`] so the orchestrator can be tested against
//! a scripted runner.

use async_trait::async_trait;
use relay_client::{Result, RunnerClient, TriggerReceipt};
use relay_core::domain::log::LogChunk;
use relay_core::dto::remote::{BuildInfo, JobInfo, QueueItem};

/// Repository trait for operations against the remote CI runner
#[async_trait]
pub trait RemoteRunner: Send + Sync {
    /// Submits a new build of `job_name`
    async fn trigger_build(&self, job_name: &str) -> Result<TriggerReceipt>;

    /// Gets the job's build listing and queue state
    async fn get_job(&self, job_name: &str) -> Result<JobInfo>;

    /// Gets a queue item by its URL
    async fn get_queue_item(&self, queue_url: &str) -> Result<QueueItem>;

    /// URL of a queue item known only by id
    fn queue_item_url(&self, id: u64) -> String;

    /// Gets whether a build is executing and its result
    async fn get_build(&self, job_name: &str, number: u64) -> Result<BuildInfo>;

    /// Fetches console output from byte offset `start`
    async fn fetch_log(&self, job_name: &str, number: u64, start: u64) -> Result<LogChunk>;

    /// Asks the runner to stop a build
    async fn stop_build(&self, job_name: &str, number: u64) -> Result<()>;
}

#[async_trait]
impl RemoteRunner for RunnerClient {
    async fn trigger_build(&self, job_name: &str) -> Result<TriggerReceipt> {
        RunnerClient::trigger_build(self, job_name).await
    }

    async fn get_job(&self, job_name: &str) -> Result<JobInfo> {
        RunnerClient::get_job(self, job_name).await
    }

    async fn get_queue_item(&self, queue_url: &str) -> Result<QueueItem> {
        RunnerClient::get_queue_item(self, queue_url).await
    }

    fn queue_item_url(&self, id: u64) -> String {
        RunnerClient::queue_item_url(self, id)
    }

    async fn get_build(&self, job_name: &str, number: u64) -> Result<BuildInfo> {
        RunnerClient::get_build(self, job_name, number).await
    }

    async fn fetch_log(&self, job_name: &str, number: u64, start: u64) -> Result<LogChunk> {
        self.progressive_text(job_name, number, start).await
    }

    async fn stop_build(&self, job_name: &str, number: u64) -> Result<()> {
        RunnerClient::stop_build(self, job_name, number).await
    }
}
