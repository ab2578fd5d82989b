//! Job-level endpoints: triggering, job listings, queue items

use std::time::Duration;

use relay_core::dto::remote::{JobInfo, QueueItem};
use reqwest::header::LOCATION;
use tracing::debug;

use crate::RunnerClient;
use crate::error::{ClientError, Result};

const TRIGGER_TIMEOUT: Duration = Duration::from_secs(15);
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Acknowledgment of an accepted trigger request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerReceipt {
    /// Queue item URL from the `Location` header, when the runner sent one
    pub queue_url: Option<String>,
}

impl RunnerClient {
    // =============================================================================
    // Triggering
    // =============================================================================

    /// Submit a new build of a job
    ///
    /// Only 200 and 201 count as accepted.
    pub async fn trigger_build(&self, job_name: &str) -> Result<TriggerReceipt> {
        let mut url = self.job_url(job_name, &["build"])?;
        url.query_pairs_mut().append_pair("delay", "0sec");

        let response = self
            .authed(self.client.post(url))
            .timeout(TRIGGER_TIMEOUT)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 && status != 201 {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::api_error(status, body));
        }

        let queue_url = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        debug!("Triggered {} (queue item: {:?})", job_name, queue_url);

        Ok(TriggerReceipt { queue_url })
    }

    // =============================================================================
    // Job and Queue Queries
    // =============================================================================

    /// Get the job's build listing and queue state
    pub async fn get_job(&self, job_name: &str) -> Result<JobInfo> {
        let url = self.job_url(job_name, &["api", "json"])?;
        let response = self
            .authed(self.client.get(url))
            .timeout(QUERY_TIMEOUT)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get a queue item from the URL returned by [`RunnerClient::trigger_build`]
    pub async fn get_queue_item(&self, queue_url: &str) -> Result<QueueItem> {
        let url = format!("{}/api/json", queue_url.trim_end_matches('/'));
        let response = self
            .authed(self.client.get(&url))
            .timeout(QUERY_TIMEOUT)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// URL of a queue item known only by id
    pub fn queue_item_url(&self, id: u64) -> String {
        format!("{}/queue/item/{}/", self.base_url, id)
    }
}
