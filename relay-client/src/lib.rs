//! Relay HTTP Client
//!
//! A small, typed HTTP client for the remote CI job runner (Jenkins-compatible
//! JSON API). It knows how to talk to the runner and nothing else: retries,
//! polling and interpretation of results live in the worker.
//!
//! # Example
//!
//! ```no_run
//! use relay_client::RunnerClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = RunnerClient::new("http://localhost:8080").with_credentials("admin", "token");
//!
//!     let receipt = client.trigger_build("demo").await?;
//!     println!("Queued at: {:?}", receipt.queue_url);
//!     Ok(())
//! }
//! ```

pub mod error;
mod builds;
mod jobs;

pub use error::{ClientError, Result};
pub use jobs::TriggerReceipt;

use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;

/// Basic-auth credentials (user name and API token)
#[derive(Clone)]
struct Credentials {
    user: String,
    token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// HTTP client for the remote runner API
///
/// Operations are grouped as:
/// - Jobs: trigger, job listing, queue items
/// - Builds: status, progressive console text, stop
#[derive(Debug, Clone)]
pub struct RunnerClient {
    /// Base URL of the runner (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
    credentials: Option<Credentials>,
}

impl RunnerClient {
    /// Create a new runner client
    ///
    /// # Example
    /// ```
    /// use relay_client::RunnerClient;
    ///
    /// let client = RunnerClient::new("http://localhost:8080/");
    /// assert_eq!(client.base_url(), "http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new runner client with a custom HTTP client
    ///
    /// Per-request timeouts are always applied on top of whatever the
    /// client is configured with.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            credentials: None,
        }
    }

    /// Authenticate every request with basic auth
    pub fn with_credentials(mut self, user: impl Into<String>, token: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            user: user.into(),
            token: token.into(),
        });
        self
    }

    /// Get the base URL of the runner
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Request Helpers
    // =============================================================================

    /// Build `{base}/job/{job}/{segments...}` with each segment escaped
    fn job_url(&self, job_name: &str, segments: &[&str]) -> Result<Url> {
        relay_core::domain::build::validate_job_name(job_name)
            .map_err(ClientError::InvalidRequest)?;

        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::InvalidRequest(format!("Invalid base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidRequest("Base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push("job")
            .push(job_name)
            .extend(segments);
        Ok(url)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(credentials) => request.basic_auth(&credentials.user, Some(&credentials.token)),
            None => request,
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Fail on non-success status, keeping the body as the error message
    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(response)
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = self.check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
