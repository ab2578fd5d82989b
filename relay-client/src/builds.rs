//! Build-level endpoints: status, progressive console text, stop

use std::time::Duration;

use relay_core::domain::log::LogChunk;
use relay_core::dto::remote::BuildInfo;
use tracing::debug;

use crate::RunnerClient;
use crate::error::Result;

/// Header carrying the total console size after this response
const LOG_SIZE_HEADER: &str = "X-Text-Size";
/// Header saying whether more console output is expected
const MORE_DATA_HEADER: &str = "X-More-Data";

const STATUS_TIMEOUT: Duration = Duration::from_secs(10);
const LOG_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_TIMEOUT: Duration = Duration::from_secs(20);

impl RunnerClient {
    /// Get whether a build is still executing and, if not, its result
    pub async fn get_build(&self, job_name: &str, number: u64) -> Result<BuildInfo> {
        let number = number.to_string();
        let url = self.job_url(job_name, &[number.as_str(), "api", "json"])?;
        let response = self
            .authed(self.client.get(url))
            .timeout(STATUS_TIMEOUT)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Fetch console output starting at byte offset `start`
    pub async fn progressive_text(&self, job_name: &str, number: u64, start: u64) -> Result<LogChunk> {
        let number_segment = number.to_string();
        let mut url = self.job_url(job_name, &[number_segment.as_str(), "logText", "progressiveText"])?;
        url.query_pairs_mut().append_pair("start", &start.to_string());

        let response = self
            .authed(self.client.get(url))
            .timeout(LOG_TIMEOUT)
            .send()
            .await?;
        let response = self.check_status(response).await?;

        let size = header_value(&response, LOG_SIZE_HEADER);
        let more_data = header_value(&response, MORE_DATA_HEADER);
        let text = response.text().await?;

        Ok(parse_chunk(start, text, size.as_deref(), more_data.as_deref()))
    }

    /// Ask the runner to stop a build
    pub async fn stop_build(&self, job_name: &str, number: u64) -> Result<()> {
        let number_segment = number.to_string();
        let url = self.job_url(job_name, &[number_segment.as_str(), "stop"])?;
        let response = self
            .authed(self.client.post(url))
            .timeout(STOP_TIMEOUT)
            .send()
            .await?;
        self.check_status(response).await?;

        debug!("Stop accepted for {} #{}", job_name, number);
        Ok(())
    }
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
}

/// Assemble a chunk from the raw body and headers
///
/// A missing or malformed size header falls back to `start + body length`.
fn parse_chunk(start: u64, text: String, size: Option<&str>, more_data: Option<&str>) -> LogChunk {
    let next_offset = size
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(start + text.len() as u64);

    let more_data = more_data.and_then(|value| {
        if value.eq_ignore_ascii_case("true") {
            Some(true)
        } else if value.eq_ignore_ascii_case("false") {
            Some(false)
        } else {
            None
        }
    });

    LogChunk {
        start,
        text,
        next_offset,
        more_data,
    }
}
