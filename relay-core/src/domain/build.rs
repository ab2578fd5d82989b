//! Build domain types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Build record
///
/// Shared between whoever requests a build (creates it PENDING, may later
/// request a stop) and the orchestrator (drives every other transition).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub id: Uuid,
    pub job_name: String,
    pub build_number: Option<u64>,
    pub status: BuildStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub log_location: Option<String>,
}

impl BuildRecord {
    /// Creates a new PENDING record for a job
    pub fn pending(job_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.into(),
            build_number: None,
            status: BuildStatus::Pending,
            created_at: now,
            started_at: None,
            ended_at: None,
            log_location: None,
        }
    }
}

impl fmt::Display for BuildRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.build_number {
            Some(number) => write!(f, "{} #{}", self.job_name, number),
            None => write!(f, "{} (pending)", self.job_name),
        }
    }
}

/// Persisted build status
///
/// `StopRequested` is the marker written by an external actor to ask the
/// orchestrator to stop a build. It is never written by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Pending,
    Queued,
    Running,
    StopRequested,
    Success,
    Failed,
    Aborted,
    Stopped,
}

impl BuildStatus {
    pub const ALL: [BuildStatus; 8] = [
        BuildStatus::Pending,
        BuildStatus::Queued,
        BuildStatus::Running,
        BuildStatus::StopRequested,
        BuildStatus::Success,
        BuildStatus::Failed,
        BuildStatus::Aborted,
        BuildStatus::Stopped,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Pending => "PENDING",
            BuildStatus::Queued => "QUEUED",
            BuildStatus::Running => "RUNNING",
            BuildStatus::StopRequested => "STOP_REQUESTED",
            BuildStatus::Success => "SUCCESS",
            BuildStatus::Failed => "FAILED",
            BuildStatus::Aborted => "ABORTED",
            BuildStatus::Stopped => "STOPPED",
        }
    }

    /// Whether no further transition can happen from this status
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failed | BuildStatus::Aborted | BuildStatus::Stopped
        )
    }

    /// Whether a build in this status still needs an orchestrator
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown build status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for BuildStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuildStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Checks that a job name can be used both as a URL path segment and as a
/// directory name
pub fn validate_job_name(job_name: &str) -> Result<(), String> {
    if job_name.trim().is_empty() {
        return Err("job name cannot be empty".to_string());
    }
    if job_name == "." || job_name == ".." {
        return Err(format!("invalid job name: {}", job_name));
    }
    if job_name.contains(['/', '\\', '\0']) {
        return Err(format!(
            "job name must not contain path separators: {}",
            job_name
        ));
    }
    Ok(())
}
