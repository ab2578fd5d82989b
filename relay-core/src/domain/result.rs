//! Remote build outcomes and their mapping to terminal statuses

use serde::{Deserialize, Serialize};

use crate::domain::build::BuildStatus;

/// Result reported by the remote runner once a build stops executing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteResult {
    Success,
    Unstable,
    Failure,
    NotBuilt,
    Aborted,
    /// Missing or unrecognised result
    Unknown(Option<String>),
}

impl RemoteResult {
    /// Interprets the raw `result` field of a build
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            Some("SUCCESS") => RemoteResult::Success,
            Some("UNSTABLE") => RemoteResult::Unstable,
            Some("FAILURE") => RemoteResult::Failure,
            Some("NOT_BUILT") => RemoteResult::NotBuilt,
            Some("ABORTED") => RemoteResult::Aborted,
            other => RemoteResult::Unknown(other.map(str::to_string)),
        }
    }

    /// Terminal status for a build that ended on its own
    ///
    /// Only an explicit SUCCESS maps to success.
    pub fn completed_status(&self) -> BuildStatus {
        match self {
            RemoteResult::Success => BuildStatus::Success,
            RemoteResult::Aborted => BuildStatus::Aborted,
            RemoteResult::Unstable
            | RemoteResult::Failure
            | RemoteResult::NotBuilt
            | RemoteResult::Unknown(_) => BuildStatus::Failed,
        }
    }

    /// Terminal status for a build that was asked to stop
    pub fn stopped_status(&self) -> BuildStatus {
        match self {
            RemoteResult::Aborted => BuildStatus::Aborted,
            _ => BuildStatus::Stopped,
        }
    }
}
