//! Log checkpoint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::build::BuildStatus;

/// Persisted collection progress for one remote build
///
/// `offset` is the remote byte offset already mirrored. It only moves
/// forward over the life of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCheckpoint {
    pub status: BuildStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub offset: u64,
}

impl LogCheckpoint {
    pub fn running(started_at: Option<DateTime<Utc>>, offset: u64) -> Self {
        Self {
            status: BuildStatus::Running,
            started_at,
            ended_at: None,
            offset,
        }
    }
}
