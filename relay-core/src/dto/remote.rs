//! Remote runner JSON DTOs

use serde::{Deserialize, Serialize};

/// Reference to a build inside a job listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRef {
    pub number: u64,
}

/// Reference to a queued item inside a job listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItemRef {
    pub id: u64,
}

/// `GET /job/{job}/api/json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    #[serde(default)]
    pub builds: Vec<BuildRef>,
    #[serde(default)]
    pub last_build: Option<BuildRef>,
    #[serde(default)]
    pub in_queue: bool,
    #[serde(default)]
    pub queue_item: Option<QueueItemRef>,
}

impl JobInfo {
    /// Highest build number known to the job, if any
    pub fn latest_number(&self) -> Option<u64> {
        let listed = self.builds.iter().map(|b| b.number).max();
        let last = self.last_build.as_ref().map(|b| b.number);
        listed.max(last)
    }
}

/// Build assigned to a queue item once it leaves the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executable {
    pub number: u64,
}

/// `GET {queue_item_url}api/json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    #[serde(default)]
    pub executable: Option<Executable>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub why: Option<String>,
}

/// `GET /job/{job}/{number}/api/json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Absent is read as still building
    #[serde(default = "default_building")]
    pub building: bool,
    #[serde(default)]
    pub result: Option<String>,
}

fn default_building() -> bool {
    true
}
