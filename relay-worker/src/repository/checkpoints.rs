//! Checkpoint store
//!
//! One small JSON document per build recording how far collection got.
//! Written atomically so a crash mid-write leaves the previous checkpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use relay_core::domain::checkpoint::LogCheckpoint;
use tokio::fs;

use super::layout::BuildLayout;

/// Repository trait for collection checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Replaces the checkpoint of a build
    async fn write(&self, job_name: &str, number: u64, checkpoint: &LogCheckpoint) -> Result<()>;

    /// Reads the checkpoint of a build, `None` if never written
    async fn read(&self, job_name: &str, number: u64) -> Result<Option<LogCheckpoint>>;
}

/// File-backed implementation of CheckpointStore
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    layout: BuildLayout,
}

impl FileCheckpointStore {
    pub fn new(layout: BuildLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn write(&self, job_name: &str, number: u64, checkpoint: &LogCheckpoint) -> Result<()> {
        let path = self.layout.meta_path(job_name, number)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let json = serde_json::to_vec_pretty(checkpoint).context("Failed to encode checkpoint")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        Ok(())
    }

    async fn read(&self, job_name: &str, number: u64) -> Result<Option<LogCheckpoint>> {
        let path = self.layout.meta_path(job_name, number)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        let checkpoint = serde_json::from_slice(&bytes)
            .with_context(|| format!("Corrupt checkpoint {}", path.display()))?;
        Ok(Some(checkpoint))
    }
}
