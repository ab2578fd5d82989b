//! On-disk layout of mirrored builds
//!
//! ```text
//! <root>/<job>/<number>/full.log
//! <root>/<job>/<number>/full.log.offset
//! <root>/<job>/<number>/meta.json
//! ```

use std::path::{Path, PathBuf};

use anyhow::Result;
use relay_core::domain::build::validate_job_name;

const LOG_FILE: &str = "full.log";
const OFFSET_FILE: &str = "full.log.offset";
const META_FILE: &str = "meta.json";

/// Resolves per-build paths under a storage root
#[derive(Debug, Clone)]
pub struct BuildLayout {
    root: PathBuf,
}

impl BuildLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything mirrored for one build
    pub fn build_dir(&self, job_name: &str, number: u64) -> Result<PathBuf> {
        validate_job_name(job_name).map_err(anyhow::Error::msg)?;
        Ok(self.root.join(job_name).join(number.to_string()))
    }

    pub fn log_path(&self, job_name: &str, number: u64) -> Result<PathBuf> {
        Ok(self.build_dir(job_name, number)?.join(LOG_FILE))
    }

    /// Remote offset the log extends to
    pub fn offset_path(&self, job_name: &str, number: u64) -> Result<PathBuf> {
        Ok(self.build_dir(job_name, number)?.join(OFFSET_FILE))
    }

    pub fn meta_path(&self, job_name: &str, number: u64) -> Result<PathBuf> {
        Ok(self.build_dir(job_name, number)?.join(META_FILE))
    }
}
