//! Log sink
//!
//! Append-only storage of mirrored console output, one file per build.
//! Every append names the remote byte range it covers. The sink remembers
//! where the mirrored output ends and refuses ranges it already holds, so
//! concurrent runs of the same build cannot interleave duplicates.

use std::io::{SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use fs2::FileExt;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::layout::BuildLayout;

const TAIL_BLOCK_SIZE: u64 = 8 * 1024;

/// What happened to an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The log already holds output up to `offset`, past the start of the range
    Ahead { offset: u64 },
}

/// Repository trait for mirrored console output
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Appends the remote range `start..end` carried by `bytes`
    ///
    /// Refused with [`AppendOutcome::Ahead`] when the log already extends
    /// past `start`; an error when it ends before `start`. Empty input is a
    /// no-op.
    async fn append(
        &self,
        job_name: &str,
        number: u64,
        start: u64,
        end: u64,
        bytes: &[u8],
    ) -> Result<AppendOutcome>;

    /// Reads the whole log, `None` if nothing was mirrored yet
    async fn read_full(&self, job_name: &str, number: u64) -> Result<Option<String>>;

    /// Reads the last `lines` lines, `None` if nothing was mirrored yet
    async fn read_tail(&self, job_name: &str, number: u64, lines: usize) -> Result<Option<String>>;

    /// Location reference stored on the build record
    fn location(&self, job_name: &str, number: u64) -> Result<String>;
}

/// File-backed implementation of LogSink
///
/// The remote offset reached is kept next to the log and both are updated
/// under an exclusive advisory lock on the log file.
#[derive(Debug, Clone)]
pub struct FileLogSink {
    layout: BuildLayout,
}

impl FileLogSink {
    pub fn new(layout: BuildLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl LogSink for FileLogSink {
    async fn append(
        &self,
        job_name: &str,
        number: u64,
        start: u64,
        end: u64,
        bytes: &[u8],
    ) -> Result<AppendOutcome> {
        if bytes.is_empty() {
            return Ok(AppendOutcome::Appended);
        }

        let log_path = self.layout.log_path(job_name, number)?;
        let offset_path = self.layout.offset_path(job_name, number)?;
        let bytes = bytes.to_vec();

        tokio::task::spawn_blocking(move || {
            append_locked(&log_path, &offset_path, start, end, &bytes)
        })
        .await
        .context("Log append task failed")?
    }

    async fn read_full(&self, job_name: &str, number: u64) -> Result<Option<String>> {
        let path = self.layout.log_path(job_name, number)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn read_tail(&self, job_name: &str, number: u64, lines: usize) -> Result<Option<String>> {
        let path = self.layout.log_path(job_name, number)?;
        match tail_bytes(&path, lines, TAIL_BLOCK_SIZE).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn location(&self, job_name: &str, number: u64) -> Result<String> {
        Ok(self.layout.log_path(job_name, number)?.display().to_string())
    }
}

/// Appends under the log's lock, checking the range against the stored offset
///
/// A log without a stored offset was mirrored before offsets were tracked;
/// its first append is accepted as is.
fn append_locked(
    log_path: &Path,
    offset_path: &Path,
    start: u64,
    end: u64,
    bytes: &[u8],
) -> Result<AppendOutcome> {
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open {}", log_path.display()))?;
    // Released when `file` is closed
    file.lock_exclusive()
        .with_context(|| format!("Failed to lock {}", log_path.display()))?;

    match read_offset(offset_path)? {
        Some(offset) if offset > start => return Ok(AppendOutcome::Ahead { offset }),
        Some(offset) if offset < start => bail!(
            "{} ends at remote offset {} but the chunk starts at {}",
            log_path.display(),
            offset,
            start
        ),
        _ => {}
    }

    file.write_all(bytes)?;
    file.sync_data()?;
    write_offset(offset_path, end)?;

    Ok(AppendOutcome::Appended)
}

fn read_offset(path: &Path) -> Result<Option<u64>> {
    match std::fs::read_to_string(path) {
        Ok(text) => text
            .trim()
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("Corrupt log offset in {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn write_offset(path: &Path, offset: u64) -> Result<()> {
    let tmp = path.with_extension("offset.tmp");
    std::fs::write(&tmp, offset.to_string())
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Reads the last `lines` lines of a file by scanning backward in blocks
///
/// A newline that ends the file terminates the last line rather than
/// starting an empty one.
async fn tail_bytes(path: &Path, lines: usize, block_size: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path).await?;
    let len = file.metadata().await?.len();
    if lines == 0 || len == 0 {
        return Ok(Vec::new());
    }

    let mut tail: Vec<u8> = Vec::new();
    let mut pos = len;
    let mut newlines = 0usize;

    while pos > 0 {
        let read = block_size.min(pos);
        pos -= read;

        let mut block = vec![0u8; read as usize];
        file.seek(SeekFrom::Start(pos)).await?;
        file.read_exact(&mut block).await?;

        for i in (0..block.len()).rev() {
            if block[i] != b'\n' || pos + i as u64 == len - 1 {
                continue;
            }
            newlines += 1;
            if newlines == lines {
                block.drain(..=i);
                block.extend_from_slice(&tail);
                return Ok(block);
            }
        }

        block.extend_from_slice(&tail);
        tail = block;
    }

    Ok(tail)
}
