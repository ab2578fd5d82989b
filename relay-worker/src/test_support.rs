//! In-memory collaborators for driving the orchestrator in tests

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use relay_client::{ClientError, TriggerReceipt};
use relay_core::domain::build::{BuildRecord, BuildStatus};
use relay_core::domain::checkpoint::LogCheckpoint;
use relay_core::domain::log::LogChunk;
use relay_core::dto::remote::{BuildInfo, JobInfo, QueueItem};
use uuid::Uuid;

use crate::clock::Clock;
use crate::repository::{
    AppendOutcome, BuildAssignment, BuildRecordGateway, CheckpointStore, LogSink, RemoteRunner,
};
use crate::service::{BuildOrchestrator, PollSettings};

// =============================================================================
// Clock
// =============================================================================

/// Clock whose sleeps advance time instantly
pub struct FakeClock {
    base: Instant,
    base_utc: DateTime<Utc>,
    elapsed: Mutex<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            base_utc: Utc::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + *self.elapsed.lock()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let elapsed = *self.elapsed.lock();
        self.base_utc + chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero())
    }

    async fn sleep(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Build records
// =============================================================================

#[derive(Default)]
pub struct InMemoryRecords {
    records: Mutex<Vec<BuildRecord>>,
    status_reads: AtomicUsize,
}

impl InMemoryRecords {
    pub fn insert(&self, record: BuildRecord) -> Uuid {
        let id = record.id;
        self.records.lock().push(record);
        id
    }

    /// Inserts a record for `job_name` in the given state
    pub fn seed(&self, job_name: &str, status: BuildStatus, build_number: Option<u64>) -> Uuid {
        let mut record = BuildRecord::pending(job_name, Utc::now());
        record.status = status;
        record.build_number = build_number;
        self.insert(record)
    }

    pub fn record(&self, id: Uuid) -> Option<BuildRecord> {
        self.records.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Writes a status as an outside actor would
    pub fn set_status(&self, id: Uuid, status: BuildStatus) {
        if let Some(record) = self.records.lock().iter_mut().find(|r| r.id == id) {
            record.status = status;
        }
    }

    pub fn status_reads(&self) -> usize {
        self.status_reads.load(Ordering::SeqCst)
    }

    fn update<T>(&self, id: Uuid, f: impl FnOnce(&mut BuildRecord) -> T) -> Result<T> {
        let mut records = self.records.lock();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow!("build record {} not found", id))?;
        Ok(f(record))
    }
}

#[async_trait]
impl BuildRecordGateway for InMemoryRecords {
    async fn create(&self, job_name: &str) -> Result<BuildRecord> {
        let record = BuildRecord::pending(job_name, Utc::now());
        self.insert(record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<BuildRecord>> {
        Ok(self.record(id))
    }

    async fn read_status(&self, id: Uuid) -> Result<Option<BuildStatus>> {
        self.status_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.record(id).map(|r| r.status))
    }

    async fn find_active(&self, job_name: &str) -> Result<Option<BuildRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .find(|r| r.job_name == job_name && r.status.is_active())
            .cloned())
    }

    async fn list_unfinished(&self) -> Result<Vec<BuildRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.status.is_active())
            .cloned()
            .collect())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<BuildRecord>> {
        Ok(self.records.lock().iter().rev().take(limit).cloned().collect())
    }

    async fn mark_queued(&self, id: Uuid) -> Result<()> {
        self.update(id, |record| {
            if record.status == BuildStatus::Pending {
                record.status = BuildStatus::Queued;
            }
        })
    }

    async fn assign_build(&self, id: Uuid, assignment: BuildAssignment) -> Result<BuildRecord> {
        let mut records = self.records.lock();
        let taken = records.iter().any(|r| {
            r.id != id
                && r.build_number == Some(assignment.build_number)
                && records.iter().any(|me| me.id == id && me.job_name == r.job_name)
        });
        if taken {
            bail!("build number {} already recorded", assignment.build_number);
        }

        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow!("build record {} not found", id))?;
        record.build_number = Some(assignment.build_number);
        record.started_at.get_or_insert(assignment.started_at);
        if assignment.log_location.is_some() {
            record.log_location = assignment.log_location;
        }
        if record.status != BuildStatus::StopRequested {
            record.status = BuildStatus::Running;
        }
        Ok(record.clone())
    }

    async fn finish(&self, id: Uuid, status: BuildStatus, ended_at: DateTime<Utc>) -> Result<()> {
        self.update(id, |record| {
            record.status = status;
            record.ended_at = Some(ended_at);
        })
    }

    async fn request_stop(&self, id: Uuid) -> Result<bool> {
        self.update(id, |record| match record.status {
            BuildStatus::Pending | BuildStatus::Queued | BuildStatus::Running => {
                record.status = BuildStatus::StopRequested;
                true
            }
            _ => false,
        })
    }
}

// =============================================================================
// Logs and checkpoints
// =============================================================================

#[derive(Default)]
pub struct MemoryLogSink {
    blobs: Mutex<HashMap<(String, u64), (Vec<u8>, u64)>>,
}

impl MemoryLogSink {
    pub fn blob(&self, job_name: &str, number: u64) -> String {
        self.blobs
            .lock()
            .get(&(job_name.to_string(), number))
            .map(|(bytes, _)| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default()
    }

    pub fn seed(&self, job_name: &str, number: u64, text: &str) {
        self.blobs.lock().insert(
            (job_name.to_string(), number),
            (text.as_bytes().to_vec(), text.len() as u64),
        );
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
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
        let mut blobs = self.blobs.lock();
        let (blob, offset) = blobs
            .entry((job_name.to_string(), number))
            .or_insert_with(|| (Vec::new(), start));
        if *offset > start {
            return Ok(AppendOutcome::Ahead { offset: *offset });
        }
        if *offset < start {
            bail!("log ends at {} but the chunk starts at {}", offset, start);
        }
        blob.extend_from_slice(bytes);
        *offset = end;
        Ok(AppendOutcome::Appended)
    }

    async fn read_full(&self, job_name: &str, number: u64) -> Result<Option<String>> {
        let blobs = self.blobs.lock();
        Ok(blobs
            .get(&(job_name.to_string(), number))
            .map(|(bytes, _)| String::from_utf8_lossy(bytes).into_owned()))
    }

    async fn read_tail(&self, job_name: &str, number: u64, lines: usize) -> Result<Option<String>> {
        let Some(full) = self.read_full(job_name, number).await? else {
            return Ok(None);
        };
        let all: Vec<&str> = full.lines().collect();
        let skip = all.len().saturating_sub(lines);
        Ok(Some(all[skip..].join("\n")))
    }

    fn location(&self, job_name: &str, number: u64) -> Result<String> {
        Ok(format!("memory://{}/{}", job_name, number))
    }
}

#[derive(Default)]
pub struct MemoryCheckpoints {
    checkpoints: Mutex<HashMap<(String, u64), LogCheckpoint>>,
    corrupt: AtomicBool,
}

impl MemoryCheckpoints {
    pub fn get(&self, job_name: &str, number: u64) -> Option<LogCheckpoint> {
        self.checkpoints
            .lock()
            .get(&(job_name.to_string(), number))
            .cloned()
    }

    pub fn seed(&self, job_name: &str, number: u64, checkpoint: LogCheckpoint) {
        self.checkpoints
            .lock()
            .insert((job_name.to_string(), number), checkpoint);
    }

    /// Makes every read fail as an unparseable document would
    pub fn corrupt(&self) {
        self.corrupt.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoints {
    async fn write(&self, job_name: &str, number: u64, checkpoint: &LogCheckpoint) -> Result<()> {
        self.seed(job_name, number, checkpoint.clone());
        Ok(())
    }

    async fn read(&self, job_name: &str, number: u64) -> Result<Option<LogCheckpoint>> {
        if self.corrupt.load(Ordering::SeqCst) {
            bail!("checkpoint of {} #{} is corrupt", job_name, number);
        }
        Ok(self.get(job_name, number))
    }
}

// =============================================================================
// Remote runner
// =============================================================================

/// Scripted reply; `Fail` carries an HTTP status
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    Fail(u16),
}

impl<T> Reply<T> {
    fn into_result(self) -> relay_client::Result<T> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Fail(status) => Err(ClientError::api_error(status, "scripted failure")),
        }
    }
}

/// Scripted console output; `size` defaults to the end of `text`
#[derive(Debug, Clone)]
pub struct LogReply {
    pub text: String,
    pub size: Option<u64>,
    pub more: Option<bool>,
}

impl LogReply {
    pub fn new(text: &str, more: bool) -> Self {
        Self {
            text: text.to_string(),
            size: None,
            more: Some(more),
        }
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Remote runner replaying scripted replies
///
/// Trigger, job, queue and build scripts repeat their last reply once
/// exhausted. Log replies are consumed once; afterwards every fetch returns
/// no new output and no more data. A console set with `console` replaces
/// the log replies and is served from whatever offset is asked for.
#[derive(Default)]
pub struct ScriptedRemote {
    triggers: Mutex<VecDeque<Reply<TriggerReceipt>>>,
    jobs: Mutex<VecDeque<Reply<JobInfo>>>,
    queue: Mutex<VecDeque<Reply<QueueItem>>>,
    builds: Mutex<HashMap<u64, VecDeque<Reply<BuildInfo>>>>,
    logs: Mutex<VecDeque<Reply<LogReply>>>,
    console: Mutex<Option<String>>,
    logs_failing: AtomicBool,
    log_fetches: AtomicUsize,
    hooks: Mutex<Vec<(usize, Hook)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRemote {
    pub fn trigger(&self, reply: Reply<TriggerReceipt>) {
        self.triggers.lock().push_back(reply);
    }

    pub fn job(&self, reply: Reply<JobInfo>) {
        self.jobs.lock().push_back(reply);
    }

    pub fn queue(&self, reply: Reply<QueueItem>) {
        self.queue.lock().push_back(reply);
    }

    pub fn build(&self, number: u64, reply: Reply<BuildInfo>) {
        self.builds.lock().entry(number).or_default().push_back(reply);
    }

    pub fn log(&self, reply: Reply<LogReply>) {
        self.logs.lock().push_back(reply);
    }

    pub fn console(&self, text: &str) {
        *self.console.lock() = Some(text.to_string());
    }

    pub fn fail_logs(&self) {
        self.logs_failing.store(true, Ordering::SeqCst);
    }

    /// Runs `hook` right after the `n`th log fetch
    pub fn after_log_fetch(&self, n: usize, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().push((n, Box::new(hook)));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn next_sticky<T: Clone>(queue: &mut VecDeque<Reply<T>>) -> Option<Reply<T>> {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl RemoteRunner for ScriptedRemote {
    async fn trigger_build(&self, job_name: &str) -> relay_client::Result<TriggerReceipt> {
        self.record(format!("trigger {}", job_name));
        Self::next_sticky(&mut *self.triggers.lock())
            .unwrap_or(Reply::Ok(TriggerReceipt { queue_url: None }))
            .into_result()
    }

    async fn get_job(&self, job_name: &str) -> relay_client::Result<JobInfo> {
        self.record(format!("job {}", job_name));
        Self::next_sticky(&mut *self.jobs.lock())
            .unwrap_or(Reply::Ok(JobInfo::default()))
            .into_result()
    }

    async fn get_queue_item(&self, queue_url: &str) -> relay_client::Result<QueueItem> {
        self.record(format!("queue {}", queue_url));
        Self::next_sticky(&mut *self.queue.lock())
            .unwrap_or(Reply::Ok(QueueItem::default()))
            .into_result()
    }

    fn queue_item_url(&self, id: u64) -> String {
        format!("queue/{}", id)
    }

    async fn get_build(&self, _job_name: &str, number: u64) -> relay_client::Result<BuildInfo> {
        self.record(format!("build {}", number));
        let reply = self
            .builds
            .lock()
            .get_mut(&number)
            .and_then(Self::next_sticky);
        reply
            .unwrap_or(Reply::Ok(BuildInfo {
                building: true,
                result: None,
            }))
            .into_result()
    }

    async fn fetch_log(
        &self,
        _job_name: &str,
        number: u64,
        start: u64,
    ) -> relay_client::Result<LogChunk> {
        self.record(format!("log {} @{}", number, start));
        let fetch = self.log_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        // Lets concurrent runs interleave their fetches and appends
        tokio::task::yield_now().await;

        let console = self.console.lock().clone();
        let reply = if self.logs_failing.load(Ordering::SeqCst) {
            Reply::Fail(503)
        } else if let Some(console) = console {
            let from = (start as usize).min(console.len());
            Reply::Ok(LogReply {
                text: console[from..].to_string(),
                size: Some(console.len() as u64),
                more: Some(false),
            })
        } else {
            self.logs
                .lock()
                .pop_front()
                .unwrap_or(Reply::Ok(LogReply {
                    text: String::new(),
                    size: None,
                    more: Some(false),
                }))
        };

        let due: Vec<Hook> = {
            let mut hooks = self.hooks.lock();
            let (due, pending): (Vec<_>, Vec<_>) = hooks.drain(..).partition(|(n, _)| *n == fetch);
            *hooks = pending;
            due.into_iter().map(|(_, hook)| hook).collect()
        };
        for hook in due {
            hook();
        }

        reply.into_result().map(|log| {
            let next_offset = log.size.unwrap_or(start + log.text.len() as u64);
            LogChunk {
                start,
                text: log.text,
                next_offset,
                more_data: log.more,
            }
        })
    }

    async fn stop_build(&self, _job_name: &str, number: u64) -> relay_client::Result<()> {
        self.record(format!("stop {}", number));
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Orchestrator wired to fakes, with handles to inspect them
pub struct Harness {
    pub remote: Arc<ScriptedRemote>,
    pub records: Arc<InMemoryRecords>,
    pub logs: Arc<MemoryLogSink>,
    pub checkpoints: Arc<MemoryCheckpoints>,
    pub clock: Arc<FakeClock>,
    pub orchestrator: Arc<BuildOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(PollSettings::default())
    }

    pub fn with_settings(settings: PollSettings) -> Self {
        let remote = Arc::new(ScriptedRemote::default());
        let records = Arc::new(InMemoryRecords::default());
        let logs = Arc::new(MemoryLogSink::default());
        let checkpoints = Arc::new(MemoryCheckpoints::default());
        let clock = Arc::new(FakeClock::new());

        let orchestrator = Arc::new(BuildOrchestrator::new(
            remote.clone(),
            records.clone(),
            logs.clone(),
            checkpoints.clone(),
            clock.clone(),
            settings,
        ));

        Self {
            remote,
            records,
            logs,
            checkpoints,
            clock,
            orchestrator,
        }
    }
}

pub fn building() -> Reply<BuildInfo> {
    Reply::Ok(BuildInfo {
        building: true,
        result: None,
    })
}

pub fn finished(result: &str) -> Reply<BuildInfo> {
    Reply::Ok(BuildInfo {
        building: false,
        result: Some(result.to_string()),
    })
}
