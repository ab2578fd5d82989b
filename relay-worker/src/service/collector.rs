//! Progressive log collection
//!
//! A single loop drives an explicit state machine. Each tick does one unit
//! of work and says how long to wait before the next one:
//!
//! ```text
//! Collecting --stop marker--> Stopping --remote stopped--> finish(Stopped)
//!     |                          |
//!     |--remote finished--> finish(Completed)
//!     |--no sign of life--> finish(Stalled)
//! ```
//!
//! Chunks are appended only when they line up with the mirrored offset. The
//! sink refuses ranges it already holds, so two runs of the same build never
//! write a byte twice. The checkpoint is written after every append, so a
//! crash repeats at most the chunk in flight.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use relay_core::domain::build::{BuildRecord, BuildStatus};
use relay_core::domain::checkpoint::LogCheckpoint;
use relay_core::domain::log::ChunkDisposition;
use relay_core::domain::result::RemoteResult;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::orchestrator::BuildOrchestrator;
use crate::repository::AppendOutcome;

/// Extra fetches allowed to pick up output written after the remote ended
const MAX_TAIL_FETCHES: usize = 32;

/// Why collection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FinishReason {
    /// The remote reported the build finished
    Completed,
    /// No new output for longer than the stability timeout
    Stalled,
    /// A stop was requested and the drain ended
    Stopped,
}

/// Result of collection handed to finalization
#[derive(Debug, Clone)]
pub(super) struct Finish {
    pub reason: FinishReason,
    /// Remote result when it was already fetched while deciding to finish
    pub result: Option<RemoteResult>,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Collecting,
    /// Stop sent, draining output until the remote stops executing
    Stopping { since: Instant },
}

enum Step {
    Wait(Duration),
    Finish(FinishReason, Option<RemoteResult>),
}

/// What one fetch achieved
#[derive(Debug, Clone, Copy, Default)]
struct Pull {
    fetched: bool,
    advanced: bool,
    more_data: Option<bool>,
}

pub(super) struct Collector<'a> {
    orchestrator: &'a BuildOrchestrator,
    id: Uuid,
    job: String,
    number: u64,
    started_at: Option<DateTime<Utc>>,
    offset: u64,
    phase: Phase,
    last_refresh: Option<Instant>,
    stalled_since: Option<Instant>,
    polls: u64,
}

impl<'a> Collector<'a> {
    pub(super) fn new(
        orchestrator: &'a BuildOrchestrator,
        record: &BuildRecord,
        number: u64,
        offset: u64,
    ) -> Self {
        Self {
            orchestrator,
            id: record.id,
            job: record.job_name.clone(),
            number,
            started_at: record.started_at,
            offset,
            phase: Phase::Collecting,
            last_refresh: None,
            stalled_since: None,
            polls: 0,
        }
    }

    pub(super) async fn run(mut self) -> Finish {
        info!(
            "Collecting logs of {} #{} from offset {}",
            self.job, self.number, self.offset
        );

        loop {
            let step = match self.phase {
                Phase::Collecting => self.collect().await,
                Phase::Stopping { since } => self.drain(since).await,
            };

            match step {
                Step::Wait(delay) => {
                    if !delay.is_zero() {
                        self.orchestrator.clock.sleep(delay).await;
                    }
                }
                Step::Finish(reason, result) => {
                    if reason != FinishReason::Stalled {
                        self.pull_tail().await;
                    }
                    return Finish {
                        reason,
                        result,
                        offset: self.offset,
                    };
                }
            }
        }
    }

    // =============================================================================
    // Phases
    // =============================================================================

    async fn collect(&mut self) -> Step {
        if self.stop_requested().await {
            self.begin_stop().await;
            return Step::Wait(Duration::ZERO);
        }

        let pull = self.pull().await;

        self.polls += 1;
        if self.polls % 10 == 0 {
            info!(
                "Poll #{} of {} #{}: offset={}",
                self.polls, self.job, self.number, self.offset
            );
        }

        if pull.fetched && pull.more_data == Some(true) {
            self.stalled_since = None;
            return Step::Wait(self.settings().poll_interval);
        }

        if pull.fetched {
            // The log endpoint can under-report, only the build status is final
            match self.orchestrator.remote.get_build(&self.job, self.number).await {
                Ok(info) if !info.building => {
                    info!("{} #{} finished remotely", self.job, self.number);
                    let result = RemoteResult::from_raw(info.result.as_deref());
                    return Step::Finish(FinishReason::Completed, Some(result));
                }
                // Building without new output still counts toward the stall
                Ok(_) => {}
                Err(e) => warn!(
                    "Failed to check status of {} #{}: {}",
                    self.job, self.number, e
                ),
            }
        }

        if pull.advanced {
            self.stalled_since = None;
            return Step::Wait(self.settings().poll_interval);
        }

        self.check_stall(FinishReason::Stalled)
    }

    async fn drain(&mut self, since: Instant) -> Step {
        let pull = self.pull().await;

        let confirmed_running = match self.orchestrator.remote.get_build(&self.job, self.number).await
        {
            Ok(info) if !info.building => {
                info!("{} #{} stopped remotely", self.job, self.number);
                return Step::Finish(FinishReason::Stopped, None);
            }
            Ok(_) => true,
            Err(e) => {
                warn!(
                    "Failed to check status of {} #{} while draining: {}",
                    self.job, self.number, e
                );
                false
            }
        };

        let draining_for = self.orchestrator.clock.now().duration_since(since);
        if draining_for > self.settings().drain_timeout {
            warn!(
                "{} #{} still running {:?} after stop request, giving up on drain",
                self.job, self.number, draining_for
            );
            return Step::Finish(FinishReason::Stopped, None);
        }

        if confirmed_running || pull.advanced {
            self.stalled_since = None;
            return Step::Wait(self.settings().poll_interval);
        }
        self.check_stall(FinishReason::Stopped)
    }

    // =============================================================================
    // Helpers
    // =============================================================================

    fn settings(&self) -> &super::PollSettings {
        &self.orchestrator.settings
    }

    /// Re-reads the record at the refresh cadence looking for a stop marker
    async fn stop_requested(&mut self) -> bool {
        let now = self.orchestrator.clock.now();
        let due = match self.last_refresh {
            Some(last) => now.duration_since(last) >= self.settings().record_refresh_interval,
            None => true,
        };
        if !due {
            return false;
        }
        self.last_refresh = Some(now);

        match self.orchestrator.records.read_status(self.id).await {
            Ok(Some(BuildStatus::StopRequested)) => true,
            Ok(_) => false,
            Err(e) => {
                warn!("Failed to refresh build record {}: {:#}", self.id, e);
                false
            }
        }
    }

    async fn begin_stop(&mut self) {
        info!(
            "Stop requested for {} #{}, stopping remote build and draining logs",
            self.job, self.number
        );
        self.phase = Phase::Stopping {
            since: self.orchestrator.clock.now(),
        };
        self.stalled_since = None;

        let remote = &self.orchestrator.remote;
        let (job, number) = (self.job.as_str(), self.number);
        match self
            .orchestrator
            .with_retries(&format!("Stop of {} #{}", job, number), || {
                remote.stop_build(job, number)
            })
            .await
        {
            Ok(()) => info!("Stop sent to {} #{}", job, number),
            Err(e) => warn!("Failed to stop {} #{}: {}", job, number, e),
        }
    }

    /// Fetches the next chunk and appends it if it lines up
    async fn pull(&mut self) -> Pull {
        let chunk = match self
            .orchestrator
            .remote
            .fetch_log(&self.job, self.number, self.offset)
            .await
        {
            Ok(chunk) => chunk,
            Err(e) if e.is_timeout() => {
                debug!(
                    "Log fetch of {} #{} at {} timed out",
                    self.job, self.number, self.offset
                );
                return Pull::default();
            }
            Err(e) => {
                warn!(
                    "Log fetch of {} #{} at {} failed: {}",
                    self.job, self.number, self.offset, e
                );
                return Pull::default();
            }
        };

        let mut pull = Pull {
            fetched: true,
            advanced: false,
            more_data: chunk.more_data,
        };

        match chunk.disposition(self.offset) {
            ChunkDisposition::Append { next_offset } => {
                match self
                    .orchestrator
                    .logs
                    .append(
                        &self.job,
                        self.number,
                        self.offset,
                        next_offset,
                        chunk.text.as_bytes(),
                    )
                    .await
                {
                    Ok(AppendOutcome::Appended) => {
                        self.offset = next_offset;
                        pull.advanced = true;
                        self.save_checkpoint().await;
                    }
                    Ok(AppendOutcome::Ahead { offset }) => {
                        // Another run of this build mirrored the range first
                        info!(
                            "Log of {} #{} already holds output up to {}, skipping from {}",
                            self.job, self.number, offset, self.offset
                        );
                        self.offset = offset;
                        pull.advanced = true;
                        self.save_checkpoint().await;
                    }
                    Err(e) => {
                        warn!(
                            "Failed to append log of {} #{}: {:#}",
                            self.job, self.number, e
                        );
                        return Pull::default();
                    }
                }
            }
            ChunkDisposition::Empty => {}
            ChunkDisposition::Skip => warn!(
                "Skipping chunk of {} #{}: starts at {} reporting size {}, expected offset {}",
                self.job, self.number, chunk.start, chunk.next_offset, self.offset
            ),
        }

        pull
    }

    /// Picks up output the remote flushed after reporting the end
    async fn pull_tail(&mut self) {
        for _ in 0..MAX_TAIL_FETCHES {
            let pull = self.pull().await;
            if !pull.advanced || pull.more_data != Some(true) {
                break;
            }
        }
    }

    async fn save_checkpoint(&self) {
        let checkpoint = LogCheckpoint::running(self.started_at, self.offset);
        if let Err(e) = self
            .orchestrator
            .checkpoints
            .write(&self.job, self.number, &checkpoint)
            .await
        {
            warn!(
                "Failed to checkpoint {} #{} at {}: {:#}",
                self.job, self.number, self.offset, e
            );
        }
    }

    fn check_stall(&mut self, reason: FinishReason) -> Step {
        let now = self.orchestrator.clock.now();
        let since = *self.stalled_since.get_or_insert(now);
        let stalled_for = now.duration_since(since);

        if stalled_for > self.settings().stability_timeout {
            warn!(
                "No sign of life from {} #{} for {:?}, assuming it is over",
                self.job, self.number, stalled_for
            );
            return Step::Finish(reason, None);
        }

        Step::Wait(self.settings().poll_interval)
    }
}
