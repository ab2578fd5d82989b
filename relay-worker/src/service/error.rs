//! Orchestrator errors
//!
//! Every error ends the run with the build record forced to FAILED.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The remote refused or never acknowledged the trigger
    #[error("failed to trigger {job}: {reason}")]
    TriggerRejected { job: String, reason: String },

    /// The queue item was cancelled before a build started
    #[error("queued build of {job} was cancelled: {reason}")]
    QueueCancelled { job: String, reason: String },

    /// Triggered without a queue location and the build list could not be
    /// read beforehand, so the new build cannot be told apart from old ones
    #[error("cannot identify the triggered build of {job}: {reason}")]
    UnknownBaseline { job: String, reason: String },

    /// No build number appeared within the allowed wait
    #[error("no build number assigned for {job} after {waited:?}")]
    BuildNumberTimeout { job: String, waited: Duration },

    /// Record store or storage failure
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
