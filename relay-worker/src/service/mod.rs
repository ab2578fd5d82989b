//! Service layer
//!
//! The build orchestrator: discovering or triggering a remote build,
//! mirroring its console output, reacting to stop requests and writing the
//! final outcome. It only talks to the outside world through the
//! repository traits and the clock, all injected at construction.

mod collector;
mod discovery;
mod error;
mod orchestrator;

pub use error::OrchestratorError;
pub use orchestrator::{BuildOrchestrator, PollSettings, RunOutcome};
