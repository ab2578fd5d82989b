//! Repository layer
//!
//! Repositories are the orchestrator's collaborators: the remote runner,
//! the build record store, the log sink and the checkpoint store. They
//! provide narrow interfaces without any business logic.
//!
//! All repositories are trait-based so the orchestrator can be driven by
//! in-memory fakes in tests.

mod checkpoints;
mod layout;
mod logs;
mod records;
mod remote;

// Re-export traits
pub use checkpoints::CheckpointStore;
pub use logs::{AppendOutcome, LogSink};
pub use records::BuildRecordGateway;
pub use remote::RemoteRunner;

// Re-export implementations
pub use checkpoints::FileCheckpointStore;
pub use layout::BuildLayout;
pub use logs::FileLogSink;
pub use records::{BuildAssignment, PgBuildRecordGateway};
