//! Scheduler layer for the worker
//!
//! Finds build records that still need driving and hands each one to the
//! orchestrator, one at a time per job and within a global limit.

pub mod dispatcher;

pub use dispatcher::BuildDispatcher;
