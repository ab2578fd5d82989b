//! Core domain types
//!
//! These types are shared between the remote runner client (which produces
//! log chunks and results) and the worker (which persists records and
//! checkpoints).

pub mod build;
pub mod checkpoint;
pub mod log;
pub mod result;
