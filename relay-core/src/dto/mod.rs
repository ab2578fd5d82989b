//! Data Transfer Objects for the remote CI runner
//!
//! Lightweight, lenient deserialization targets for the runner's JSON API.
//! Fields the orchestrator does not use are ignored.

pub mod remote;
