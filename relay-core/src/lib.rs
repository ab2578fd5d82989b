//! Relay Core
//!
//! Core types for the Relay build orchestrator.
//!
//! This crate contains:
//! - Domain types: Build records, statuses, log checkpoints and chunks
//! - DTOs: Wire representations of the remote CI runner's JSON API

pub mod domain;
pub mod dto;
