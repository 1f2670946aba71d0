//! Shared domain types for Mender.
//!
//! This crate contains the core domain types used across the engine:
//! Workflow, Task, their statuses, the creation request, events,
//! configuration, and the associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
