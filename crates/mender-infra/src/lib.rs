//! Infrastructure layer for Mender.
//!
//! Implements the ports defined in `mender-core`: SQLite persistence for
//! `WorkflowRepository`, the concrete HTTP, compute and IO executors, and the
//! configuration loader.

pub mod config;
pub mod executor;
pub mod sqlite;
