//! Orchestration engine and repository trait definitions for Mender.
//!
//! This crate defines the "ports" (repository and executor traits) that the
//! infrastructure layer implements, plus the engine that drives workflows.
//! It depends only on `mender-types` -- never on `mender-infra` or any
//! database/IO crate.

pub mod event;
pub mod repository;
pub mod workflow;
