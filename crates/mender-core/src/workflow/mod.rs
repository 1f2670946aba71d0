//! Workflow engine core: chain validation, task lifecycle, and execution.
//!
//! - `chain` -- validates a request's successor references into an ordered chain
//! - `retry` -- retry predicate and backoff delays
//! - `state_machine` -- task status transitions
//! - `executor` -- executor port, dynamic dispatch wrapper, per-type executor set
//! - `simulation` -- payload-driven failure/latency injection and the simulated executor
//! - `checkpoint` -- persists each transition with the recomputed workflow status
//! - `orchestrator` -- drives one workflow's chain to a terminal status
//! - `dispatcher` -- queue + bounded concurrent drives + cancellation tokens
//! - `registry` -- create/list/get/cancel
//! - `recovery` -- resumes workflows interrupted by a restart

pub mod chain;
pub mod checkpoint;
pub mod dispatcher;
pub mod executor;
pub mod orchestrator;
pub mod recovery;
pub mod registry;
pub mod retry;
pub mod simulation;
pub mod state_machine;
