//! Workflow event distribution.
//!
//! `EventBus` fans `WorkflowEvent`s out over a `tokio::sync::broadcast`
//! channel, whole or per workflow; `EventCounters` keeps per-kind totals for
//! monitoring.

pub mod bus;
pub mod metrics;

pub use bus::{EventBus, WorkflowSubscription};
pub use metrics::EventCounters;
