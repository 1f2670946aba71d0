//! Event types for the Mender workflow event bus.
//!
//! `WorkflowEvent` is broadcast after each persisted state change so that
//! notification and monitoring consumers can follow execution without
//! polling the store.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted while workflows are created and driven.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowCreated {
        workflow_id: Uuid,
        name: String,
        task_count: usize,
    },

    /// A task was dispatched to its executor.
    TaskQueued {
        workflow_id: Uuid,
        task_id: Uuid,
        task: String,
        attempt: u32,
    },

    TaskStarted {
        workflow_id: Uuid,
        task_id: Uuid,
        task: String,
        attempt: u32,
    },

    TaskCompleted {
        workflow_id: Uuid,
        task_id: Uuid,
        task: String,
        attempt: u32,
        duration_ms: u64,
    },

    /// A failed attempt will be re-dispatched after `delay_ms`.
    TaskRetry {
        workflow_id: Uuid,
        task_id: Uuid,
        task: String,
        retry_count: u32,
        error: String,
        delay_ms: u64,
    },

    /// A task exhausted its retries.
    TaskFailed {
        workflow_id: Uuid,
        task_id: Uuid,
        task: String,
        retry_count: u32,
        error: String,
    },

    WorkflowCompleted { workflow_id: Uuid, duration_ms: u64 },

    WorkflowFailed { workflow_id: Uuid, error: String },

    WorkflowCancelled { workflow_id: Uuid },
}

impl WorkflowEvent {
    /// Stable channel-style name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowCreated { .. } => "workflow.created",
            WorkflowEvent::TaskQueued { .. } => "task.queued",
            WorkflowEvent::TaskStarted { .. } => "task.started",
            WorkflowEvent::TaskCompleted { .. } => "task.completed",
            WorkflowEvent::TaskRetry { .. } => "task.retry",
            WorkflowEvent::TaskFailed { .. } => "task.failed",
            WorkflowEvent::WorkflowCompleted { .. } => "workflow.completed",
            WorkflowEvent::WorkflowFailed { .. } => "workflow.failed",
            WorkflowEvent::WorkflowCancelled { .. } => "workflow.cancelled",
        }
    }

    pub fn workflow_id(&self) -> Uuid {
        match self {
            WorkflowEvent::WorkflowCreated { workflow_id, .. }
            | WorkflowEvent::TaskQueued { workflow_id, .. }
            | WorkflowEvent::TaskStarted { workflow_id, .. }
            | WorkflowEvent::TaskCompleted { workflow_id, .. }
            | WorkflowEvent::TaskRetry { workflow_id, .. }
            | WorkflowEvent::TaskFailed { workflow_id, .. }
            | WorkflowEvent::WorkflowCompleted { workflow_id, .. }
            | WorkflowEvent::WorkflowFailed { workflow_id, .. }
            | WorkflowEvent::WorkflowCancelled { workflow_id } => *workflow_id,
        }
    }

    /// Whether this event reports the workflow reaching a final status.
    pub fn ends_workflow(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::WorkflowCompleted { .. }
                | WorkflowEvent::WorkflowFailed { .. }
                | WorkflowEvent::WorkflowCancelled { .. }
        )
    }

    /// The task this event concerns, if any.
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            WorkflowEvent::TaskQueued { task_id, .. }
            | WorkflowEvent::TaskStarted { task_id, .. }
            | WorkflowEvent::TaskCompleted { task_id, .. }
            | WorkflowEvent::TaskRetry { task_id, .. }
            | WorkflowEvent::TaskFailed { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }
}
