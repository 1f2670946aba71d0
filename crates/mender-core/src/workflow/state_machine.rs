//! Task lifecycle transitions.
//!
//! ```text
//! QUEUED --dispatch--> RUNNING --success--> COMPLETED
//!                         |
//!                         +--failure, retries left--> QUEUED (retry_count += 1)
//!                         +--failure, exhausted-----> FAILED
//! QUEUED | RUNNING --cancel--> CANCELLED
//! ```
//!
//! Terminal tasks (COMPLETED, FAILED, CANCELLED) are never transitioned.

use chrono::{DateTime, Utc};
use mender_types::error::ExecutionError;
use mender_types::workflow::{Task, TaskStatus};

use super::retry::RetryPolicy;

pub const CANCELLED_ERROR: &str = "cancelled by request";
pub const INTERRUPTED_ERROR: &str = "interrupted by engine restart";

/// Result of resolving a RUNNING task with an executor outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Completed,
    /// Back to QUEUED; the same task is dispatched again.
    Retry,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} task '{task}' in status {from}")]
pub struct TransitionError {
    pub task: String,
    pub from: TaskStatus,
    pub action: &'static str,
}

/// Stateless transition functions over a `Task`.
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// QUEUED -> RUNNING.
    pub fn dispatch(task: &mut Task, now: DateTime<Utc>) -> Result<(), TransitionError> {
        Self::require(task, TaskStatus::Queued, "dispatch")?;
        task.status = TaskStatus::Running;
        task.updated_at = now;
        Ok(())
    }

    /// RUNNING -> COMPLETED | QUEUED | FAILED depending on the outcome and the
    /// retry policy.
    pub fn resolve(
        task: &mut Task,
        outcome: Result<serde_json::Value, ExecutionError>,
        now: DateTime<Utc>,
    ) -> Result<Resolution, TransitionError> {
        Self::require(task, TaskStatus::Running, "resolve")?;
        task.updated_at = now;

        match outcome {
            Ok(result) => {
                task.status = TaskStatus::Completed;
                task.result = Some(result);
                task.error = None;
                Ok(Resolution::Completed)
            }
            Err(err) => {
                task.error = Some(err.to_string());
                if RetryPolicy::should_retry(task.retry_count, task.max_retries) {
                    task.retry_count += 1;
                    task.status = TaskStatus::Queued;
                    Ok(Resolution::Retry)
                } else {
                    task.status = TaskStatus::Failed;
                    Ok(Resolution::Failed)
                }
            }
        }
    }

    /// QUEUED | RUNNING -> CANCELLED.
    pub fn cancel(task: &mut Task, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if task.status.is_terminal() {
            return Err(TransitionError {
                task: task.name.clone(),
                from: task.status,
                action: "cancel",
            });
        }
        task.status = TaskStatus::Cancelled;
        task.error = Some(CANCELLED_ERROR.to_string());
        task.updated_at = now;
        Ok(())
    }

    /// RUNNING -> QUEUED after a process restart. The interrupted attempt is
    /// not counted against `max_retries`.
    pub fn interrupt(task: &mut Task, now: DateTime<Utc>) -> Result<(), TransitionError> {
        Self::require(task, TaskStatus::Running, "interrupt")?;
        task.status = TaskStatus::Queued;
        task.error = Some(INTERRUPTED_ERROR.to_string());
        task.updated_at = now;
        Ok(())
    }

    fn require(task: &Task, expected: TaskStatus, action: &'static str) -> Result<(), TransitionError> {
        if task.status == expected {
            Ok(())
        } else {
            Err(TransitionError {
                task: task.name.clone(),
                from: task.status,
                action,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mender_types::workflow::TaskType;
    use serde_json::json;
    use uuid::Uuid;

    fn task(max_retries: u32) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            name: "processing".to_string(),
            task_type: TaskType::Compute,
            payload: json!({}),
            status: TaskStatus::Queued,
            retry_count: 0,
            max_retries,
            next_task: None,
            position: 0,
            error: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn fail() -> Result<serde_json::Value, ExecutionError> {
        Err(ExecutionError::Failed("Simulated Failure".to_string()))
    }

    #[test]
    fn dispatch_then_complete() {
        let mut t = task(3);
        TaskStateMachine::dispatch(&mut t, Utc::now()).unwrap();
        assert_eq!(t.status, TaskStatus::Running);

        let r = TaskStateMachine::resolve(&mut t, Ok(json!({"ok": true})), Utc::now()).unwrap();
        assert_eq!(r, Resolution::Completed);
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.result, Some(json!({"ok": true})));
    }

    #[test]
    fn failure_with_retries_left_requeues() {
        let mut t = task(3);
        TaskStateMachine::dispatch(&mut t, Utc::now()).unwrap();
        let r = TaskStateMachine::resolve(&mut t, fail(), Utc::now()).unwrap();
        assert_eq!(r, Resolution::Retry);
        assert_eq!(t.status, TaskStatus::Queued);
        assert_eq!(t.retry_count, 1);
        assert_eq!(t.error.as_deref(), Some("Simulated Failure"));
    }

    #[test]
    fn exhausting_retries_fails_at_max() {
        let mut t = task(3);
        let mut resolutions = Vec::new();
        for _ in 0..4 {
            TaskStateMachine::dispatch(&mut t, Utc::now()).unwrap();
            resolutions.push(TaskStateMachine::resolve(&mut t, fail(), Utc::now()).unwrap());
            assert!(t.retry_count <= t.max_retries);
        }
        assert_eq!(
            resolutions,
            vec![Resolution::Retry, Resolution::Retry, Resolution::Retry, Resolution::Failed]
        );
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.retry_count, 3);
    }

    #[test]
    fn success_after_retry_clears_error() {
        let mut t = task(3);
        TaskStateMachine::dispatch(&mut t, Utc::now()).unwrap();
        TaskStateMachine::resolve(&mut t, fail(), Utc::now()).unwrap();
        TaskStateMachine::dispatch(&mut t, Utc::now()).unwrap();
        TaskStateMachine::resolve(&mut t, Ok(json!({})), Utc::now()).unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.retry_count, 1);
        assert!(t.error.is_none());
    }

    #[test]
    fn zero_max_retries_fails_on_first_error() {
        let mut t = task(0);
        TaskStateMachine::dispatch(&mut t, Utc::now()).unwrap();
        let r = TaskStateMachine::resolve(&mut t, fail(), Utc::now()).unwrap();
        assert_eq!(r, Resolution::Failed);
        assert_eq!(t.retry_count, 0);
    }

    #[test]
    fn terminal_tasks_are_never_transitioned() {
        let mut t = task(0);
        TaskStateMachine::dispatch(&mut t, Utc::now()).unwrap();
        TaskStateMachine::resolve(&mut t, Ok(json!({})), Utc::now()).unwrap();

        assert!(TaskStateMachine::dispatch(&mut t, Utc::now()).is_err());
        assert!(TaskStateMachine::resolve(&mut t, fail(), Utc::now()).is_err());
        assert!(TaskStateMachine::cancel(&mut t, Utc::now()).is_err());
        assert_eq!(t.status, TaskStatus::Completed);
    }

    #[test]
    fn resolve_requires_running() {
        let mut t = task(3);
        let err = TaskStateMachine::resolve(&mut t, Ok(json!({})), Utc::now()).unwrap_err();
        assert_eq!(err.from, TaskStatus::Queued);
        assert_eq!(err.to_string(), "cannot resolve task 'processing' in status QUEUED");
    }

    #[test]
    fn cancel_running_task() {
        let mut t = task(3);
        TaskStateMachine::dispatch(&mut t, Utc::now()).unwrap();
        TaskStateMachine::cancel(&mut t, Utc::now()).unwrap();
        assert_eq!(t.status, TaskStatus::Cancelled);
        assert_eq!(t.error.as_deref(), Some(CANCELLED_ERROR));
    }

    #[test]
    fn interrupt_keeps_retry_count() {
        let mut t = task(3);
        t.retry_count = 2;
        TaskStateMachine::dispatch(&mut t, Utc::now()).unwrap();
        TaskStateMachine::interrupt(&mut t, Utc::now()).unwrap();
        assert_eq!(t.status, TaskStatus::Queued);
        assert_eq!(t.retry_count, 2);
        assert_eq!(t.error.as_deref(), Some(INTERRUPTED_ERROR));
    }
}
