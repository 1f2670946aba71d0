use thiserror::Error;

/// Reasons a workflow creation request is rejected. Nothing is persisted
/// when any of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("workflow must contain at least one task")]
    NoTasks,

    #[error("task at index {0} has an empty name")]
    EmptyTaskName(usize),

    #[error("duplicate task name '{0}'")]
    DuplicateTaskName(String),

    #[error("task '{task}' has unknown task_type '{task_type}'")]
    UnknownTaskType { task: String, task_type: String },

    #[error("task '{task}' references unknown next_task '{next}'")]
    UnknownSuccessor { task: String, next: String },

    #[error("task '{0}' references itself as next_task")]
    SelfReference(String),

    #[error("task '{successor}' is the next_task of both '{first}' and '{second}'")]
    SharedSuccessor {
        successor: String,
        first: String,
        second: String,
    },

    #[error("ambiguous chain head: {0:?} are not referenced by any task")]
    AmbiguousHead(Vec<String>),

    #[error("task chain contains a cycle")]
    Cycle,

    #[error("task '{task}' max_retries {max_retries} exceeds the limit of {limit}")]
    MaxRetriesTooHigh {
        task: String,
        max_retries: u32,
        limit: u32,
    },
}

/// Failure of a single task attempt. Fed to the retry policy; never surfaced
/// to callers of create/list/get except through the task's `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),

    #[error("task execution timed out after {0}s")]
    Timeout(u64),

    #[error("executor panicked: {0}")]
    Panicked(String),

    #[error("task execution cancelled")]
    Cancelled,
}

/// Errors from repository operations (used by trait definitions in mender-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::UnknownSuccessor {
            task: "ingest".to_string(),
            next: "proces".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "task 'ingest' references unknown next_task 'proces'"
        );
        assert_eq!(ValidationError::Cycle.to_string(), "task chain contains a cycle");
    }

    #[test]
    fn test_execution_error_display() {
        assert_eq!(
            ExecutionError::Failed("Simulated Failure".to_string()).to_string(),
            "Simulated Failure"
        );
        assert_eq!(
            ExecutionError::Timeout(30).to_string(),
            "task execution timed out after 30s"
        );
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}
