//! Workflow domain types for Mender.
//!
//! A `Workflow` is a named, linear chain of `Task`s executed one at a time.
//! Tasks are stored in chain order (`position`), and each task names its
//! successor through `next_task`. This module also holds the creation request
//! shape accepted by the registry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Aggregate status of a workflow, derived from its task statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Terminal workflows are never driven again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Lifecycle status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Queued => write!(f, "QUEUED"),
            WorkflowStatus::Running => write!(f, "RUNNING"),
            WorkflowStatus::Completed => write!(f, "COMPLETED"),
            WorkflowStatus::Failed => write!(f, "FAILED"),
            WorkflowStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Ok(WorkflowStatus::Queued),
            "RUNNING" => Ok(WorkflowStatus::Running),
            "COMPLETED" => Ok(WorkflowStatus::Completed),
            "FAILED" => Ok(WorkflowStatus::Failed),
            "CANCELLED" => Ok(WorkflowStatus::Cancelled),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "QUEUED"),
            TaskStatus::Running => write!(f, "RUNNING"),
            TaskStatus::Completed => write!(f, "COMPLETED"),
            TaskStatus::Failed => write!(f, "FAILED"),
            TaskStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Ok(TaskStatus::Queued),
            "RUNNING" => Ok(TaskStatus::Running),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            other => Err(format!("invalid task status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Task type
// ---------------------------------------------------------------------------

/// The closed set of work units a task can describe.
///
/// Each variant is handled by exactly one executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    HttpRequest,
    Compute,
    IoOperation,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [TaskType::HttpRequest, TaskType::Compute, TaskType::IoOperation];
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::HttpRequest => write!(f, "HTTP_REQUEST"),
            TaskType::Compute => write!(f, "COMPUTE"),
            TaskType::IoOperation => write!(f, "IO_OPERATION"),
        }
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTP_REQUEST" => Ok(TaskType::HttpRequest),
            "COMPUTE" => Ok(TaskType::Compute),
            "IO_OPERATION" => Ok(TaskType::IoOperation),
            other => Err(format!("unknown task type: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One unit of work within a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// UUIDv7 assigned at creation.
    pub id: Uuid,
    /// Owning workflow.
    pub workflow_id: Uuid,
    /// Unique within the workflow; referenced by `next_task`.
    pub name: String,
    pub task_type: TaskType,
    /// Executor-specific configuration. Never inspected by the engine itself.
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    /// Number of failed attempts that were retried.
    pub retry_count: u32,
    pub max_retries: u32,
    /// Name of the successor task, or `None` for the last task in the chain.
    #[serde(default)]
    pub next_task: Option<String>,
    /// 0-based index in chain order.
    pub position: u32,
    /// Latest failure detail.
    #[serde(default)]
    pub error: Option<String>,
    /// Executor output of the successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Whether this task has been attempted at least once.
    pub fn has_started(&self) -> bool {
        self.status != TaskStatus::Queued || self.retry_count > 0 || self.error.is_some()
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A named chain of tasks with an aggregate status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub status: WorkflowStatus,
    /// Terminal failure detail, copied from the task that failed.
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Tasks in chain order.
    pub tasks: Vec<Task>,
}

impl Workflow {
    /// Compute the aggregate status from the task chain.
    ///
    /// FAILED and CANCELLED win over everything else; COMPLETED requires every
    /// task to be COMPLETED; QUEUED means no task has been attempted yet.
    pub fn derive_status(&self) -> WorkflowStatus {
        if self.tasks.iter().any(|t| t.status == TaskStatus::Failed) {
            return WorkflowStatus::Failed;
        }
        if self.tasks.iter().any(|t| t.status == TaskStatus::Cancelled) {
            return WorkflowStatus::Cancelled;
        }
        if self.tasks.iter().all(|t| t.status == TaskStatus::Completed) {
            return WorkflowStatus::Completed;
        }
        if self.tasks.iter().any(Task::has_started) {
            WorkflowStatus::Running
        } else {
            WorkflowStatus::Queued
        }
    }

    /// The first task in chain order that has not completed.
    pub fn current_task(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.status != TaskStatus::Completed)
    }

    pub fn task(&self, task_id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Creation request
// ---------------------------------------------------------------------------

/// Body of a workflow creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub tasks: Vec<TaskSpec>,
}

/// One task as described by the caller. `task_type` stays a string until
/// validation so unknown values surface as validation errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub task_type: String,
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_task: Option<String>,
    /// Falls back to the engine's configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

fn empty_payload() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
