//! Task executor port.
//!
//! An executor performs the actual work described by a task payload and
//! reports success (with a JSON result) or an `ExecutionError`. Executors are
//! stateless with respect to the engine; retries simply call them again.
//!
//! `TaskExecutor` uses RPITIT and is therefore not object safe. The
//! `TaskExecutorDyn` / `BoxTaskExecutor` pair provides dynamic dispatch:
//! 1. `TaskExecutorDyn` is the object-safe twin with boxed futures
//! 2. it is blanket-implemented for every `T: TaskExecutor`
//! 3. `BoxTaskExecutor` wraps `Box<dyn TaskExecutorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use mender_types::error::ExecutionError;
use mender_types::workflow::{Task, TaskType};
use uuid::Uuid;

use super::simulation::SimulatedExecutor;

/// Everything an executor gets to see about one attempt.
#[derive(Debug, Clone)]
pub struct TaskInvocation {
    pub workflow_id: Uuid,
    pub task_id: Uuid,
    pub task_name: String,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    /// 1-based attempt number (`retry_count + 1`).
    pub attempt: u32,
}

impl TaskInvocation {
    pub fn for_task(task: &Task) -> Self {
        Self {
            workflow_id: task.workflow_id,
            task_id: task.id,
            task_name: task.name.clone(),
            task_type: task.task_type,
            payload: task.payload.clone(),
            attempt: task.retry_count + 1,
        }
    }
}

/// Runs one task payload.
pub trait TaskExecutor: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    fn execute(
        &self,
        invocation: &TaskInvocation,
    ) -> impl Future<Output = Result<serde_json::Value, ExecutionError>> + Send;
}

/// Object-safe version of [`TaskExecutor`] with boxed futures.
pub trait TaskExecutorDyn: Send + Sync {
    fn name(&self) -> &str;

    fn execute_boxed<'a>(
        &'a self,
        invocation: &'a TaskInvocation,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ExecutionError>> + Send + 'a>>;
}

impl<T: TaskExecutor> TaskExecutorDyn for T {
    fn name(&self) -> &str {
        TaskExecutor::name(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        invocation: &'a TaskInvocation,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ExecutionError>> + Send + 'a>> {
        Box::pin(self.execute(invocation))
    }
}

/// Type-erased executor so the three task types can be served by different
/// concrete implementations chosen at startup.
pub struct BoxTaskExecutor {
    inner: Box<dyn TaskExecutorDyn + Send + Sync>,
}

impl BoxTaskExecutor {
    pub fn new<T: TaskExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn execute(
        &self,
        invocation: &TaskInvocation,
    ) -> Result<serde_json::Value, ExecutionError> {
        self.inner.execute_boxed(invocation).await
    }
}

impl std::fmt::Debug for BoxTaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTaskExecutor")
            .field("name", &self.name())
            .finish()
    }
}

/// One executor per task type. The mapping is fixed at construction; there is
/// no runtime lookup by string.
#[derive(Debug, Clone)]
pub struct ExecutorSet {
    http: Arc<BoxTaskExecutor>,
    compute: Arc<BoxTaskExecutor>,
    io: Arc<BoxTaskExecutor>,
}

impl ExecutorSet {
    pub fn new(http: BoxTaskExecutor, compute: BoxTaskExecutor, io: BoxTaskExecutor) -> Self {
        Self {
            http: Arc::new(http),
            compute: Arc::new(compute),
            io: Arc::new(io),
        }
    }

    /// Every task type served by [`SimulatedExecutor`].
    pub fn simulated(work: Duration) -> Self {
        Self::new(
            BoxTaskExecutor::new(SimulatedExecutor::new(work)),
            BoxTaskExecutor::new(SimulatedExecutor::new(work)),
            BoxTaskExecutor::new(SimulatedExecutor::new(work)),
        )
    }

    pub fn for_type(&self, task_type: TaskType) -> Arc<BoxTaskExecutor> {
        match task_type {
            TaskType::HttpRequest => Arc::clone(&self.http),
            TaskType::Compute => Arc::clone(&self.compute),
            TaskType::IoOperation => Arc::clone(&self.io),
        }
    }
}
