//! Sequential driver for one workflow's task chain.
//!
//! `WorkflowOrchestrator::drive` walks the chain in order: dispatch the
//! current task, await its executor, resolve the outcome through the task
//! state machine, checkpoint, then advance, retry, or stop. Every transition
//! is checkpointed before the next one happens, so readers observe progress
//! strictly in chain order.
//!
//! Each attempt runs on its own spawned tokio task under a timeout. Panics,
//! timeouts, and executor errors all come back as an `ExecutionError` for the
//! task, so a task is never left RUNNING while the orchestrator is alive.
//! If the outcome of an attempt cannot be persisted, the task is released
//! back to QUEUED before the drive gives up, and the dispatcher drives the
//! workflow again later.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use mender_types::config::{BackoffConfig, EngineConfig};
use mender_types::error::ExecutionError;
use mender_types::event::WorkflowEvent;
use mender_types::workflow::{Task, TaskStatus, Workflow, WorkflowStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::workflow::WorkflowRepository;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::executor::{ExecutorSet, TaskInvocation};
use super::retry::RetryPolicy;
use super::state_machine::{Resolution, TaskStateMachine, TransitionError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default per-attempt timeout (5 minutes).
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub task_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            backoff: BackoffConfig::default(),
        }
    }
}

impl From<&EngineConfig> for OrchestratorSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            task_timeout: Duration::from_secs(config.task_timeout_secs),
            backoff: config.backoff,
        }
    }
}

/// How a single attempt ended, from the orchestrator's point of view.
enum Attempt {
    Finished(Result<serde_json::Value, ExecutionError>),
    Cancelled,
}

// ---------------------------------------------------------------------------
// WorkflowOrchestrator
// ---------------------------------------------------------------------------

/// Drives workflows one task at a time.
///
/// Stateless between calls; a single instance is shared by every concurrent
/// drive. Generic over `R: WorkflowRepository` for storage flexibility.
pub struct WorkflowOrchestrator<R: WorkflowRepository> {
    checkpoints: CheckpointManager<R>,
    executors: ExecutorSet,
    event_bus: EventBus,
    settings: OrchestratorSettings,
}

impl<R: WorkflowRepository + 'static> WorkflowOrchestrator<R> {
    pub fn new(
        repo: Arc<R>,
        executors: ExecutorSet,
        event_bus: EventBus,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            checkpoints: CheckpointManager::new(repo),
            executors,
            event_bus,
            settings,
        }
    }

    /// Drive `workflow_id` until it is COMPLETED, FAILED, or CANCELLED.
    ///
    /// Resumes at the first task that is not COMPLETED, so it is safe to call
    /// on a workflow that was interrupted. Returns the final workflow status.
    /// Must not be called concurrently for the same workflow.
    pub async fn drive(
        &self,
        workflow_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<WorkflowStatus, OrchestratorError> {
        let mut workflow = self.checkpoints.load(workflow_id).await?;
        if workflow.is_terminal() {
            tracing::debug!(workflow_id = %workflow_id, status = %workflow.status, "workflow already finished");
            return Ok(workflow.status);
        }

        tracing::info!(
            workflow_id = %workflow_id,
            workflow = workflow.name.as_str(),
            tasks = workflow.tasks.len(),
            "driving workflow"
        );
        let started = Instant::now();

        loop {
            let Some(index) = workflow
                .tasks
                .iter()
                .position(|t| t.status != TaskStatus::Completed)
            else {
                return Ok(self.finish_completed(&workflow, started));
            };

            match workflow.tasks[index].status {
                TaskStatus::Failed | TaskStatus::Cancelled => {
                    // Terminal task without a terminal aggregate: repair it.
                    self.checkpoints.checkpoint_task(&mut workflow, index).await?;
                    return Ok(workflow.status);
                }
                TaskStatus::Running => {
                    // Left over from an earlier drive that stopped mid-attempt.
                    TaskStateMachine::interrupt(&mut workflow.tasks[index], Utc::now())?;
                    self.checkpoints.checkpoint_task(&mut workflow, index).await?;
                }
                TaskStatus::Queued | TaskStatus::Completed => {}
            }

            if cancel.is_cancelled() {
                return self.cancel_at(&mut workflow, index).await;
            }

            let task = &workflow.tasks[index];
            self.event_bus.publish(WorkflowEvent::TaskQueued {
                workflow_id,
                task_id: task.id,
                task: task.name.clone(),
                attempt: task.retry_count + 1,
            });

            // QUEUED -> RUNNING
            TaskStateMachine::dispatch(&mut workflow.tasks[index], Utc::now())?;
            self.checkpoints.checkpoint_task(&mut workflow, index).await?;
            let dispatched = workflow.tasks[index].clone();
            let invocation = TaskInvocation::for_task(&workflow.tasks[index]);
            self.event_bus.publish(WorkflowEvent::TaskStarted {
                workflow_id,
                task_id: invocation.task_id,
                task: invocation.task_name.clone(),
                attempt: invocation.attempt,
            });
            tracing::debug!(
                workflow_id = %workflow_id,
                task = invocation.task_name.as_str(),
                attempt = invocation.attempt,
                "task dispatched"
            );

            let attempt_start = Instant::now();
            let outcome = match self.run_attempt(invocation, &cancel).await {
                Attempt::Finished(outcome) => outcome,
                Attempt::Cancelled => {
                    let cancelled = self.cancel_at(&mut workflow, index).await;
                    if cancelled.is_err() {
                        self.release(&mut workflow, index, dispatched).await;
                    }
                    return cancelled;
                }
            };

            // RUNNING -> COMPLETED | QUEUED | FAILED
            let resolution =
                TaskStateMachine::resolve(&mut workflow.tasks[index], outcome, Utc::now())?;
            if let Err(e) = self.checkpoints.checkpoint_task(&mut workflow, index).await {
                self.release(&mut workflow, index, dispatched).await;
                return Err(e.into());
            }
            let task = &workflow.tasks[index];

            match resolution {
                Resolution::Completed => {
                    tracing::info!(
                        workflow_id = %workflow_id,
                        task = task.name.as_str(),
                        retry_count = task.retry_count,
                        "task completed"
                    );
                    self.event_bus.publish(WorkflowEvent::TaskCompleted {
                        workflow_id,
                        task_id: task.id,
                        task: task.name.clone(),
                        attempt: task.retry_count + 1,
                        duration_ms: attempt_start.elapsed().as_millis() as u64,
                    });
                }
                Resolution::Retry => {
                    let error = task.error.clone().unwrap_or_default();
                    let delay = RetryPolicy::backoff_delay(&self.settings.backoff, task.retry_count);
                    tracing::warn!(
                        workflow_id = %workflow_id,
                        task = task.name.as_str(),
                        retry_count = task.retry_count,
                        max_retries = task.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = error.as_str(),
                        "task failed, retrying"
                    );
                    self.event_bus.publish(WorkflowEvent::TaskRetry {
                        workflow_id,
                        task_id: task.id,
                        task: task.name.clone(),
                        retry_count: task.retry_count,
                        error,
                        delay_ms: delay.as_millis() as u64,
                    });

                    if !delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                return self.cancel_at(&mut workflow, index).await;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                Resolution::Failed => {
                    return Ok(self.finish_failed(&workflow, task));
                }
            }
        }
    }

    /// Run one attempt on its own tokio task, bounded by the task timeout and
    /// raced against cancellation.
    async fn run_attempt(&self, invocation: TaskInvocation, cancel: &CancellationToken) -> Attempt {
        let executor = self.executors.for_type(invocation.task_type);
        let timeout = self.settings.task_timeout;
        let handle = tokio::spawn(async move { executor.execute(&invocation).await });
        let abort = handle.abort_handle();

        tokio::select! {
            _ = cancel.cancelled() => {
                // Any result the executor still produces is dropped with the task.
                abort.abort();
                Attempt::Cancelled
            }
            joined = tokio::time::timeout(timeout, handle) => match joined {
                Ok(Ok(outcome)) => Attempt::Finished(outcome),
                Ok(Err(join_err)) if join_err.is_panic() => {
                    Attempt::Finished(Err(ExecutionError::Panicked(panic_message(join_err.into_panic()))))
                }
                Ok(Err(_)) => Attempt::Finished(Err(ExecutionError::Failed(
                    "task execution aborted".to_string(),
                ))),
                Err(_) => {
                    abort.abort();
                    Attempt::Finished(Err(ExecutionError::Timeout(timeout.as_secs())))
                }
            },
        }
    }

    /// Put a task whose outcome could not be persisted back to QUEUED, from
    /// the RUNNING state it was dispatched with. The interrupted attempt does
    /// not count as a retry.
    async fn release(&self, workflow: &mut Workflow, index: usize, dispatched: Task) {
        workflow.tasks[index] = dispatched;
        if TaskStateMachine::interrupt(&mut workflow.tasks[index], Utc::now()).is_err() {
            return;
        }
        match self.checkpoints.checkpoint_task(workflow, index).await {
            Ok(()) => tracing::warn!(
                workflow_id = %workflow.id,
                task = workflow.tasks[index].name.as_str(),
                "outcome not persisted; task released to QUEUED"
            ),
            Err(e) => tracing::error!(
                workflow_id = %workflow.id,
                task = workflow.tasks[index].name.as_str(),
                error = %e,
                "could not release task; it stays RUNNING until the workflow is driven again"
            ),
        }
    }

    async fn cancel_at(
        &self,
        workflow: &mut Workflow,
        index: usize,
    ) -> Result<WorkflowStatus, OrchestratorError> {
        TaskStateMachine::cancel(&mut workflow.tasks[index], Utc::now())?;
        self.checkpoints.checkpoint_task(workflow, index).await?;
        tracing::info!(
            workflow_id = %workflow.id,
            task = workflow.tasks[index].name.as_str(),
            "workflow cancelled"
        );
        self.event_bus.publish(WorkflowEvent::WorkflowCancelled {
            workflow_id: workflow.id,
        });
        Ok(workflow.status)
    }

    fn finish_completed(&self, workflow: &Workflow, started: Instant) -> WorkflowStatus {
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            workflow_id = %workflow.id,
            workflow = workflow.name.as_str(),
            duration_ms,
            "workflow completed"
        );
        self.event_bus.publish(WorkflowEvent::WorkflowCompleted {
            workflow_id: workflow.id,
            duration_ms,
        });
        WorkflowStatus::Completed
    }

    fn finish_failed(&self, workflow: &Workflow, task: &Task) -> WorkflowStatus {
        let error = task.error.clone().unwrap_or_default();
        tracing::error!(
            workflow_id = %workflow.id,
            task = task.name.as_str(),
            retry_count = task.retry_count,
            error = error.as_str(),
            "task failed permanently, halting workflow"
        );
        self.event_bus.publish(WorkflowEvent::TaskFailed {
            workflow_id: workflow.id,
            task_id: task.id,
            task: task.name.clone(),
            retry_count: task.retry_count,
            error: error.clone(),
        });
        self.event_bus.publish(WorkflowEvent::WorkflowFailed {
            workflow_id: workflow.id,
            error,
        });
        workflow.status
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// OrchestratorError
// ---------------------------------------------------------------------------

/// Errors that stop a drive. Task failures are not errors here; they end up
/// in the task's `error` field.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("invalid transition: {0}")]
    Transition(#[from] TransitionError),
}

impl OrchestratorError {
    /// Whether driving the workflow again later can succeed: the store
    /// failed, but the workflow exists and its state is consistent.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Checkpoint(CheckpointError::Repository(_)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryWorkflowRepository;
    use crate::workflow::executor::{BoxTaskExecutor, TaskExecutor};
    use mender_types::workflow::TaskType;
    use serde_json::json;

    fn task(workflow_id: Uuid, position: u32, name: &str, next: Option<&str>, payload: serde_json::Value) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::now_v7(),
            workflow_id,
            name: name.to_string(),
            task_type: TaskType::Compute,
            payload,
            status: TaskStatus::Queued,
            retry_count: 0,
            max_retries: 3,
            next_task: next.map(str::to_string),
            position,
            error: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn workflow(payloads: [serde_json::Value; 3]) -> Workflow {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let [a, b, c] = payloads;
        Workflow {
            id,
            name: "etl".to_string(),
            status: WorkflowStatus::Queued,
            error: None,
            created_at: now,
            updated_at: now,
            tasks: vec![
                task(id, 0, "ingestion", Some("processing"), a),
                task(id, 1, "processing", Some("archival"), b),
                task(id, 2, "archival", None, c),
            ],
        }
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            task_timeout: Duration::from_secs(5),
            backoff: BackoffConfig::None,
        }
    }

    async fn setup(
        wf: &Workflow,
        executors: ExecutorSet,
    ) -> (Arc<InMemoryWorkflowRepository>, WorkflowOrchestrator<InMemoryWorkflowRepository>, EventBus) {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        repo.insert_workflow(wf).await.unwrap();
        let bus = EventBus::new(256);
        let orchestrator = WorkflowOrchestrator::new(Arc::clone(&repo), executors, bus.clone(), settings());
        (repo, orchestrator, bus)
    }

    #[tokio::test]
    async fn completes_chain_in_order() {
        let wf = workflow([json!({}), json!({}), json!({})]);
        let (repo, orch, bus) = setup(&wf, ExecutorSet::simulated(Duration::ZERO)).await;
        let mut rx = bus.subscribe();

        let status = orch.drive(wf.id, CancellationToken::new()).await.unwrap();
        assert_eq!(status, WorkflowStatus::Completed);

        let stored = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Completed);
        assert!(stored.tasks.iter().all(|t| t.status == TaskStatus::Completed && t.retry_count == 0));
        assert_eq!(stored.tasks[0].result, Some(json!({"status": "success", "processed": true})));

        let mut completed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WorkflowEvent::TaskCompleted { task, .. } = event {
                completed.push(task);
            }
        }
        assert_eq!(completed, vec!["ingestion", "processing", "archival"]);
    }

    #[tokio::test]
    async fn exhausted_task_fails_workflow_and_halts_chain() {
        let wf = workflow([json!({}), json!({"simulate_failure": true}), json!({})]);
        let (repo, orch, bus) = setup(&wf, ExecutorSet::simulated(Duration::ZERO)).await;
        let mut rx = bus.subscribe();

        let status = orch.drive(wf.id, CancellationToken::new()).await.unwrap();
        assert_eq!(status, WorkflowStatus::Failed);

        let stored = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(stored.tasks[0].status, TaskStatus::Completed);
        assert_eq!(stored.tasks[1].status, TaskStatus::Failed);
        assert_eq!(stored.tasks[1].retry_count, 3);
        assert_eq!(stored.tasks[2].status, TaskStatus::Queued);
        assert_eq!(stored.error.as_deref(), Some("Simulated Failure"));

        let mut retries = 0;
        let mut queued_attempts = Vec::new();
        let mut failed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                WorkflowEvent::TaskRetry { .. } => retries += 1,
                WorkflowEvent::TaskQueued { ref task, attempt, .. } if task == "processing" => {
                    queued_attempts.push(attempt)
                }
                WorkflowEvent::WorkflowFailed { .. } => failed = true,
                WorkflowEvent::TaskStarted { ref task, .. } => assert_ne!(task, "archival"),
                _ => {}
            }
        }
        assert_eq!(retries, 3);
        assert_eq!(queued_attempts, vec![1, 2, 3, 4]);
        assert!(failed);
    }

    #[tokio::test]
    async fn transient_failure_recovers() {
        let wf = workflow([json!({}), json!({"fail_attempts": 1}), json!({})]);
        let (repo, orch, _bus) = setup(&wf, ExecutorSet::simulated(Duration::ZERO)).await;

        let status = orch.drive(wf.id, CancellationToken::new()).await.unwrap();
        assert_eq!(status, WorkflowStatus::Completed);

        let stored = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(stored.tasks[1].status, TaskStatus::Completed);
        assert_eq!(stored.tasks[1].retry_count, 1);
        assert!(stored.tasks[1].error.is_none());
    }

    struct Panicky;

    impl TaskExecutor for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        async fn execute(
            &self,
            _invocation: &TaskInvocation,
        ) -> Result<serde_json::Value, ExecutionError> {
            panic!("executor blew up");
        }
    }

    #[tokio::test]
    async fn panicking_executor_becomes_task_failure() {
        let wf = workflow([json!({}), json!({}), json!({})]);
        let executors = ExecutorSet::new(
            BoxTaskExecutor::new(Panicky),
            BoxTaskExecutor::new(Panicky),
            BoxTaskExecutor::new(Panicky),
        );
        let (repo, orch, _bus) = setup(&wf, executors).await;

        let status = orch.drive(wf.id, CancellationToken::new()).await.unwrap();
        assert_eq!(status, WorkflowStatus::Failed);

        let stored = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(stored.tasks[0].status, TaskStatus::Failed);
        assert_eq!(stored.tasks[0].retry_count, 3);
        assert!(stored.tasks[0].error.as_deref().unwrap().contains("executor blew up"));
        assert!(stored.tasks.iter().all(|t| t.status != TaskStatus::Running));
    }

    #[tokio::test]
    async fn slow_attempt_times_out() {
        let mut wf = workflow([json!({"simulate_delay_ms": 10_000}), json!({}), json!({})]);
        wf.tasks[0].max_retries = 0;
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        repo.insert_workflow(&wf).await.unwrap();
        let orch = WorkflowOrchestrator::new(
            Arc::clone(&repo),
            ExecutorSet::simulated(Duration::ZERO),
            EventBus::new(16),
            OrchestratorSettings {
                task_timeout: Duration::from_millis(50),
                backoff: BackoffConfig::None,
            },
        );

        let status = orch.drive(wf.id, CancellationToken::new()).await.unwrap();
        assert_eq!(status, WorkflowStatus::Failed);
        let stored = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert!(stored.tasks[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_stops_in_flight_task() {
        let wf = workflow([json!({"simulate_delay_ms": 10_000}), json!({}), json!({})]);
        let (repo, orch, _bus) = setup(&wf, ExecutorSet::simulated(Duration::ZERO)).await;
        let orch = Arc::new(orch);
        let token = CancellationToken::new();

        let drive = {
            let orch = Arc::clone(&orch);
            let token = token.clone();
            let id = wf.id;
            tokio::spawn(async move { orch.drive(id, token).await })
        };

        for _ in 0..200 {
            let stored = repo.get_workflow(&wf.id).await.unwrap().unwrap();
            if stored.tasks[0].status == TaskStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();

        let status = drive.await.unwrap().unwrap();
        assert_eq!(status, WorkflowStatus::Cancelled);
        let stored = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Cancelled);
        assert_eq!(stored.tasks[0].status, TaskStatus::Cancelled);
        assert_eq!(stored.tasks[1].status, TaskStatus::Queued);
        assert_eq!(stored.tasks[2].status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn resumes_after_completed_prefix() {
        let mut wf = workflow([json!({}), json!({}), json!({})]);
        wf.tasks[0].status = TaskStatus::Completed;
        wf.tasks[1].status = TaskStatus::Running;
        wf.status = WorkflowStatus::Running;
        let (repo, orch, bus) = setup(&wf, ExecutorSet::simulated(Duration::ZERO)).await;
        let mut rx = bus.subscribe();

        let status = orch.drive(wf.id, CancellationToken::new()).await.unwrap();
        assert_eq!(status, WorkflowStatus::Completed);

        let stored = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(stored.tasks[1].retry_count, 0);
        let mut started = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WorkflowEvent::TaskStarted { task, .. } = event {
                started.push(task);
            }
        }
        assert_eq!(started, vec!["processing", "archival"]);
    }

    #[tokio::test]
    async fn terminal_workflow_is_not_driven_again() {
        let mut wf = workflow([json!({}), json!({}), json!({})]);
        for t in &mut wf.tasks {
            t.status = TaskStatus::Completed;
        }
        wf.status = WorkflowStatus::Completed;
        let (_repo, orch, bus) = setup(&wf, ExecutorSet::simulated(Duration::ZERO)).await;
        let mut rx = bus.subscribe();

        let status = orch.drive(wf.id, CancellationToken::new()).await.unwrap();
        assert_eq!(status, WorkflowStatus::Completed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unpersisted_outcome_releases_task_to_queued() {
        use crate::repository::memory::outage::FlakyWrites;

        let mut wf = workflow([json!({}), json!({}), json!({})]);
        wf.tasks[0].max_retries = 0;
        // Dispatch is written, every write of the outcome fails, the release lands.
        let repo = Arc::new(FlakyWrites::new(1, 3));
        repo.insert_workflow(&wf).await.unwrap();
        let orch = WorkflowOrchestrator::new(
            Arc::clone(&repo),
            ExecutorSet::simulated(Duration::ZERO),
            EventBus::new(64),
            settings(),
        );

        let err = orch.drive(wf.id, CancellationToken::new()).await.unwrap_err();
        assert!(err.is_transient());

        let stored = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(stored.tasks[0].status, TaskStatus::Queued);
        assert_eq!(stored.tasks[0].retry_count, 0);
        assert!(stored.tasks.iter().all(|t| t.status != TaskStatus::Running));

        // The store is healthy again: the next drive picks the task up.
        let status = orch.drive(wf.id, CancellationToken::new()).await.unwrap();
        assert_eq!(status, WorkflowStatus::Completed);
        let stored = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(stored.tasks[0].retry_count, 0);
        assert!(stored.tasks[0].error.is_none());
    }

    #[tokio::test]
    async fn unknown_workflow_is_an_error() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let orch = WorkflowOrchestrator::new(
            repo,
            ExecutorSet::simulated(Duration::ZERO),
            EventBus::new(4),
            settings(),
        );
        let err = orch.drive(Uuid::now_v7(), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Checkpoint(CheckpointError::WorkflowNotFound(_))));
        assert!(!err.is_transient());
    }
}
