//! Durable checkpoints for workflow execution state.
//!
//! Wraps `WorkflowRepository` so the orchestrator persists every task
//! transition together with the recomputed workflow status before moving on.
//! Concurrent readers therefore always see the chain's latest consistent
//! state.

use std::sync::Arc;
use std::time::Duration;

use mender_types::workflow::{TaskStatus, Workflow, WorkflowStatus};
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

use super::state_machine::CANCELLED_ERROR;

/// Write attempts before a checkpoint failure is reported.
const CHECKPOINT_ATTEMPTS: u32 = 3;
const CHECKPOINT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Persists task transitions for the orchestrator.
///
/// Generic over `R: WorkflowRepository` so it works with any storage backend.
pub struct CheckpointManager<R: WorkflowRepository> {
    repo: Arc<R>,
}

impl<R: WorkflowRepository> CheckpointManager<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub async fn load(&self, workflow_id: Uuid) -> Result<Workflow, CheckpointError> {
        self.repo
            .get_workflow(&workflow_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::WorkflowNotFound(workflow_id))
    }

    /// Recompute the aggregate status of `workflow` and persist the task at
    /// `task_index` along with it.
    ///
    /// Transient repository errors are retried a few times; the in-memory
    /// `workflow` stays authoritative while the write is retried.
    pub async fn checkpoint_task(
        &self,
        workflow: &mut Workflow,
        task_index: usize,
    ) -> Result<(), CheckpointError> {
        refresh_aggregate(workflow, task_index);
        let task = &workflow.tasks[task_index];

        let mut attempt = 1;
        loop {
            match self
                .repo
                .record_transition(task, workflow.status, workflow.error.as_deref())
                .await
            {
                Ok(()) => {
                    tracing::debug!(
                        workflow_id = %workflow.id,
                        task = task.name.as_str(),
                        task_status = %task.status,
                        workflow_status = %workflow.status,
                        "checkpointed task transition"
                    );
                    return Ok(());
                }
                Err(e) if attempt < CHECKPOINT_ATTEMPTS => {
                    tracing::warn!(
                        workflow_id = %workflow.id,
                        task = task.name.as_str(),
                        attempt,
                        error = %e,
                        "checkpoint write failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(CHECKPOINT_RETRY_DELAY).await;
                }
                Err(e) => return Err(CheckpointError::Repository(e.to_string())),
            }
        }
    }
}

/// Set status, error and `updated_at` of `workflow` from its tasks.
fn refresh_aggregate(workflow: &mut Workflow, task_index: usize) {
    let status = workflow.derive_status();
    workflow.error = match status {
        WorkflowStatus::Failed => workflow
            .tasks
            .iter()
            .find(|t| t.status == TaskStatus::Failed)
            .and_then(|t| t.error.clone()),
        WorkflowStatus::Cancelled => Some(CANCELLED_ERROR.to_string()),
        _ => None,
    };
    workflow.status = status;
    workflow.updated_at = workflow.tasks[task_index].updated_at;
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryWorkflowRepository;
    use chrono::Utc;
    use mender_types::workflow::{Task, TaskType};
    use serde_json::json;

    fn two_task_workflow() -> Workflow {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let tasks = (0..2)
            .map(|i| Task {
                id: Uuid::now_v7(),
                workflow_id: id,
                name: format!("t{i}"),
                task_type: TaskType::Compute,
                payload: json!({}),
                status: TaskStatus::Queued,
                retry_count: 0,
                max_retries: 1,
                next_task: (i == 0).then(|| "t1".to_string()),
                position: i,
                error: None,
                result: None,
                created_at: now,
                updated_at: now,
            })
            .collect();
        Workflow {
            id,
            name: "wf".to_string(),
            status: WorkflowStatus::Queued,
            error: None,
            created_at: now,
            updated_at: now,
            tasks,
        }
    }

    #[tokio::test]
    async fn checkpoint_persists_running_aggregate() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let mut wf = two_task_workflow();
        repo.insert_workflow(&wf).await.unwrap();
        let checkpoints = CheckpointManager::new(Arc::clone(&repo));

        wf.tasks[0].status = TaskStatus::Running;
        checkpoints.checkpoint_task(&mut wf, 0).await.unwrap();

        let stored = checkpoints.load(wf.id).await.unwrap();
        assert_eq!(stored.status, WorkflowStatus::Running);
        assert_eq!(stored.tasks[0].status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn failed_task_error_copied_to_workflow() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let mut wf = two_task_workflow();
        repo.insert_workflow(&wf).await.unwrap();
        let checkpoints = CheckpointManager::new(Arc::clone(&repo));

        wf.tasks[0].status = TaskStatus::Failed;
        wf.tasks[0].error = Some("disk full".to_string());
        checkpoints.checkpoint_task(&mut wf, 0).await.unwrap();

        let stored = checkpoints.load(wf.id).await.unwrap();
        assert_eq!(stored.status, WorkflowStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("disk full"));
        assert_eq!(stored.tasks[1].status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn checkpoint_of_unknown_workflow_fails_after_retries() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let checkpoints = CheckpointManager::new(repo);
        let mut wf = two_task_workflow();
        let err = checkpoints.checkpoint_task(&mut wf, 0).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Repository(_)));
    }

    #[tokio::test]
    async fn load_missing_workflow() {
        let checkpoints = CheckpointManager::new(Arc::new(InMemoryWorkflowRepository::new()));
        let id = Uuid::now_v7();
        assert!(matches!(
            checkpoints.load(id).await.unwrap_err(),
            CheckpointError::WorkflowNotFound(missing) if missing == id
        ));
    }
}
