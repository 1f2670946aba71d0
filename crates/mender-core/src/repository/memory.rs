//! In-memory `WorkflowRepository` backed by a `DashMap`.
//!
//! Each workflow lives in its own map entry, so writes to different workflows
//! only contend on a shard lock and never on a global one. Reads clone the
//! entry, which gives callers a consistent snapshot.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use mender_types::error::RepositoryError;
use mender_types::workflow::{Task, Workflow, WorkflowStatus};
use uuid::Uuid;

use super::workflow::WorkflowRepository;

#[derive(Debug, Default)]
pub struct InMemoryWorkflowRepository {
    workflows: DashMap<Uuid, Workflow>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        match self.workflows.entry(workflow.id) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "workflow {} already exists",
                workflow.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(workflow.clone());
                Ok(())
            }
        }
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.workflows.get(id).map(|entry| entry.value().clone()))
    }

    async fn list_workflows(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let mut all: Vec<Workflow> = self
            .workflows
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn record_transition(
        &self,
        task: &Task,
        workflow_status: WorkflowStatus,
        workflow_error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut entry = self
            .workflows
            .get_mut(&task.workflow_id)
            .ok_or(RepositoryError::NotFound)?;
        let workflow = entry.value_mut();
        let slot = workflow
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = task.clone();
        workflow.status = workflow_status;
        workflow.error = workflow_error.map(str::to_string);
        workflow.updated_at = task.updated_at;
        Ok(())
    }

    async fn list_unfinished_workflows(&self) -> Result<Vec<Workflow>, RepositoryError> {
        let mut unfinished: Vec<Workflow> = self
            .workflows
            .iter()
            .filter(|entry| !entry.value().status.is_terminal())
            .map(|entry| entry.value().clone())
            .collect();
        unfinished.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(unfinished)
    }
}
