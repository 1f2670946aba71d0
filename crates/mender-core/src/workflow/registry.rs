//! Workflow registry: create, list, get, cancel.
//!
//! `create` validates the request into an ordered chain, persists the
//! workflow with every task QUEUED in one write, announces it, and hands it
//! to the dispatcher without waiting for execution.

use std::sync::Arc;

use chrono::Utc;
use mender_types::config::EngineConfig;
use mender_types::error::ValidationError;
use mender_types::event::WorkflowEvent;
use mender_types::workflow::{
    CreateWorkflowRequest, Task, TaskStatus, Workflow, WorkflowStatus,
};
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::workflow::WorkflowRepository;

use super::chain::build_chain;
use super::checkpoint::CheckpointManager;
use super::dispatcher::WorkflowDispatcher;
use super::state_machine::TaskStateMachine;

/// Request-level limits applied by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    pub default_max_retries: u32,
    pub max_retries_limit: u32,
    pub default_list_limit: u32,
    pub max_list_limit: u32,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RegistryLimits {
    fn from(config: &EngineConfig) -> Self {
        Self {
            default_max_retries: config.default_max_retries,
            max_retries_limit: config.max_retries_limit,
            default_list_limit: config.default_list_limit,
            max_list_limit: config.max_list_limit,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("workflow not found: {0}")]
    NotFound(Uuid),

    #[error("workflow {id} already finished with status {status}")]
    AlreadyFinished { id: Uuid, status: WorkflowStatus },

    #[error("repository error: {0}")]
    Repository(String),
}

pub struct WorkflowRegistry<R: WorkflowRepository> {
    repo: Arc<R>,
    dispatcher: Arc<WorkflowDispatcher>,
    event_bus: EventBus,
    limits: RegistryLimits,
}

impl<R: WorkflowRepository> WorkflowRegistry<R> {
    pub fn new(
        repo: Arc<R>,
        dispatcher: Arc<WorkflowDispatcher>,
        event_bus: EventBus,
        limits: RegistryLimits,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            event_bus,
            limits,
        }
    }

    pub fn limits(&self) -> &RegistryLimits {
        &self.limits
    }

    /// Validate, persist, and enqueue a new workflow. Returns the workflow as
    /// stored, with every task QUEUED.
    pub async fn create(&self, request: CreateWorkflowRequest) -> Result<Workflow, RegistryError> {
        let workflow = self.build_workflow(request)?;

        self.repo
            .insert_workflow(&workflow)
            .await
            .map_err(|e| RegistryError::Repository(e.to_string()))?;

        tracing::info!(
            workflow_id = %workflow.id,
            workflow = workflow.name.as_str(),
            tasks = workflow.tasks.len(),
            "workflow created"
        );
        self.event_bus.publish(WorkflowEvent::WorkflowCreated {
            workflow_id: workflow.id,
            name: workflow.name.clone(),
            task_count: workflow.tasks.len(),
        });

        if let Err(e) = self.dispatcher.enqueue(workflow.id) {
            // Persisted as QUEUED; recovery picks it up on the next start.
            tracing::warn!(workflow_id = %workflow.id, error = %e, "could not enqueue workflow");
        }

        Ok(workflow)
    }

    /// Most recent workflows first. `None` uses the default limit; larger
    /// values are capped.
    pub async fn list(&self, limit: Option<u32>) -> Result<Vec<Workflow>, RegistryError> {
        self.list_page(limit, 0).await
    }

    /// Like [`list`](Self::list), after skipping the `offset` newest.
    pub async fn list_page(
        &self,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<Vec<Workflow>, RegistryError> {
        let limit = limit
            .unwrap_or(self.limits.default_list_limit)
            .min(self.limits.max_list_limit);
        self.repo
            .list_workflows(limit, offset)
            .await
            .map_err(|e| RegistryError::Repository(e.to_string()))
    }

    pub async fn get(&self, id: Uuid) -> Result<Workflow, RegistryError> {
        self.repo
            .get_workflow(&id)
            .await
            .map_err(|e| RegistryError::Repository(e.to_string()))?
            .ok_or(RegistryError::NotFound(id))
    }

    /// Cancel a workflow that has not finished.
    ///
    /// An actively driven workflow is cancelled asynchronously by its
    /// orchestrator; the returned snapshot may still show it RUNNING. A
    /// workflow nobody is driving is cancelled here directly, while the
    /// dispatcher holds off any drive for it.
    pub async fn cancel(&self, id: Uuid) -> Result<Workflow, RegistryError> {
        let workflow = self.get(id).await?;
        if workflow.is_terminal() {
            return Err(RegistryError::AlreadyFinished {
                id,
                status: workflow.status,
            });
        }

        if self.dispatcher.cancel(id) {
            return Ok(workflow);
        }
        let Some(_claim) = self.dispatcher.claim_idle(id) else {
            // Enqueued since the check above.
            self.dispatcher.cancel(id);
            return Ok(workflow);
        };

        // Re-read under the claim; a drive may have finished in between.
        let mut workflow = self.get(id).await?;
        if workflow.is_terminal() {
            return Err(RegistryError::AlreadyFinished {
                id,
                status: workflow.status,
            });
        }
        let Some(index) = workflow
            .tasks
            .iter()
            .position(|t| t.status != TaskStatus::Completed)
        else {
            return Ok(workflow);
        };
        TaskStateMachine::cancel(&mut workflow.tasks[index], Utc::now())
            .map_err(|e| RegistryError::Repository(e.to_string()))?;
        CheckpointManager::new(Arc::clone(&self.repo))
            .checkpoint_task(&mut workflow, index)
            .await
            .map_err(|e| RegistryError::Repository(e.to_string()))?;

        tracing::info!(workflow_id = %id, "idle workflow cancelled");
        self.event_bus
            .publish(WorkflowEvent::WorkflowCancelled { workflow_id: id });
        Ok(workflow)
    }

    fn build_workflow(&self, request: CreateWorkflowRequest) -> Result<Workflow, ValidationError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        for spec in &request.tasks {
            let max_retries = spec.max_retries.unwrap_or(self.limits.default_max_retries);
            if max_retries > self.limits.max_retries_limit {
                return Err(ValidationError::MaxRetriesTooHigh {
                    task: spec.name.clone(),
                    max_retries,
                    limit: self.limits.max_retries_limit,
                });
            }
        }
        let chain = build_chain(&request.tasks)?;

        let workflow_id = Uuid::now_v7();
        let now = Utc::now();
        let tasks = chain
            .order
            .iter()
            .enumerate()
            .map(|(position, &i)| {
                let spec = &request.tasks[i];
                Task {
                    id: Uuid::now_v7(),
                    workflow_id,
                    name: spec.name.clone(),
                    task_type: chain.task_types[i],
                    payload: spec.payload.clone(),
                    status: TaskStatus::Queued,
                    retry_count: 0,
                    max_retries: spec.max_retries.unwrap_or(self.limits.default_max_retries),
                    next_task: spec.next_task.clone(),
                    position: position as u32,
                    error: None,
                    result: None,
                    created_at: now,
                    updated_at: now,
                }
            })
            .collect();

        Ok(Workflow {
            id: workflow_id,
            name: name.to_string(),
            status: WorkflowStatus::Queued,
            error: None,
            created_at: now,
            updated_at: now,
            tasks,
        })
    }
}
