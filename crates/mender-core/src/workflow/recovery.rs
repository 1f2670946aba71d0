//! Crash recovery: resume unfinished workflows after a restart.
//!
//! Any workflow still QUEUED or RUNNING in the store was interrupted. Tasks
//! left RUNNING are put back to QUEUED without counting the interrupted
//! attempt, and each workflow is re-enqueued so its orchestrator continues at
//! the first task that is not COMPLETED.

use std::sync::Arc;

use chrono::Utc;
use mender_types::workflow::TaskStatus;

use crate::repository::workflow::WorkflowRepository;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::dispatcher::{Enqueued, WorkflowDispatcher};
use super::state_machine::TaskStateMachine;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Workflows handed back to the dispatcher.
    pub resumed: usize,
    /// Tasks that were RUNNING and have been reset to QUEUED.
    pub interrupted_tasks: usize,
}

pub async fn recover_interrupted<R: WorkflowRepository>(
    repo: Arc<R>,
    dispatcher: &WorkflowDispatcher,
) -> Result<RecoveryReport, CheckpointError> {
    let unfinished = repo
        .list_unfinished_workflows()
        .await
        .map_err(|e| CheckpointError::Repository(e.to_string()))?;
    let checkpoints = CheckpointManager::new(repo);
    let mut report = RecoveryReport::default();

    for mut workflow in unfinished {
        if dispatcher.is_active(workflow.id) {
            continue;
        }

        for index in 0..workflow.tasks.len() {
            if workflow.tasks[index].status != TaskStatus::Running {
                continue;
            }
            if let Err(e) = TaskStateMachine::interrupt(&mut workflow.tasks[index], Utc::now()) {
                tracing::warn!(workflow_id = %workflow.id, error = %e, "skipping task reset");
                continue;
            }
            checkpoints.checkpoint_task(&mut workflow, index).await?;
            report.interrupted_tasks += 1;
            tracing::warn!(
                workflow_id = %workflow.id,
                task = workflow.tasks[index].name.as_str(),
                retry_count = workflow.tasks[index].retry_count,
                "reset interrupted task to QUEUED"
            );
        }

        match dispatcher.enqueue(workflow.id) {
            Ok(Enqueued::Scheduled) => report.resumed += 1,
            Ok(Enqueued::AlreadyActive) => {}
            Err(e) => {
                tracing::warn!(workflow_id = %workflow.id, error = %e, "could not resume workflow");
            }
        }
    }

    if report.resumed > 0 {
        tracing::info!(
            resumed = report.resumed,
            interrupted_tasks = report.interrupted_tasks,
            "recovered unfinished workflows"
        );
    }
    Ok(report)
}
