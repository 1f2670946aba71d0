//! Workflow repository trait definition.
//!
//! Defines the storage interface for workflows and their task chains. The
//! infrastructure layer (mender-infra) implements this trait with SQLite
//! persistence; [`super::memory::InMemoryWorkflowRepository`] backs tests and
//! ephemeral runs.

use mender_types::error::RepositoryError;
use mender_types::workflow::{Task, Workflow, WorkflowStatus};
use uuid::Uuid;

/// Repository trait for workflow persistence.
///
/// Every method that writes must be atomic: a reader never observes a
/// workflow without its tasks, nor a task transition without the matching
/// aggregate status.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    /// Insert a workflow together with its full task chain.
    fn insert_workflow(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow with its tasks in chain order.
    fn get_workflow(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// Most recently created workflows first, skipping the newest `offset`
    /// and returning at most `limit`.
    fn list_workflows(
        &self,
        limit: u32,
        offset: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Persist one task's new state and the workflow's aggregate status in a
    /// single write. `task.updated_at` becomes the workflow's `updated_at`.
    fn record_transition(
        &self,
        task: &Task,
        workflow_status: WorkflowStatus,
        workflow_error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Workflows whose status is QUEUED or RUNNING (crash recovery).
    fn list_unfinished_workflows(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;
}
