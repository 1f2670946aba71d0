//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `mender-core` using sqlx with split
//! read/write pools. A workflow row carries the aggregate status; its tasks
//! live in `tasks`, one row per chain position. Every write runs in a single
//! writer transaction, and multi-statement reads run in a read transaction so
//! they see one WAL snapshot.

use chrono::{DateTime, SecondsFormat, Utc};
use mender_core::repository::workflow::WorkflowRepository;
use mender_types::error::RepositoryError;
use mender_types::workflow::{Task, TaskStatus, TaskType, Workflow, WorkflowStatus};
use sqlx::Row;
use sqlx::sqlite::SqliteConnection;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

const WORKFLOW_COLUMNS: &str = "id, name, status, error, created_at, updated_at";

const TASK_COLUMNS: &str = "id, workflow_id, name, task_type, payload, status, retry_count, \
     max_retries, next_task, position, error, result, created_at, updated_at";

struct WorkflowRow {
    id: String,
    name: String,
    status: String,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_workflow(self, tasks: Vec<Task>) -> Result<Workflow, RepositoryError> {
        let status: WorkflowStatus = self.status.parse().map_err(RepositoryError::Query)?;
        Ok(Workflow {
            id: parse_uuid(&self.id)?,
            name: self.name,
            status,
            error: self.error,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            tasks,
        })
    }
}

struct TaskRow {
    id: String,
    workflow_id: String,
    name: String,
    task_type: String,
    payload: String,
    status: String,
    retry_count: i64,
    max_retries: i64,
    next_task: Option<String>,
    position: i64,
    error: Option<String>,
    result: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            name: row.try_get("name")?,
            task_type: row.try_get("task_type")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            next_task: row.try_get("next_task")?,
            position: row.try_get("position")?,
            error: row.try_get("error")?,
            result: row.try_get("result")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_task(self) -> Result<Task, RepositoryError> {
        let task_type: TaskType = self.task_type.parse().map_err(RepositoryError::Query)?;
        let status: TaskStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| RepositoryError::Query(format!("invalid task payload: {e}")))?;
        let result = self
            .result
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid task result: {e}")))
            })
            .transpose()?;

        Ok(Task {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            name: self.name,
            task_type,
            payload,
            status,
            retry_count: to_u32(self.retry_count, "retry_count")?,
            max_retries: to_u32(self.max_retries, "max_retries")?,
            next_task: self.next_task,
            position: to_u32(self.position, "position")?,
            error: self.error,
            result,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 so that text order matches time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn to_u32(value: i64, column: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Query(format!("{column} out of range: {value}")))
}

fn encode_json(value: &serde_json::Value) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

async fn load_tasks(
    conn: &mut SqliteConnection,
    workflow_id: &str,
) -> Result<Vec<Task>, RepositoryError> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE workflow_id = ? ORDER BY position ASC");
    let rows = sqlx::query(&sql)
        .bind(workflow_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(query_error)?;

    let mut tasks = Vec::with_capacity(rows.len());
    for row in &rows {
        let r = TaskRow::from_row(row).map_err(query_error)?;
        tasks.push(r.into_task()?);
    }
    Ok(tasks)
}

/// Hydrate workflow rows with their tasks on the same connection.
async fn hydrate(
    conn: &mut SqliteConnection,
    rows: Vec<sqlx::sqlite::SqliteRow>,
) -> Result<Vec<Workflow>, RepositoryError> {
    let mut workflows = Vec::with_capacity(rows.len());
    for row in &rows {
        let r = WorkflowRow::from_row(row).map_err(query_error)?;
        let tasks = load_tasks(conn, &r.id).await?;
        workflows.push(r.into_workflow(tasks)?);
    }
    Ok(workflows)
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO workflows (id, name, status, error, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(workflow.status.to_string())
        .bind(&workflow.error)
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&workflow.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!("workflow {} already exists", workflow.id))
            } else {
                query_error(e)
            }
        })?;

        for task in &workflow.tasks {
            let result = task.result.as_ref().map(encode_json).transpose()?;
            sqlx::query(
                r#"INSERT INTO tasks
                   (id, workflow_id, name, task_type, payload, status, retry_count, max_retries,
                    next_task, position, error, result, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(task.id.to_string())
            .bind(workflow.id.to_string())
            .bind(&task.name)
            .bind(task.task_type.to_string())
            .bind(encode_json(&task.payload)?)
            .bind(task.status.to_string())
            .bind(i64::from(task.retry_count))
            .bind(i64::from(task.max_retries))
            .bind(&task.next_task)
            .bind(i64::from(task.position))
            .bind(&task.error)
            .bind(&result)
            .bind(format_datetime(&task.created_at))
            .bind(format_datetime(&task.updated_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    RepositoryError::Conflict(format!(
                        "task '{}' conflicts within workflow {}",
                        task.name, workflow.id
                    ))
                } else {
                    query_error(e)
                }
            })?;
        }

        // Dropping the transaction on an early return rolls it back.
        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        let mut tx = self.pool.reader.begin().await.map_err(query_error)?;

        let sql = format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_error)?;

        let workflow = match row {
            Some(row) => {
                let r = WorkflowRow::from_row(&row).map_err(query_error)?;
                let tasks = load_tasks(&mut tx, &r.id).await?;
                Some(r.into_workflow(tasks)?)
            }
            None => None,
        };
        tx.commit().await.map_err(query_error)?;
        Ok(workflow)
    }

    async fn list_workflows(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let mut tx = self.pool.reader.begin().await.map_err(query_error)?;

        let sql = format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&mut *tx)
            .await
            .map_err(query_error)?;

        let workflows = hydrate(&mut tx, rows).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(workflows)
    }

    async fn record_transition(
        &self,
        task: &Task,
        workflow_status: WorkflowStatus,
        workflow_error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let result = task.result.as_ref().map(encode_json).transpose()?;
        let updated_at = format_datetime(&task.updated_at);
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let updated = sqlx::query(
            r#"UPDATE tasks
               SET status = ?, retry_count = ?, error = ?, result = ?, updated_at = ?
               WHERE id = ? AND workflow_id = ?"#,
        )
        .bind(task.status.to_string())
        .bind(i64::from(task.retry_count))
        .bind(&task.error)
        .bind(&result)
        .bind(&updated_at)
        .bind(task.id.to_string())
        .bind(task.workflow_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        sqlx::query("UPDATE workflows SET status = ?, error = ?, updated_at = ? WHERE id = ?")
            .bind(workflow_status.to_string())
            .bind(workflow_error)
            .bind(&updated_at)
            .bind(task.workflow_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn list_unfinished_workflows(&self) -> Result<Vec<Workflow>, RepositoryError> {
        let mut tx = self.pool.reader.begin().await.map_err(query_error)?;

        // Oldest first so long-waiting workflows resume first.
        let sql = format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows \
             WHERE status IN ('QUEUED', 'RUNNING') ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *tx)
            .await
            .map_err(query_error)?;

        let workflows = hydrate(&mut tx, rows).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(workflows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::DatabasePool;
    use chrono::Duration;
    use serde_json::json;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn sample_workflow(name: &str, created_at: DateTime<Utc>) -> Workflow {
        let id = Uuid::now_v7();
        let make = |position: u32, task_name: &str, next: Option<&str>, task_type| Task {
            id: Uuid::now_v7(),
            workflow_id: id,
            name: task_name.to_string(),
            task_type,
            payload: json!({"operation": "sum", "values": [1, 2, 3]}),
            status: TaskStatus::Queued,
            retry_count: 0,
            max_retries: 3,
            next_task: next.map(str::to_string),
            position,
            error: None,
            result: None,
            created_at,
            updated_at: created_at,
        };
        Workflow {
            id,
            name: name.to_string(),
            status: WorkflowStatus::Queued,
            error: None,
            created_at,
            updated_at: created_at,
            tasks: vec![
                make(0, "ingest", Some("processing"), TaskType::HttpRequest),
                make(1, "processing", Some("store"), TaskType::Compute),
                make(2, "store", None, TaskType::IoOperation),
            ],
        }
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow("etl", Utc::now());
        repo.insert_workflow(&wf).await.unwrap();

        let loaded = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded, wf);
        let names: Vec<&str> = loaded.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["ingest", "processing", "store"]);
    }

    #[tokio::test]
    async fn get_missing_workflow_returns_none() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        assert!(repo.get_workflow(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_conflict() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow("etl", Utc::now());
        repo.insert_workflow(&wf).await.unwrap();
        let err = repo.insert_workflow(&wf).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn failed_insert_leaves_nothing_behind() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let mut wf = sample_workflow("broken", Utc::now());
        // Two tasks with the same position violate the chain uniqueness.
        wf.tasks[2].position = 1;
        assert!(repo.insert_workflow(&wf).await.is_err());
        assert!(repo.get_workflow(&wf.id).await.unwrap().is_none());
        assert!(repo.list_workflows(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_limited() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let wf = sample_workflow(&format!("wf-{i}"), base + Duration::milliseconds(i));
            ids.push(wf.id);
            repo.insert_workflow(&wf).await.unwrap();
        }

        let listed = repo.list_workflows(3, 0).await.unwrap();
        let listed_ids: Vec<Uuid> = listed.iter().map(|w| w.id).collect();
        assert_eq!(listed_ids, vec![ids[4], ids[3], ids[2]]);
        assert!(listed.iter().all(|w| w.tasks.len() == 3));

        let page = repo.list_workflows(3, 3).await.unwrap();
        let page_ids: Vec<Uuid> = page.iter().map(|w| w.id).collect();
        assert_eq!(page_ids, vec![ids[1], ids[0]]);
    }

    #[tokio::test]
    async fn list_ties_broken_by_id() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let at = Utc::now();
        let first = sample_workflow("a", at);
        let second = sample_workflow("b", at);
        repo.insert_workflow(&first).await.unwrap();
        repo.insert_workflow(&second).await.unwrap();

        let listed = repo.list_workflows(10, 0).await.unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn record_transition_updates_task_and_aggregate() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow("etl", Utc::now());
        repo.insert_workflow(&wf).await.unwrap();

        let mut task = wf.tasks[1].clone();
        task.status = TaskStatus::Failed;
        task.retry_count = 3;
        task.error = Some("Simulated Failure".to_string());
        task.updated_at = Utc::now();
        repo.record_transition(&task, WorkflowStatus::Failed, Some("Simulated Failure"))
            .await
            .unwrap();

        let loaded = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("Simulated Failure"));
        assert_eq!(loaded.updated_at, task.updated_at);
        assert_eq!(loaded.tasks[1], task);
        assert_eq!(loaded.tasks[0].status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn record_transition_stores_result() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow("etl", Utc::now());
        repo.insert_workflow(&wf).await.unwrap();

        let mut task = wf.tasks[0].clone();
        task.status = TaskStatus::Completed;
        task.result = Some(json!({"status": 200, "body": "ok"}));
        repo.record_transition(&task, WorkflowStatus::Running, None)
            .await
            .unwrap();

        let loaded = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.tasks[0].result, Some(json!({"status": 200, "body": "ok"})));
        assert_eq!(loaded.status, WorkflowStatus::Running);
    }

    #[tokio::test]
    async fn record_transition_unknown_task_is_not_found() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow("etl", Utc::now());
        repo.insert_workflow(&wf).await.unwrap();

        let mut stray = wf.tasks[0].clone();
        stray.id = Uuid::now_v7();
        let err = repo
            .record_transition(&stray, WorkflowStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));

        let loaded = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Queued);
    }

    #[tokio::test]
    async fn unfinished_workflows_exclude_terminal() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let base = Utc::now();
        let queued = sample_workflow("queued", base);
        let running = sample_workflow("running", base + Duration::milliseconds(1));
        let done = sample_workflow("done", base + Duration::milliseconds(2));
        for wf in [&queued, &running, &done] {
            repo.insert_workflow(wf).await.unwrap();
        }

        let mut t = running.tasks[0].clone();
        t.status = TaskStatus::Running;
        repo.record_transition(&t, WorkflowStatus::Running, None)
            .await
            .unwrap();

        let mut t = done.tasks[0].clone();
        t.status = TaskStatus::Cancelled;
        repo.record_transition(&t, WorkflowStatus::Cancelled, Some("cancelled by request"))
            .await
            .unwrap();

        let unfinished = repo.list_unfinished_workflows().await.unwrap();
        let ids: Vec<Uuid> = unfinished.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![queued.id, running.id]);
        assert_eq!(unfinished[1].tasks[0].status, TaskStatus::Running);
    }
}
