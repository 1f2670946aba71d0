//! IO_OPERATION executor: file operations confined to a sandbox root.
//!
//! Payload: `{operation: "read"|"write"|"append"|"delete", path, content?}`.
//! `path` must be relative and may not climb out of the root, neither
//! lexically nor through a symlink inside the root. Anything else fails the
//! task before the file is opened.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use mender_core::workflow::executor::{TaskExecutor, TaskInvocation};
use mender_core::workflow::simulation::{SimulationDirectives, simulate_work};
use mender_types::error::ExecutionError;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;

use super::optional_str;

pub struct IoExecutor {
    root: PathBuf,
    simulated_work: Duration,
}

impl IoExecutor {
    pub fn new(root: PathBuf, simulated_work: Duration) -> Self {
        Self {
            root,
            simulated_work,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a payload path into the sandbox.
    fn resolve(&self, relative: &str) -> Result<PathBuf, ExecutionError> {
        let candidate = Path::new(relative);
        if relative.trim().is_empty() {
            return Err(ExecutionError::Failed("'path' must not be empty".to_string()));
        }
        for component in candidate.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(ExecutionError::Failed(format!(
                        "path '{relative}' escapes the IO sandbox"
                    )));
                }
            }
        }
        Ok(self.root.join(candidate))
    }

    /// Reject `path` if its deepest existing ancestor resolves outside the
    /// real root. A dangling symlink on the way is rejected too, since
    /// creating through it would land wherever it points.
    async fn confine(&self, path: &Path, relative: &str) -> Result<(), ExecutionError> {
        let escapes = || ExecutionError::Failed(format!("path '{relative}' escapes the IO sandbox"));
        let io_failed =
            |e: std::io::Error| ExecutionError::Failed(format!("cannot resolve '{relative}': {e}"));

        let root = real_existing_prefix(&self.root).await.map_err(io_failed)?;
        let target = match real_existing_prefix(path).await {
            Ok(target) => target,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(escapes()),
            Err(e) => return Err(io_failed(e)),
        };
        if target.starts_with(&root) {
            Ok(())
        } else {
            Err(escapes())
        }
    }
}

/// Canonical form of the longest prefix of `path` that exists on disk.
async fn real_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path;
    loop {
        match tokio::fs::symlink_metadata(existing).await {
            Ok(_) => return tokio::fs::canonicalize(existing).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => match existing.parent() {
                Some(parent) if parent.as_os_str().is_empty() => existing = Path::new("."),
                Some(parent) => existing = parent,
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

impl TaskExecutor for IoExecutor {
    fn name(&self) -> &str {
        "io"
    }

    async fn execute(&self, invocation: &TaskInvocation) -> Result<Value, ExecutionError> {
        SimulationDirectives::from_payload(&invocation.payload)
            .apply(invocation.attempt)
            .await?;

        let payload = &invocation.payload;
        let Some(operation) = optional_str(payload, "operation").map_err(ExecutionError::Failed)?
        else {
            return Ok(simulate_work(self.simulated_work).await);
        };
        let relative = optional_str(payload, "path")
            .map_err(ExecutionError::Failed)?
            .ok_or_else(|| ExecutionError::Failed(format!("{operation} requires 'path'")))?;
        let path = self.resolve(relative)?;
        self.confine(&path, relative).await?;
        let content = optional_str(payload, "content").map_err(ExecutionError::Failed)?;

        let io_failed = |e: std::io::Error| {
            ExecutionError::Failed(format!("{operation} '{relative}' failed: {e}"))
        };

        let result = match operation {
            "read" => {
                let text = tokio::fs::read_to_string(&path).await.map_err(io_failed)?;
                json!({"operation": "read", "path": relative, "bytes": text.len(), "content": text})
            }
            "write" | "append" => {
                let content = content.ok_or_else(|| {
                    ExecutionError::Failed(format!("{operation} requires 'content'"))
                })?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(io_failed)?;
                }
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(operation == "append")
                    .truncate(operation == "write")
                    .open(&path)
                    .await
                    .map_err(io_failed)?;
                file.write_all(content.as_bytes()).await.map_err(io_failed)?;
                file.flush().await.map_err(io_failed)?;
                json!({"operation": operation, "path": relative, "bytes": content.len()})
            }
            "delete" => {
                tokio::fs::remove_file(&path).await.map_err(io_failed)?;
                json!({"operation": "delete", "path": relative})
            }
            other => {
                return Err(ExecutionError::Failed(format!("unknown IO operation: '{other}'")));
            }
        };

        tracing::debug!(
            task = invocation.task_name.as_str(),
            operation,
            path = relative,
            "io task completed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mender_types::workflow::TaskType;
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn run(executor: &IoExecutor, payload: Value) -> Result<Value, ExecutionError> {
        let invocation = TaskInvocation {
            workflow_id: Uuid::now_v7(),
            task_id: Uuid::now_v7(),
            task_name: "store".to_string(),
            task_type: TaskType::IoOperation,
            payload,
            attempt: 1,
        };
        executor.execute(&invocation).await
    }

    fn sandbox() -> (TempDir, IoExecutor) {
        let dir = TempDir::new().unwrap();
        let executor = IoExecutor::new(dir.path().to_path_buf(), Duration::ZERO);
        (dir, executor)
    }

    #[tokio::test]
    async fn write_append_read_delete() {
        let (dir, io) = sandbox();

        let out = run(&io, json!({"operation": "write", "path": "out/report.txt", "content": "a"}))
            .await
            .unwrap();
        assert_eq!(out["bytes"], json!(1));
        run(&io, json!({"operation": "append", "path": "out/report.txt", "content": "bc"}))
            .await
            .unwrap();

        let read = run(&io, json!({"operation": "read", "path": "out/report.txt"}))
            .await
            .unwrap();
        assert_eq!(read["content"], json!("abc"));
        assert!(dir.path().join("out/report.txt").exists());

        run(&io, json!({"operation": "delete", "path": "out/report.txt"}))
            .await
            .unwrap();
        assert!(!dir.path().join("out/report.txt").exists());
    }

    #[tokio::test]
    async fn write_truncates_existing_content() {
        let (_dir, io) = sandbox();
        run(&io, json!({"operation": "write", "path": "f", "content": "long text"}))
            .await
            .unwrap();
        run(&io, json!({"operation": "write", "path": "f", "content": "x"}))
            .await
            .unwrap();
        let read = run(&io, json!({"operation": "read", "path": "f"})).await.unwrap();
        assert_eq!(read["content"], json!("x"));
    }

    #[tokio::test]
    async fn escaping_paths_are_rejected() {
        let (_dir, io) = sandbox();
        for path in ["../secret", "/etc/passwd", "a/../../b", ""] {
            let err = run(&io, json!({"operation": "read", "path": path}))
                .await
                .unwrap_err();
            assert!(matches!(err, ExecutionError::Failed(_)), "path {path:?}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_out_of_the_root_are_rejected() {
        let (dir, io) = sandbox();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), "s3cr3t").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("missing"),
            dir.path().join("dangling"),
        )
        .unwrap();

        let err = run(&io, json!({"operation": "read", "path": "link/secret"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("escapes the IO sandbox"));

        let err = run(&io, json!({"operation": "write", "path": "link/new.txt", "content": "x"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("escapes the IO sandbox"));
        assert!(!outside.path().join("new.txt").exists());

        let err = run(&io, json!({"operation": "write", "path": "dangling", "content": "x"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("escapes the IO sandbox"));
        assert!(!outside.path().join("missing").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_within_the_root_are_followed() {
        let (dir, io) = sandbox();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("data"), dir.path().join("alias")).unwrap();

        run(&io, json!({"operation": "write", "path": "alias/f.txt", "content": "ok"}))
            .await
            .unwrap();
        assert!(dir.path().join("data/f.txt").exists());
    }

    #[tokio::test]
    async fn missing_file_fails() {
        let (_dir, io) = sandbox();
        assert!(run(&io, json!({"operation": "read", "path": "nope"})).await.is_err());
        assert!(run(&io, json!({"operation": "delete", "path": "nope"})).await.is_err());
    }

    #[tokio::test]
    async fn invalid_payloads_fail() {
        let (_dir, io) = sandbox();
        assert!(run(&io, json!({"operation": "write", "path": "f"})).await.is_err());
        assert!(run(&io, json!({"operation": "chmod", "path": "f"})).await.is_err());
        assert!(run(&io, json!({"operation": "read"})).await.is_err());
    }

    #[tokio::test]
    async fn no_operation_is_simulated() {
        let (_dir, io) = sandbox();
        let out = run(&io, json!({"destination": "warehouse"})).await.unwrap();
        assert_eq!(out["processed"], json!(true));
    }
}
