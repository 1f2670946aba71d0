//! CLI workflow subcommands: run, list, show.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use uuid::Uuid;

use mender_types::workflow::{CreateWorkflowRequest, TaskStatus, Workflow, WorkflowStatus};

use crate::state::AppState;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Create the workflow described in `file`, wait until it finishes, and print
/// its final state. Fails if the workflow does not complete.
///
/// Progress is re-read from the store whenever the workflow publishes an
/// event, and at least every `POLL_INTERVAL` in case events were missed.
pub async fn run_workflow(
    state: &AppState,
    file: &Path,
    timeout: Duration,
    json: bool,
) -> Result<()> {
    let request = load_request(file).await?;
    let created = state.registry.create(request).await?;
    let mut events = state.event_bus.subscribe_workflow(created.id);

    let spinner = (!json).then(|| {
        let spinner = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            spinner.set_style(spinner_style);
        }
        spinner.set_message(format!("Running workflow '{}'...", created.name));
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    });

    let deadline = Instant::now() + timeout;
    let finished = loop {
        let current = state.registry.get(created.id).await?;
        if current.is_terminal() {
            break current;
        }
        if let (Some(spinner), Some(task)) = (&spinner, current.current_task()) {
            spinner.set_message(format!(
                "{} {} (attempt {})",
                style(&task.name).cyan(),
                task.status,
                task.retry_count + 1
            ));
        }
        if Instant::now() >= deadline {
            if let Some(spinner) = &spinner {
                spinner.finish_and_clear();
            }
            if let Err(e) = state.registry.cancel(created.id).await {
                tracing::warn!(workflow_id = %created.id, error = %e, "failed to cancel timed-out workflow");
            }
            bail!(
                "workflow {} still {} after {}s",
                created.id,
                current.status,
                timeout.as_secs()
            );
        }
        tokio::select! {
            Some(event) = events.next() => {
                tracing::trace!(workflow_id = %created.id, event = event.kind(), "workflow progressed");
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    };

    if let Some(spinner) = &spinner {
        spinner.finish_and_clear();
    }
    print_workflow(&finished, json)?;

    if finished.status != WorkflowStatus::Completed {
        bail!("workflow finished with status {}", finished.status);
    }
    Ok(())
}

/// Parse a creation request from JSON, or YAML for `.yaml`/`.yml` files.
pub async fn load_request(file: &Path) -> Result<CreateWorkflowRequest> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    parse_request(file, &content)
}

fn parse_request(file: &Path, content: &str) -> Result<CreateWorkflowRequest> {
    let is_yaml = file
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    if is_yaml {
        serde_yaml_ng::from_str(content)
            .with_context(|| format!("Invalid workflow YAML in {}", file.display()))
    } else {
        serde_json::from_str(content)
            .with_context(|| format!("Invalid workflow JSON in {}", file.display()))
    }
}

// ---------------------------------------------------------------------------
// List / Show
// ---------------------------------------------------------------------------

pub async fn list_workflows(
    state: &AppState,
    limit: Option<u32>,
    skip: u32,
    json: bool,
) -> Result<()> {
    let workflows = state.registry.list_page(limit, skip).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflows)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!("  No workflows yet.");
        println!(
            "  Start one with: {}",
            style("mender run <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    println!();
    println!("{}", workflow_table(&workflows));
    println!();
    Ok(())
}

pub async fn show_workflow(state: &AppState, id: &str, json: bool) -> Result<()> {
    let id: Uuid = id
        .parse()
        .with_context(|| format!("'{id}' is not a workflow id"))?;
    let workflow = state.registry.get(id).await?;
    print_workflow(&workflow, json)
}

fn print_workflow(workflow: &Workflow, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(workflow)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} ({})",
        style("Workflow:").bold(),
        style(&workflow.name).cyan(),
        style(workflow.id).dim()
    );
    println!("  Status: {}", styled_status(workflow.status));
    println!("  Created: {}", workflow.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated: {}", workflow.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(err) = &workflow.error {
        println!("  Error: {}", style(err).red());
    }
    println!();
    println!("{}", task_table(workflow));
    println!();
    Ok(())
}

fn workflow_table(workflows: &[Workflow]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Status"),
            Cell::new("Progress"),
            Cell::new("Created"),
        ]);

    for wf in workflows {
        let done = wf
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        table.add_row(vec![
            Cell::new(short_id(wf.id)),
            Cell::new(&wf.name),
            workflow_status_cell(wf.status),
            Cell::new(format!("{done}/{}", wf.tasks.len())),
            Cell::new(wf.created_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }
    table
}

fn task_table(workflow: &Workflow) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Task"),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Retries"),
            Cell::new("Next"),
            Cell::new("Error"),
        ]);

    for task in &workflow.tasks {
        table.add_row(vec![
            Cell::new(task.position + 1),
            Cell::new(&task.name),
            Cell::new(task.task_type),
            task_status_cell(task.status),
            Cell::new(format!("{}/{}", task.retry_count, task.max_retries)),
            Cell::new(task.next_task.as_deref().unwrap_or("-")),
            Cell::new(task.error.as_deref().unwrap_or("")),
        ]);
    }
    table
}

fn short_id(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

fn status_color(status: WorkflowStatus) -> Color {
    match status {
        WorkflowStatus::Queued => Color::Yellow,
        WorkflowStatus::Running => Color::Blue,
        WorkflowStatus::Completed => Color::Green,
        WorkflowStatus::Failed => Color::Red,
        WorkflowStatus::Cancelled => Color::DarkYellow,
    }
}

fn workflow_status_cell(status: WorkflowStatus) -> Cell {
    Cell::new(status).fg(status_color(status))
}

fn task_status_cell(status: TaskStatus) -> Cell {
    let color = match status {
        TaskStatus::Queued => Color::Yellow,
        TaskStatus::Running => Color::Blue,
        TaskStatus::Completed => Color::Green,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Cancelled => Color::DarkYellow,
    };
    Cell::new(status).fg(color)
}

fn styled_status(status: WorkflowStatus) -> console::StyledObject<String> {
    let text = status.to_string();
    match status {
        WorkflowStatus::Completed => style(text).green(),
        WorkflowStatus::Failed => style(text).red(),
        WorkflowStatus::Running => style(text).blue(),
        WorkflowStatus::Queued | WorkflowStatus::Cancelled => style(text).yellow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const YAML: &str = r#"
name: nightly-etl
tasks:
  - name: ingest
    task_type: HTTP_REQUEST
    next_task: transform
  - name: transform
    task_type: COMPUTE
    payload:
      operation: sum
      values: [1, 2, 3]
    max_retries: 1
"#;

    #[test]
    fn parses_yaml_request() {
        let request = parse_request(&PathBuf::from("etl.yml"), YAML).unwrap();
        assert_eq!(request.name, "nightly-etl");
        assert_eq!(request.tasks.len(), 2);
        assert_eq!(request.tasks[0].next_task.as_deref(), Some("transform"));
        assert_eq!(request.tasks[1].max_retries, Some(1));
        assert_eq!(request.tasks[1].payload["operation"], "sum");
    }

    #[test]
    fn parses_json_request_and_reports_bad_input() {
        let json = r#"{"name": "one", "tasks": [{"name": "a", "task_type": "COMPUTE"}]}"#;
        let request = parse_request(&PathBuf::from("one.json"), json).unwrap();
        assert_eq!(request.tasks[0].payload, serde_json::json!({}));

        let err = parse_request(&PathBuf::from("one.json"), YAML).unwrap_err();
        assert!(err.to_string().contains("Invalid workflow JSON"));
    }

    #[tokio::test]
    async fn run_drives_file_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etl.yaml");
        tokio::fs::write(&path, YAML).await.unwrap();

        let state = AppState::for_tests();
        run_workflow(&state, &path, Duration::from_secs(5), true)
            .await
            .unwrap();

        let all = state.registry.list(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, WorkflowStatus::Completed);
        state.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn run_reports_failed_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fail.json");
        tokio::fs::write(
            &path,
            r#"{"name": "doomed", "tasks": [{"name": "a", "task_type": "COMPUTE", "max_retries": 1, "payload": {"simulate_failure": true}}]}"#,
        )
        .await
        .unwrap();

        let state = AppState::for_tests();
        let err = run_workflow(&state, &path, Duration::from_secs(5), true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("FAILED"));
        state.dispatcher.shutdown().await;
    }

    #[test]
    fn tables_render_every_task() {
        let request = parse_request(&PathBuf::from("etl.yaml"), YAML).unwrap();
        let now = chrono::Utc::now();
        let id = Uuid::now_v7();
        let workflow = Workflow {
            id,
            name: request.name.clone(),
            status: WorkflowStatus::Queued,
            error: None,
            created_at: now,
            updated_at: now,
            tasks: request
                .tasks
                .iter()
                .enumerate()
                .map(|(i, spec)| mender_types::workflow::Task {
                    id: Uuid::now_v7(),
                    workflow_id: id,
                    name: spec.name.clone(),
                    task_type: spec.task_type.parse().unwrap(),
                    payload: spec.payload.clone(),
                    status: TaskStatus::Queued,
                    retry_count: 0,
                    max_retries: spec.max_retries.unwrap_or(3),
                    next_task: spec.next_task.clone(),
                    position: i as u32,
                    error: None,
                    result: None,
                    created_at: now,
                    updated_at: now,
                })
                .collect(),
        };

        let rendered = task_table(&workflow).to_string();
        assert!(rendered.contains("ingest"));
        assert!(rendered.contains("transform"));
        assert!(workflow_table(&[workflow]).to_string().contains("0/2"));
    }
}
