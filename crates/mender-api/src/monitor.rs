//! Background consumers of the engine's event bus.
//!
//! The event logger writes one structured line per workflow event. The
//! metrics logger periodically summarizes the event counters and the number
//! of workflows in flight.

use std::sync::Arc;
use std::time::Duration;

use mender_core::event::{EventBus, EventCounters};
use mender_core::workflow::dispatcher::WorkflowDispatcher;
use mender_types::event::WorkflowEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Log every event published on `bus` until `shutdown` fires.
pub fn spawn_event_logger(bus: &EventBus, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(event) => log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event logger lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

fn log_event(event: &WorkflowEvent) {
    let kind = event.kind();
    match event {
        WorkflowEvent::WorkflowCreated {
            workflow_id,
            name,
            task_count,
        } => {
            tracing::info!(event = kind, workflow_id = %workflow_id, workflow = name.as_str(), task_count, "workflow event");
        }
        WorkflowEvent::TaskQueued {
            workflow_id,
            task,
            attempt,
            ..
        }
        | WorkflowEvent::TaskStarted {
            workflow_id,
            task,
            attempt,
            ..
        } => {
            tracing::info!(event = kind, workflow_id = %workflow_id, task = task.as_str(), attempt, "workflow event");
        }
        WorkflowEvent::TaskCompleted {
            workflow_id,
            task,
            attempt,
            duration_ms,
            ..
        } => {
            tracing::info!(event = kind, workflow_id = %workflow_id, task = task.as_str(), attempt, duration_ms, "workflow event");
        }
        WorkflowEvent::TaskRetry {
            workflow_id,
            task,
            retry_count,
            error,
            delay_ms,
            ..
        } => {
            tracing::warn!(event = kind, workflow_id = %workflow_id, task = task.as_str(), retry_count, error = error.as_str(), delay_ms, "workflow event");
        }
        WorkflowEvent::TaskFailed {
            workflow_id,
            task,
            retry_count,
            error,
            ..
        } => {
            tracing::error!(event = kind, workflow_id = %workflow_id, task = task.as_str(), retry_count, error = error.as_str(), "workflow event");
        }
        WorkflowEvent::WorkflowCompleted {
            workflow_id,
            duration_ms,
        } => {
            tracing::info!(event = kind, workflow_id = %workflow_id, duration_ms, "workflow event");
        }
        WorkflowEvent::WorkflowFailed { workflow_id, error } => {
            tracing::error!(event = kind, workflow_id = %workflow_id, error = error.as_str(), "workflow event");
        }
        WorkflowEvent::WorkflowCancelled { workflow_id } => {
            tracing::info!(event = kind, workflow_id = %workflow_id, "workflow event");
        }
    }
}

/// Log a counter summary every `interval` until `shutdown` fires.
pub fn spawn_metrics_logger(
    counters: Arc<EventCounters>,
    dispatcher: Arc<WorkflowDispatcher>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    tracing::info!(
                        active_workflows = dispatcher.active_count(),
                        created = counters.count("workflow.created"),
                        completed = counters.count("workflow.completed"),
                        failed = counters.count("workflow.failed"),
                        cancelled = counters.count("workflow.cancelled"),
                        task_retries = counters.count("task.retry"),
                        lagged = counters.lagged(),
                        "engine metrics"
                    );
                }
            }
        }
    })
}
