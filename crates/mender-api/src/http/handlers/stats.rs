//! Engine statistics endpoint.
//!
//! GET /stats - event counters collected from the bus, the number of
//! workflows currently queued or running in this process, and uptime.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde_json::{Value, json};

use crate::state::AppState;

pub async fn get_stats(State(state): State<AppState>) -> Json<Value> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0);
    Json(json!({
        "active_workflows": state.dispatcher.active_count(),
        "events": state.counters.snapshot(),
        "lagged_events": state.counters.lagged(),
        "uptime_secs": uptime_secs,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mender_types::event::WorkflowEvent;
    use uuid::Uuid;

    #[tokio::test]
    async fn stats_reflect_recorded_events() {
        let state = AppState::for_tests();
        state.counters.record(&WorkflowEvent::WorkflowCompleted {
            workflow_id: Uuid::now_v7(),
            duration_ms: 3,
        });

        let Json(body) = get_stats(State(state.clone())).await;
        assert_eq!(body["events"]["workflow.completed"], json!(1));
        assert_eq!(body["active_workflows"], json!(0));
        assert_eq!(body["lagged_events"], json!(0));
        state.dispatcher.shutdown().await;
    }
}
