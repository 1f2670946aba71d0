//! Workflow handlers for the REST API.
//!
//! Thin adapters over [`crate::state::ConcreteRegistry`]: decode the request,
//! call the registry, and return the workflow JSON as stored.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use uuid::Uuid;

use mender_types::workflow::{CreateWorkflowRequest, Workflow};

use crate::http::error::AppError;
use crate::state::AppState;

/// Query parameters for listing workflows.
#[derive(Debug, Default, Deserialize)]
pub struct ListWorkflowsQuery {
    /// Maximum number of workflows to return. Defaults to the configured
    /// list limit and is capped at the configured maximum.
    pub limit: Option<u32>,
    /// Number of newest workflows to skip.
    #[serde(alias = "skip")]
    pub offset: Option<u32>,
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    raw.parse::<Uuid>()
        .map_err(|_| AppError::Validation(format!("invalid workflow id: '{raw}'")))
}

/// POST /workflows - Validate and create a workflow, then start it.
pub async fn create_workflow(
    State(state): State<AppState>,
    body: Result<Json<CreateWorkflowRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Workflow>), AppError> {
    let Json(request) = body.map_err(|e| AppError::Validation(e.body_text()))?;
    let workflow = state.registry.create(request).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

/// GET /workflows?limit=N&offset=M - Most recent workflows first.
pub async fn list_workflows(
    State(state): State<AppState>,
    query: Result<Query<ListWorkflowsQuery>, QueryRejection>,
) -> Result<Json<Vec<Workflow>>, AppError> {
    let Query(query) = query.map_err(|e| AppError::Validation(e.body_text()))?;
    if query.limit == Some(0) {
        return Err(AppError::Validation("limit must be at least 1".to_string()));
    }
    let workflows = state
        .registry
        .list_page(query.limit, query.offset.unwrap_or(0))
        .await?;
    Ok(Json(workflows))
}

/// GET /workflows/{id} - One workflow with its task chain.
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, AppError> {
    let workflow = state.registry.get(parse_id(&id)?).await?;
    Ok(Json(workflow))
}

/// POST /workflows/{id}/cancel - Stop a workflow that has not finished.
///
/// Responds 202 with the current snapshot; a workflow being driven reaches
/// CANCELLED shortly after.
pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Workflow>), AppError> {
    let workflow = state.registry.cancel(parse_id(&id)?).await?;
    Ok((StatusCode::ACCEPTED, Json(workflow)))
}
