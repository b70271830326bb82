//! Workflow CRUD handlers for the REST API.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use uuid::Uuid;

use stepchain_core::repository::workflow::WorkflowRepository;
use stepchain_types::workflow::WorkflowDefinition;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Build the workflow sub-router, mounted at `/api/v1` by the main router.
pub fn workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/workflows", post(create_workflow))
        .route("/workflows", get(list_workflows))
        .route("/workflows/{id}", get(get_workflow))
        .route("/workflows/{id}", put(update_workflow))
        .route("/workflows/{id}", delete(delete_workflow))
}

fn validate_definition(def: &WorkflowDefinition) -> Result<(), AppError> {
    if def.name.trim().is_empty() {
        return Err(AppError::Validation("workflow name is required".to_string()));
    }
    Ok(())
}

/// POST /api/v1/workflows - Create a new workflow definition.
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(body): Json<WorkflowDefinition>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    validate_definition(&body)?;
    state.workflow_repo.save_definition(&body).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let link = format!("/api/v1/workflows/{}", body.id);
    let resp = ApiResponse::success(body, request_id, elapsed).with_link("self", &link);

    Ok(Json(resp))
}

/// GET /api/v1/workflows - List all workflow definitions.
pub async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<WorkflowDefinition>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let defs = state.workflow_repo.list_definitions().await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(defs, request_id, elapsed).with_link("self", "/api/v1/workflows");

    Ok(Json(resp))
}

/// GET /api/v1/workflows/:id - Get a workflow definition by ID.
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let def = state
        .workflow_repo
        .get_definition(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("workflow {id} not found")))?;

    let elapsed = start.elapsed().as_millis() as u64;
    let self_link = format!("/api/v1/workflows/{}", def.id);
    let runs_link = format!("/api/v1/workflows/{}/executions", def.id);
    let resp = ApiResponse::success(def, request_id, elapsed)
        .with_link("self", &self_link)
        .with_link("executions", &runs_link);

    Ok(Json(resp))
}

/// PUT /api/v1/workflows/:id - Update a workflow definition.
///
/// Edits never affect in-flight or completed executions; those run against
/// their launch-time snapshot.
pub async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut body): Json<WorkflowDefinition>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    // The path is authoritative for identity
    body.id = id;
    validate_definition(&body)?;

    state
        .workflow_repo
        .get_definition(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("workflow {id} not found")))?;

    state.workflow_repo.save_definition(&body).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let link = format!("/api/v1/workflows/{}", body.id);
    let resp = ApiResponse::success(body, request_id, elapsed).with_link("self", &link);

    Ok(Json(resp))
}

/// DELETE /api/v1/workflows/:id - Delete a workflow definition.
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let deleted = state.workflow_repo.delete_definition(&id).await?;
    if !deleted {
        return Err(AppError::NotFound(format!("workflow {id} not found")));
    }

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(
        serde_json::json!({"deleted": true, "id": id.to_string()}),
        request_id,
        elapsed,
    );

    Ok(Json(resp))
}
