//! Execution trigger and status handlers for the REST API.
//!
//! Triggering is fire-and-forget: the handler returns as soon as the pending
//! record exists, and the caller polls `GET /executions/{id}` until the
//! status turns terminal. Status reads never touch the engine -- they read
//! the same store the engine checkpoints into.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stepchain_core::repository::execution::ExecutionRepository;
use stepchain_core::repository::workflow::WorkflowRepository;
use stepchain_types::execution::{Execution, StepExecution};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Query parameters for listing executions.
#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    /// Maximum number of executions to return (default 20).
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

/// Execution detail with nested step records.
#[derive(Debug, Serialize)]
pub struct ExecutionDetail {
    #[serde(flatten)]
    pub execution: Execution,
    pub steps: Vec<StepExecution>,
}

/// Build the execution sub-router, mounted at `/api/v1` by the main router.
pub fn execution_routes() -> Router<AppState> {
    Router::new()
        .route("/workflows/{id}/executions", post(trigger_execution))
        .route("/workflows/{id}/executions", get(list_executions))
        .route("/executions/{execution_id}", get(get_execution))
}

/// POST /api/v1/workflows/:id/executions - Launch a run of a workflow.
///
/// Returns the pending execution record immediately; progress is observed by
/// polling.
pub async fn trigger_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Execution>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let def = state
        .workflow_repo
        .get_definition(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("workflow {id} not found")))?;

    let handle = state.executor.spawn(&def).await?;

    let execution = state
        .execution_repo
        .get_execution(&handle.execution_id)
        .await?
        .ok_or_else(|| AppError::Internal("execution record missing after spawn".to_string()))?;

    let elapsed = start.elapsed().as_millis() as u64;
    let self_link = format!("/api/v1/executions/{}", execution.id);
    let wf_link = format!("/api/v1/workflows/{id}");
    let resp = ApiResponse::success(execution, request_id, elapsed)
        .with_link("self", &self_link)
        .with_link("workflow", &wf_link);

    Ok(Json(resp))
}

/// GET /api/v1/workflows/:id/executions - Run history for a workflow.
pub async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<Json<ApiResponse<Vec<Execution>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let runs = state.execution_repo.list_executions(&id, query.limit).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let self_link = format!("/api/v1/workflows/{id}/executions");
    let resp = ApiResponse::success(runs, request_id, elapsed).with_link("self", &self_link);

    Ok(Json(resp))
}

/// GET /api/v1/executions/:execution_id - Execution detail with step records.
///
/// Reflects the latest persisted state, including partial progress of an
/// in-flight run.
pub async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<ApiResponse<ExecutionDetail>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let execution = state
        .execution_repo
        .get_execution(&execution_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("execution {execution_id} not found")))?;

    let steps = state
        .execution_repo
        .list_step_executions(&execution_id)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let self_link = format!("/api/v1/executions/{execution_id}");
    let wf_link = format!("/api/v1/workflows/{}", execution.workflow_id);
    let resp = ApiResponse::success(ExecutionDetail { execution, steps }, request_id, elapsed)
        .with_link("self", &self_link)
        .with_link("workflow", &wf_link);

    Ok(Json(resp))
}
