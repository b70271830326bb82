//! Main router assembly and server startup.

use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::http::handlers::{execution, workflow};
use crate::state::AppState;

/// Build the application router with middleware.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(workflow::workflow_routes())
        .merge(execution::execution_routes());

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health - liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Bind and serve the REST API until the process is stopped.
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(addr = addr.as_str(), "stepchain API listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
