//! Dashboard REST API handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::Value;
use tracing::info;

use crate::AppState;
use crate::api::timed;
use crate::error::Result;

const CRUD_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the dashboard API router. Creation accepts a trailing slash.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dashboard", post(create_dashboard))
        .route("/dashboard/", post(create_dashboard))
        .route(
            "/dashboard/{id}",
            get(get_dashboard)
                .patch(update_dashboard)
                .delete(delete_dashboard),
        )
}

/// POST /dashboard - Create a new dashboard
async fn create_dashboard(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse> {
    timed(CRUD_TIMEOUT, async move {
        let created = state.dashboards.create(payload).await?;
        info!(id = %created.id, size = created.size, "Dashboard stored");
        Ok((StatusCode::CREATED, Json(created.to_response())))
    })
    .await
}

/// GET /dashboard/{id}
async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    timed(CRUD_TIMEOUT, async move {
        let doc = state.dashboards.read(&id).await?;
        Ok(Json(doc.to_response()))
    })
    .await
}

/// PATCH /dashboard/{id} - Replace the payload
async fn update_dashboard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    timed(CRUD_TIMEOUT, async move {
        let doc = state.dashboards.update(&id, payload).await?;
        Ok(Json(doc.to_response()))
    })
    .await
}

/// DELETE /dashboard/{id}
async fn delete_dashboard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    timed(CRUD_TIMEOUT, async move {
        let doc = state.dashboards.delete(&id).await?;
        info!(id = %doc.id, "Dashboard deleted");
        Ok(Json(doc.to_response()))
    })
    .await
}
