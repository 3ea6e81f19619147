//! Maintenance routes: raw records and eviction/protection flags

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use databoard::dashboard::DashboardDocument;
use tracing::info;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::models::MessageResponse;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{id}", get(full_record))
        .route("/{id}/whitelist", post(whitelist).delete(unwhitelist))
        .route("/{id}/protect", post(protect).delete(unprotect))
}

fn not_found() -> ServerError {
    ServerError::NotFound("Dashboard not found".into())
}

/// GET /maintenance/dashboard/{id} - Stored document, access time untouched
async fn full_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DashboardDocument>> {
    Ok(Json(state.dashboards.record(&id).await?))
}

async fn whitelist(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    if !state.dashboards.whitelist(&id, true).await? {
        return Err(not_found());
    }
    info!(id, "Dashboard whitelisted");
    Ok(Json(MessageResponse::new(format!("Dashboard {id} whitelisted"))))
}

async fn unwhitelist(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    if !state.dashboards.whitelist(&id, false).await? {
        return Err(not_found());
    }
    info!(id, "Dashboard unwhitelisted");
    Ok(Json(MessageResponse::new(format!("Dashboard {id} unwhitelisted"))))
}

/// Protecting also whitelists, so a locked dashboard is never evicted
async fn protect(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    if !state.dashboards.protect(&id, true).await? {
        return Err(not_found());
    }
    state.dashboards.whitelist(&id, true).await?;
    info!(id, "Dashboard protected");
    Ok(Json(MessageResponse::new(format!(
        "Dashboard {id} protected and whitelisted"
    ))))
}

/// Unprotecting leaves the whitelist flag as it is
async fn unprotect(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    if !state.dashboards.protect(&id, false).await? {
        return Err(not_found());
    }
    info!(id, "Dashboard unprotected");
    Ok(Json(MessageResponse::new(format!(
        "Dashboard {id} unprotected, may still be whitelisted"
    ))))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::api::testing::test_app;

    #[tokio::test]
    async fn full_record_exposes_bookkeeping() {
        let app = test_app(vec![]);
        let (_, created) = app.send("POST", "/dashboard", Some(json!({ "a": 1 }))).await;
        let id = created["id"].as_str().unwrap().to_string();

        let (status, record) = app.get(&format!("/maintenance/dashboard/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["_id"], id.as_str());
        assert_eq!(record["dashboard"], json!({ "a": 1 }));
        assert_eq!(record["whitelisted"], false);
        assert!(record["size"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn protect_whitelists_and_unprotect_keeps_whitelist() {
        let app = test_app(vec![]);
        let (_, created) = app.send("POST", "/dashboard", Some(json!({ "a": 1 }))).await;
        let id = created["id"].as_str().unwrap().to_string();

        let (status, ack) = app
            .send("POST", &format!("/maintenance/dashboard/{id}/protect"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["message"], format!("Dashboard {id} protected and whitelisted"));

        let (_, record) = app.get(&format!("/maintenance/dashboard/{id}")).await;
        assert_eq!(record["protected"], true);
        assert_eq!(record["whitelisted"], true);

        app.send("DELETE", &format!("/maintenance/dashboard/{id}/protect"), None)
            .await;
        let (_, record) = app.get(&format!("/maintenance/dashboard/{id}")).await;
        assert_eq!(record["protected"], false);
        assert_eq!(record["whitelisted"], true);

        let (status, ack) = app
            .send("DELETE", &format!("/maintenance/dashboard/{id}/whitelist"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["message"], format!("Dashboard {id} unwhitelisted"));
    }

    #[tokio::test]
    async fn flags_on_missing_dashboard_are_404() {
        let app = test_app(vec![]);
        for (method, path) in [
            ("POST", "/maintenance/dashboard/nope/whitelist"),
            ("DELETE", "/maintenance/dashboard/nope/whitelist"),
            ("POST", "/maintenance/dashboard/nope/protect"),
            ("DELETE", "/maintenance/dashboard/nope/protect"),
        ] {
            let (status, body) = app.send(method, path, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["error"], "Dashboard not found");
        }
        assert_eq!(
            app.get("/maintenance/dashboard/nope").await.0,
            StatusCode::NOT_FOUND
        );
    }
}
