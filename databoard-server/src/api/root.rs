//! Root and health routes

use std::sync::Arc;

use axum::{Json, Router, routing::get};

use crate::AppState;
use crate::models::MessageResponse;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
}

async fn root() -> Json<MessageResponse> {
    Json(MessageResponse::new("Hello, World!"))
}

/// Connectivity check
async fn health() -> Json<MessageResponse> {
    Json(MessageResponse::new("Alive and Well!"))
}
