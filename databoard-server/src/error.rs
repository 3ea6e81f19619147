//! Error types for the server

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use databoard::catalog::CatalogError;
use databoard::dashboard::DashboardError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Request timed out")]
    Timeout,

    /// Archiver failure; `public` is what the client sees
    #[error("{public}: {detail}")]
    Upstream { public: &'static str, detail: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ServerError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            ServerError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg.clone()),
            ServerError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ServerError::Timeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            ServerError::Upstream { public, .. } => {
                error!("{}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, public.to_string())
            }
            ServerError::Database(_) | ServerError::Internal(_) => {
                error!("{}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

impl From<DashboardError> for ServerError {
    fn from(e: DashboardError) -> Self {
        match e {
            DashboardError::Validation(msg) => ServerError::Validation(msg),
            DashboardError::Size { .. } => ServerError::PayloadTooLarge(e.to_string()),
            DashboardError::Protected(_) => ServerError::Forbidden(e.to_string()),
            DashboardError::NotFound(_) => ServerError::NotFound("Dashboard not found".into()),
            DashboardError::Store(inner) => ServerError::Database(inner.to_string()),
        }
    }
}

impl From<CatalogError> for ServerError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::ChannelNotFound(_) => {
                ServerError::NotFound("Channel does not exist in backend".into())
            }
            CatalogError::InvalidRange(msg) => ServerError::BadRequest(msg),
            CatalogError::Gateway(inner) => ServerError::Upstream {
                public: "Error fetching data from backend",
                detail: inner.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
