//! HTTP routes

pub mod channels;
pub mod dashboard;
pub mod maintenance;
pub mod root;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::AppState;
use crate::error::{Result, ServerError};

/// Build the full application router
pub fn app(state: Arc<AppState>) -> Router {
    let body_limit = state.config.body_limit();

    Router::new()
        .merge(root::router())
        .nest("/channels", channels::router())
        .merge(dashboard::router())
        .nest("/maintenance/dashboard", maintenance::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run `work` on its own task and give up waiting after `limit`.
///
/// The task is not cancelled on timeout, so a slow write still lands.
pub(crate) async fn timed<T, F>(limit: Duration, work: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(work);
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ServerError::Internal(format!("request task failed: {}", e))),
        Err(_) => Err(ServerError::Timeout),
    }
}
