//! Startup and shutdown of long-lived services

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use databoard::sync::CatalogSynchronizer;
use serde_json::Value;
use tracing::{info, warn};

use crate::AppState;

/// Fetch the dashboard schema from an http(s) URL or read it from a file
pub async fn load_schema(source: &str) -> anyhow::Result<Value> {
    let schema = if source.starts_with("http://") || source.starts_with("https://") {
        let url = source.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Value> {
            let mut response = ureq::get(&url).call()?;
            Ok(response.body_mut().read_json::<Value>()?)
        })
        .await??
    } else {
        let text = tokio::fs::read_to_string(source).await?;
        serde_json::from_str(&text)?
    };

    info!("Loaded dashboard schema from {}", source);
    Ok(schema)
}

/// Schema for dashboard validation, when one is configured
pub async fn dashboard_schema(source: Option<&str>) -> anyhow::Result<Option<Value>> {
    match source {
        Some(source) => load_schema(source)
            .await
            .with_context(|| format!("loading dashboard schema from {}", source))
            .map(Some),
        None => {
            warn!("No dashboard schema configured, only size checks apply");
            Ok(None)
        }
    }
}

/// Start the periodic catalog resync
pub fn start_synchronizer(state: &Arc<AppState>) -> CatalogSynchronizer {
    CatalogSynchronizer::spawn(Arc::clone(&state.catalog), state.config.sync())
}

/// Stop background work, waiting at most `grace`
pub async fn shutdown(synchronizer: CatalogSynchronizer, grace: Duration) {
    info!("Stopping background tasks");
    match synchronizer.shutdown(grace).await {
        Some(cycles) => info!(cycles, "Catalog synchronizer stopped cleanly"),
        None => warn!("Catalog synchronizer was aborted"),
    }
}
