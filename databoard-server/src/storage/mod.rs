//! Dashboard storage backends

pub mod sqlite;

use std::sync::Arc;

use databoard::dashboard::memory::MemoryStore;
use databoard::dashboard::store::DocumentStore;
use tracing::{info, warn};

use crate::storage::sqlite::SqliteStore;

/// Store name selecting the non-persistent backend
pub const MEMORY_STORE: &str = "memory";

/// Open the configured backend and bring its schema up to date
pub async fn open(location: &str) -> anyhow::Result<Arc<dyn DocumentStore>> {
    if location == MEMORY_STORE {
        warn!("Using in-memory dashboard store, dashboards are lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = SqliteStore::new(location).await?;
    store.run_migrations().await?;
    info!("Dashboard store opened at {}", location);
    Ok(Arc::new(store))
}
