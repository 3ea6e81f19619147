//! Dashboard storage lifecycle
//!
//! [`DashboardService`] validates and persists user dashboards, keeps their
//! last-access time current, enforces protection, and runs the eviction
//! sweep after every write. The sweep removes the least recently accessed
//! non-whitelisted dashboards once total storage crosses the trigger
//! threshold, down to the target utilization.

pub mod memory;
pub mod store;
pub mod validation;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dashboard::store::{DocumentFilter, DocumentPatch, DocumentStore, StoreError};
use crate::dashboard::validation::DashboardValidator;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("{0}")]
    Validation(String),

    #[error("Dashboard size of {size} bytes exceeds the limit of {limit} bytes")]
    Size { size: u64, limit: u64 },

    #[error("Dashboard {0} is protected")]
    Protected(String),

    #[error("Dashboard not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, DashboardError>;

/// A stored dashboard with its bookkeeping fields
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashboardDocument {
    #[serde(rename = "_id")]
    pub id: String,

    /// Opaque, schema-validated payload
    pub dashboard: Value,

    /// Serialized payload size in bytes
    pub size: u64,

    pub last_access: DateTime<Utc>,

    /// Exempt from eviction
    #[serde(default)]
    pub whitelisted: bool,

    /// Blocks update and delete
    #[serde(default)]
    pub protected: bool,
}

impl DashboardDocument {
    pub fn new(id: impl Into<String>, dashboard: Value, size: u64) -> Self {
        Self {
            id: id.into(),
            dashboard,
            size,
            last_access: Utc::now(),
            whitelisted: false,
            protected: false,
        }
    }

    /// Client view: the payload with the id injected. An `id` key already
    /// in the payload is kept.
    pub fn to_response(&self) -> Value {
        let mut body = match &self.dashboard {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("dashboard".into(), other.clone());
                map
            }
        };
        body.entry("id")
            .or_insert_with(|| Value::String(self.id.clone()));
        Value::Object(body)
    }
}

/// Capacity bounds for the eviction sweep
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StoragePolicy {
    pub capacity_bytes: u64,
    /// Fraction of capacity at which the sweep starts
    pub eviction_threshold: f64,
    /// Fraction of capacity the sweep reduces storage to
    pub target_utilization: f64,
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self {
            capacity_bytes: 1024 * 1024 * 1024,
            eviction_threshold: 0.95,
            target_utilization: 0.60,
        }
    }
}

impl StoragePolicy {
    pub fn trigger_bytes(&self) -> f64 {
        self.capacity_bytes as f64 * self.eviction_threshold
    }

    pub fn target_bytes(&self) -> f64 {
        self.capacity_bytes as f64 * self.target_utilization
    }
}

/// What one eviction sweep did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub total_before: u64,
    pub total_after: u64,
    pub evicted: Vec<String>,
}

pub struct DashboardService {
    store: Arc<dyn DocumentStore>,
    validator: DashboardValidator,
    policy: RwLock<StoragePolicy>,
}

impl DashboardService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        validator: DashboardValidator,
        policy: StoragePolicy,
    ) -> Self {
        Self {
            store,
            validator,
            policy: RwLock::new(policy),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn policy(&self) -> StoragePolicy {
        *self.policy.read()
    }

    pub fn set_policy(&self, policy: StoragePolicy) {
        *self.policy.write() = policy;
    }

    /// Validate and store a new dashboard, then sweep
    pub async fn create(&self, payload: Value) -> Result<DashboardDocument> {
        let size = self.validator.validate(&payload)?;
        let doc = DashboardDocument::new(Uuid::new_v4().to_string(), payload, size);

        self.store.insert(doc.clone()).await?;
        debug!(id = %doc.id, size, "Dashboard created");

        self.sweep_after_write().await;
        Ok(doc)
    }

    /// Fetch a dashboard and refresh its last access in the same step
    pub async fn read(&self, id: &str) -> Result<DashboardDocument> {
        self.store
            .find_and_update(id, &DocumentFilter::any(), DocumentPatch::touch(Utc::now()))
            .await?
            .ok_or_else(|| DashboardError::NotFound(id.to_string()))
    }

    /// Replace a dashboard's payload, then sweep
    pub async fn update(&self, id: &str, payload: Value) -> Result<DashboardDocument> {
        match self.store.find(id).await? {
            None => return Err(DashboardError::NotFound(id.to_string())),
            Some(doc) if doc.protected => return Err(DashboardError::Protected(id.to_string())),
            Some(_) => {}
        }

        let size = self.validator.validate(&payload)?;
        let patch = DocumentPatch {
            dashboard: Some(payload),
            size: Some(size),
            last_access: Some(Utc::now()),
            ..DocumentPatch::default()
        };

        let updated = match self
            .store
            .find_and_update(id, &DocumentFilter::unprotected(), patch)
            .await?
        {
            Some(doc) => doc,
            None => return Err(self.explain_miss(id).await),
        };
        debug!(id, size, "Dashboard updated");

        self.sweep_after_write().await;
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<DashboardDocument> {
        match self
            .store
            .find_and_delete(id, &DocumentFilter::unprotected())
            .await?
        {
            Some(doc) => {
                debug!(id, "Dashboard deleted");
                Ok(doc)
            }
            None => Err(self.explain_miss(id).await),
        }
    }

    /// Set the eviction exemption. Returns whether the dashboard exists.
    pub async fn whitelist(&self, id: &str, flag: bool) -> Result<bool> {
        let patch = DocumentPatch {
            whitelisted: Some(flag),
            ..DocumentPatch::default()
        };
        let found = self
            .store
            .find_and_update(id, &DocumentFilter::any(), patch)
            .await?;
        Ok(found.is_some())
    }

    /// Set the mutation lock. Returns whether the dashboard exists.
    ///
    /// Protection alone does not exempt a dashboard from eviction; callers
    /// that want both also whitelist it.
    pub async fn protect(&self, id: &str, flag: bool) -> Result<bool> {
        let patch = DocumentPatch {
            protected: Some(flag),
            ..DocumentPatch::default()
        };
        let found = self
            .store
            .find_and_update(id, &DocumentFilter::any(), patch)
            .await?;
        Ok(found.is_some())
    }

    /// Raw stored document without touching its access time
    pub async fn record(&self, id: &str) -> Result<DashboardDocument> {
        self.store
            .find(id)
            .await?
            .ok_or_else(|| DashboardError::NotFound(id.to_string()))
    }

    /// Evict least recently accessed, non-whitelisted dashboards when total
    /// storage reaches the trigger threshold.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let policy = self.policy();
        let total_before = self.store.total_size().await?;
        let mut total = total_before;

        if (total as f64) < policy.trigger_bytes() {
            return Ok(SweepReport {
                total_before,
                total_after: total,
                evicted: vec![],
            });
        }

        let target = policy.target_bytes();
        info!(
            total_bytes = total,
            capacity_bytes = policy.capacity_bytes,
            target_bytes = target as u64,
            "Dashboard storage over threshold, evicting"
        );

        let evictable = DocumentFilter::evictable();
        let candidates = self.store.find_sorted(&evictable).await?;
        let mut evicted = vec![];

        for candidate in candidates {
            if total as f64 <= target {
                break;
            }
            // Whitelisted or removed since the candidate list was read
            if let Some(doc) = self.store.find_and_delete(&candidate.id, &evictable).await? {
                total = total.saturating_sub(doc.size);
                evicted.push(doc.id);
            }
        }

        info!(
            evicted = evicted.len(),
            total_bytes = total,
            "Dashboard eviction finished"
        );
        Ok(SweepReport {
            total_before,
            total_after: total,
            evicted,
        })
    }

    async fn sweep_after_write(&self) {
        if let Err(e) = self.sweep().await {
            warn!("Dashboard eviction sweep failed: {}", e);
        }
    }

    /// Tell a protected dashboard apart from a missing one after a
    /// filtered mutation matched nothing
    async fn explain_miss(&self, id: &str) -> DashboardError {
        match self.store.find(id).await {
            Ok(Some(doc)) if doc.protected => DashboardError::Protected(id.to_string()),
            Ok(_) => DashboardError::NotFound(id.to_string()),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::dashboard::memory::MemoryStore;
    use crate::dashboard::validation::ValidationConfig;

    fn service_with(store: Arc<MemoryStore>, policy: StoragePolicy) -> DashboardService {
        DashboardService::new(store, DashboardValidator::without_schema(), policy)
    }

    fn payload(title: &str) -> Value {
        json!({ "dashboard": { "widgets": [{ "plotSettings": { "plotTitle": title } }] } })
    }

    async fn seed(store: &MemoryStore, id: &str, size: u64, age_secs: i64, whitelisted: bool) {
        let mut doc = DashboardDocument::new(id, json!({ "id": id }), size);
        doc.last_access = Utc::now() - Duration::seconds(age_secs);
        doc.whitelisted = whitelisted;
        store.insert(doc).await.unwrap();
    }

    fn policy(capacity: u64, threshold: f64, target: f64) -> StoragePolicy {
        StoragePolicy {
            capacity_bytes: capacity,
            eviction_threshold: threshold,
            target_utilization: target,
        }
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let service = service_with(Arc::new(MemoryStore::new()), StoragePolicy::default());
        let created = service.create(payload("a")).await.unwrap();

        let read = service.read(&created.id).await.unwrap();
        assert_eq!(read.dashboard, payload("a"));

        let response = read.to_response();
        assert_eq!(response["id"], created.id.as_str());
        assert_eq!(response["dashboard"], payload("a")["dashboard"]);
    }

    #[tokio::test]
    async fn read_refreshes_last_access() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "old", 10, 3600, false).await;
        let service = service_with(store.clone(), StoragePolicy::default());

        let before = store.find("old").await.unwrap().unwrap().last_access;
        let read = service.read("old").await.unwrap();
        assert!(read.last_access > before);
    }

    #[tokio::test]
    async fn missing_dashboard_is_not_found() {
        let service = service_with(Arc::new(MemoryStore::new()), StoragePolicy::default());
        assert!(matches!(service.read("nope").await, Err(DashboardError::NotFound(_))));
        assert!(matches!(
            service.update("nope", payload("x")).await,
            Err(DashboardError::NotFound(_))
        ));
        assert!(matches!(service.delete("nope").await, Err(DashboardError::NotFound(_))));
        assert!(!service.whitelist("nope", true).await.unwrap());
        assert!(!service.protect("nope", true).await.unwrap());
    }

    #[tokio::test]
    async fn update_replaces_payload_and_size() {
        let service = service_with(Arc::new(MemoryStore::new()), StoragePolicy::default());
        let created = service
            .create(json!({ "dashboard": { "widgets": [] }, "extra": 1 }))
            .await
            .unwrap();

        let updated = service.update(&created.id, payload("new")).await.unwrap();
        assert_eq!(updated.dashboard, payload("new"));
        assert!(updated.dashboard.get("extra").is_none());
        assert_eq!(
            updated.size,
            serde_json::to_vec(&payload("new")).unwrap().len() as u64
        );
    }

    #[tokio::test]
    async fn protection_blocks_update_and_delete_only() {
        let service = service_with(Arc::new(MemoryStore::new()), StoragePolicy::default());
        let id = service.create(payload("p")).await.unwrap().id;
        assert!(service.protect(&id, true).await.unwrap());

        assert!(matches!(
            service.update(&id, payload("changed")).await,
            Err(DashboardError::Protected(_))
        ));
        assert!(matches!(service.delete(&id).await, Err(DashboardError::Protected(_))));

        assert_eq!(service.read(&id).await.unwrap().dashboard, payload("p"));
        assert!(service.whitelist(&id, true).await.unwrap());
        assert!(service.protect(&id, false).await.unwrap());
        assert!(service.delete(&id).await.is_ok());
        assert!(matches!(service.read(&id).await, Err(DashboardError::NotFound(_))));
    }

    #[tokio::test]
    async fn protected_check_precedes_validation() {
        let store = Arc::new(MemoryStore::new());
        let validator = DashboardValidator::new(
            None,
            ValidationConfig {
                max_document_bytes: 1,
                ..ValidationConfig::default()
            },
        )
        .unwrap();
        let mut doc = DashboardDocument::new("p", json!({}), 2);
        doc.protected = true;
        store.insert(doc).await.unwrap();

        let service = DashboardService::new(store, validator, StoragePolicy::default());
        assert!(matches!(
            service.update("p", payload("too big")).await,
            Err(DashboardError::Protected(_))
        ));
    }

    #[tokio::test]
    async fn oversized_create_is_rejected_and_not_stored() {
        let store = Arc::new(MemoryStore::new());
        let validator = DashboardValidator::new(
            None,
            ValidationConfig {
                max_document_bytes: 4,
                ..ValidationConfig::default()
            },
        )
        .unwrap();
        let service = DashboardService::new(store.clone(), validator, StoragePolicy::default());

        assert!(matches!(
            service.create(payload("big")).await,
            Err(DashboardError::Size { .. })
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn sweep_evicts_oldest_until_target() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "a", 100, 100, false).await;
        seed(&store, "b", 100, 10, false).await;
        let service = service_with(store.clone(), policy(150, 0.95, 0.7));

        let report = service.sweep().await.unwrap();
        assert_eq!(report.evicted, vec!["a"]);
        assert_eq!(report.total_after, 100);
        assert!(store.find("a").await.unwrap().is_none());
        assert!(store.find("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_skips_whitelisted_documents() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "a", 100, 100, true).await;
        seed(&store, "b", 100, 10, false).await;
        let service = service_with(store.clone(), policy(150, 0.95, 0.7));

        let report = service.sweep().await.unwrap();
        assert_eq!(report.evicted, vec!["b"]);
        assert!(store.find("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn protection_alone_does_not_exempt_from_eviction() {
        let store = Arc::new(MemoryStore::new());
        let mut doc = DashboardDocument::new("p", json!({}), 100);
        doc.protected = true;
        store.insert(doc).await.unwrap();
        let service = service_with(store.clone(), policy(1, 0.0, 0.0));

        let report = service.sweep().await.unwrap();
        assert_eq!(report.evicted, vec!["p"]);
    }

    #[tokio::test]
    async fn sweep_below_threshold_does_nothing() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "a", 100, 100, false).await;
        let service = service_with(store.clone(), policy(1000, 0.95, 0.6));

        let report = service.sweep().await.unwrap();
        assert!(report.evicted.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn written_dashboard_sorts_last_in_write_triggered_sweep() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "old", 100, 100, false).await;
        // Trigger at 50 bytes, target 100: evicting "old" alone is enough
        let service = service_with(store.clone(), policy(1000, 0.05, 0.1));

        let created = service.create(payload("fresh")).await.unwrap();
        assert!(store.find("old").await.unwrap().is_none());
        assert!(store.find(&created.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn zero_target_evicts_the_written_dashboard_too() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone(), StoragePolicy::default());
        let created = service.create(payload("a")).await.unwrap();

        service.set_policy(policy(1, 0.0, 0.0));
        let updated = service.update(&created.id, payload("b")).await.unwrap();
        assert_eq!(updated.dashboard, payload("b"));

        assert!(store.is_empty());
        assert_eq!(store.total_size().await.unwrap(), 0);
        assert!(matches!(service.read(&created.id).await, Err(DashboardError::NotFound(_))));
    }

    #[tokio::test]
    async fn shrinking_capacity_sweeps_to_target() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone(), policy(10 * 1024 * 1024, 0.95, 0.60));

        let big = json!({ "dashboard": { "blob": "x".repeat(4096) } });
        let first = service.create(big.clone()).await.unwrap();
        assert_eq!(store.len(), 1);
        seed(&store, "older", 500, 3600, false).await;

        let report = service.sweep().await.unwrap();
        assert!(report.evicted.is_empty());
        assert_eq!(store.len(), 2);

        let shrunk = policy(1, 0.95, 0.60);
        service.set_policy(shrunk);
        service.update(&first.id, big).await.unwrap();

        assert!(store.total_size().await.unwrap() as f64 <= shrunk.target_bytes());
        assert!(store.find("older").await.unwrap().is_none());
        assert!(store.find(&first.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_stops_at_whitelisted_remainder() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "kept", 500, 7200, true).await;
        seed(&store, "older", 500, 3600, false).await;
        seed(&store, "newer", 500, 60, false).await;
        let service = service_with(store.clone(), policy(1, 0.95, 0.60));

        let report = service.sweep().await.unwrap();
        assert_eq!(report.total_before, 1500);
        assert_eq!(report.evicted, vec!["older", "newer"]);
        assert_eq!(report.total_after, 500);
        assert_eq!(store.total_size().await.unwrap(), report.total_after);
        assert!(store.find("kept").await.unwrap().is_some());
    }

    #[test]
    fn payload_id_wins_over_injected_id() {
        let doc = DashboardDocument::new("generated", json!({ "id": "mine", "x": 1 }), 10);
        assert_eq!(doc.to_response()["id"], "mine");

        let plain = DashboardDocument::new("generated", json!({ "x": 1 }), 10);
        assert_eq!(plain.to_response()["id"], "generated");
    }
}
