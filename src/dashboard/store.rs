//! Document store boundary for dashboards

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::dashboard::DashboardDocument;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("document store error: {0}")]
pub struct StoreError(pub String);

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Conditions on the metadata flags. `None` matches either value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    pub whitelisted: Option<bool>,
    pub protected: Option<bool>,
}

impl DocumentFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn unprotected() -> Self {
        Self {
            protected: Some(false),
            ..Self::default()
        }
    }

    /// Documents the eviction sweep may remove
    pub fn evictable() -> Self {
        Self {
            whitelisted: Some(false),
            ..Self::default()
        }
    }

    pub fn matches(&self, doc: &DashboardDocument) -> bool {
        self.whitelisted.is_none_or(|w| doc.whitelisted == w)
            && self.protected.is_none_or(|p| doc.protected == p)
    }
}

/// Partial update applied atomically by [`DocumentStore::find_and_update`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentPatch {
    pub dashboard: Option<serde_json::Value>,
    pub size: Option<u64>,
    pub last_access: Option<DateTime<Utc>>,
    pub whitelisted: Option<bool>,
    pub protected: Option<bool>,
}

impl DocumentPatch {
    pub fn touch(now: DateTime<Utc>) -> Self {
        Self {
            last_access: Some(now),
            ..Self::default()
        }
    }

    pub fn apply(self, doc: &mut DashboardDocument) {
        if let Some(dashboard) = self.dashboard {
            doc.dashboard = dashboard;
        }
        if let Some(size) = self.size {
            doc.size = size;
        }
        if let Some(last_access) = self.last_access {
            doc.last_access = last_access;
        }
        if let Some(whitelisted) = self.whitelisted {
            doc.whitelisted = whitelisted;
        }
        if let Some(protected) = self.protected {
            doc.protected = protected;
        }
    }
}

/// Projection used by the eviction sweep
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentSummary {
    pub id: String,
    pub size: u64,
    pub last_access: DateTime<Utc>,
}

impl From<&DashboardDocument> for DocumentSummary {
    fn from(doc: &DashboardDocument) -> Self {
        Self {
            id: doc.id.clone(),
            size: doc.size,
            last_access: doc.last_access,
        }
    }
}

/// Persistent keyed document store.
///
/// `find_and_update` and `find_and_delete` must be atomic per document:
/// the filter is checked and the mutation applied as one step.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, doc: DashboardDocument) -> StoreResult<()>;

    async fn find(&self, id: &str) -> StoreResult<Option<DashboardDocument>>;

    /// Apply `patch` if the document exists and matches `filter`; returns
    /// the updated document
    async fn find_and_update(
        &self,
        id: &str,
        filter: &DocumentFilter,
        patch: DocumentPatch,
    ) -> StoreResult<Option<DashboardDocument>>;

    /// Remove the document if it exists and matches `filter`
    async fn find_and_delete(
        &self,
        id: &str,
        filter: &DocumentFilter,
    ) -> StoreResult<Option<DashboardDocument>>;

    /// Sum of the stored `size` field over all documents
    async fn total_size(&self) -> StoreResult<u64>;

    /// Matching documents ordered by `last_access`, oldest first
    async fn find_sorted(&self, filter: &DocumentFilter) -> StoreResult<Vec<DocumentSummary>>;
}
