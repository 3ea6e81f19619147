//! In-memory document store

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::dashboard::DashboardDocument;
use crate::dashboard::store::{
    DocumentFilter, DocumentPatch, DocumentStore, DocumentSummary, StoreError, StoreResult,
};

/// Document store backed by a concurrent map. Per-key operations are
/// atomic through the shard locks.
pub struct MemoryStore {
    documents: DashMap<String, DashboardDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, doc: DashboardDocument) -> StoreResult<()> {
        match self.documents.entry(doc.id.clone()) {
            Entry::Occupied(_) => Err(StoreError(format!("duplicate document id {}", doc.id))),
            Entry::Vacant(slot) => {
                slot.insert(doc);
                Ok(())
            }
        }
    }

    async fn find(&self, id: &str) -> StoreResult<Option<DashboardDocument>> {
        Ok(self.documents.get(id).map(|d| d.clone()))
    }

    async fn find_and_update(
        &self,
        id: &str,
        filter: &DocumentFilter,
        patch: DocumentPatch,
    ) -> StoreResult<Option<DashboardDocument>> {
        let Some(mut entry) = self.documents.get_mut(id) else {
            return Ok(None);
        };
        if !filter.matches(entry.value()) {
            return Ok(None);
        }
        patch.apply(entry.value_mut());
        Ok(Some(entry.value().clone()))
    }

    async fn find_and_delete(
        &self,
        id: &str,
        filter: &DocumentFilter,
    ) -> StoreResult<Option<DashboardDocument>> {
        Ok(self
            .documents
            .remove_if(id, |_, doc| filter.matches(doc))
            .map(|(_, doc)| doc))
    }

    async fn total_size(&self) -> StoreResult<u64> {
        Ok(self.documents.iter().map(|d| d.value().size).sum())
    }

    async fn find_sorted(&self, filter: &DocumentFilter) -> StoreResult<Vec<DocumentSummary>> {
        let mut found: Vec<DocumentSummary> = self
            .documents
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| DocumentSummary::from(entry.value()))
            .collect();
        found.sort_by(|a, b| a.last_access.cmp(&b.last_access).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }
}
