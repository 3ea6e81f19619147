//! Channel catalog cache
//!
//! [`CatalogStore`] holds the cached channel list, the most-recently-used
//! channels and the resync flag. [`ChannelCatalog`] decides between the
//! cache and a live archiver search, learns live results into the cache and
//! owns the resync protocol used by the background synchronizer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::ChannelDescriptor;
use crate::curve::{self, CurveRequest};
use crate::gateway::{ArchiverGateway, GatewayError};

/// Maximum length of the recent channel list
pub const RECENT_CAPACITY: usize = 10;

/// Pattern used for a full catalog listing
pub const MATCH_ALL: &str = ".*";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Channel does not exist in backend: {0}")]
    ChannelNotFound(String),

    #[error("{0}")]
    InvalidRange(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Channel name matcher. Search text is tried as a regex first; text that
/// does not compile is matched as a literal substring.
pub enum NamePattern {
    Regex(Regex),
    Literal { needle: String, case_sensitive: bool },
}

impl NamePattern {
    pub fn is_match(&self, name: &str) -> bool {
        match self {
            NamePattern::Regex(re) => re.is_match(name),
            NamePattern::Literal {
                needle,
                case_sensitive: true,
            } => name.contains(needle.as_str()),
            NamePattern::Literal { needle, .. } => name.to_lowercase().contains(needle.as_str()),
        }
    }
}

pub fn name_pattern(pattern: &str, case_sensitive: bool) -> NamePattern {
    match RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
    {
        Ok(re) => NamePattern::Regex(re),
        Err(_) => NamePattern::Literal {
            needle: if case_sensitive {
                pattern.to_string()
            } else {
                pattern.to_lowercase()
            },
            case_sensitive,
        },
    }
}

/// In-memory catalog state.
///
/// The snapshot and the recent list have independent locks and are never
/// held together. Readers copy out and release.
#[derive(Default)]
pub struct CatalogStore {
    channels: RwLock<Vec<ChannelDescriptor>>,
    recent: Mutex<Vec<ChannelDescriptor>>,
    syncing: AtomicBool,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current catalog snapshot
    pub fn snapshot(&self) -> Vec<ChannelDescriptor> {
        self.channels.read().clone()
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    /// Replace the whole snapshot
    pub fn replace(&self, channels: Vec<ChannelDescriptor>) {
        *self.channels.write() = channels;
    }

    /// Append every descriptor not already cached. Returns how many were added.
    pub fn learn(&self, found: &[ChannelDescriptor]) -> usize {
        let mut channels = self.channels.write();
        let mut added = 0;
        for channel in found {
            if !channels.contains(channel) {
                channels.push(channel.clone());
                added += 1;
            }
        }
        added
    }

    pub fn find<P>(&self, predicate: P) -> Option<ChannelDescriptor>
    where
        P: Fn(&ChannelDescriptor) -> bool,
    {
        self.channels.read().iter().find(|c| predicate(c)).cloned()
    }

    /// Recent channels, most recent first
    pub fn recent(&self) -> Vec<ChannelDescriptor> {
        self.recent.lock().clone()
    }

    /// Move `channel` to the front of the recent list
    pub fn record_access(&self, channel: ChannelDescriptor) {
        let mut recent = self.recent.lock();
        recent.retain(|c| c != &channel);
        recent.insert(0, channel);
        recent.truncate(RECENT_CAPACITY);
    }

    /// Fill an empty recent list with the tail of a fresh catalog
    pub fn seed_recent(&self, fresh: &[ChannelDescriptor]) -> bool {
        let mut recent = self.recent.lock();
        if !recent.is_empty() {
            return false;
        }
        let start = fresh.len().saturating_sub(RECENT_CAPACITY);
        *recent = fresh[start..].to_vec();
        true
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Enter the syncing state. `None` when a resync is already in flight.
    pub fn try_begin_sync(&self) -> Option<SyncGuard<'_>> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard { store: self })
    }
}

/// Returns the store to idle when dropped, whatever the resync outcome.
pub struct SyncGuard<'a> {
    store: &'a CatalogStore,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.store.syncing.store(false, Ordering::Release);
    }
}

/// Result of a resync attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResyncOutcome {
    /// Snapshot replaced with this many channels
    Replaced(usize),
    /// Another resync was already running
    Skipped,
}

/// Full catalog resync against the archiver.
///
/// At most one runs at a time; concurrent callers get [`ResyncOutcome::Skipped`].
pub async fn resync_catalog(
    store: &CatalogStore,
    gateway: &dyn ArchiverGateway,
) -> Result<ResyncOutcome, GatewayError> {
    let Some(_guard) = store.try_begin_sync() else {
        debug!("Catalog resync already running, skipping");
        return Ok(ResyncOutcome::Skipped);
    };

    let started = Instant::now();
    let fresh = gateway.search(MATCH_ALL, false).await?;
    let count = fresh.len();

    if store.seed_recent(&fresh) {
        debug!("Seeded recent channels from fresh catalog");
    }
    store.replace(fresh);

    info!(
        channels = count,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Catalog resync complete"
    );
    Ok(ResyncOutcome::Replaced(count))
}

#[derive(Clone, Debug)]
pub struct CatalogConfig {
    /// Start a background resync when a cached search finds nothing
    pub resync_on_miss: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            resync_on_miss: true,
        }
    }
}

/// Catalog service shared by request handlers and the synchronizer
pub struct ChannelCatalog {
    store: Arc<CatalogStore>,
    gateway: Arc<dyn ArchiverGateway>,
    config: CatalogConfig,
}

impl ChannelCatalog {
    pub fn new(gateway: Arc<dyn ArchiverGateway>) -> Self {
        Self::with_config(gateway, CatalogConfig::default())
    }

    pub fn with_config(gateway: Arc<dyn ArchiverGateway>, config: CatalogConfig) -> Self {
        Self {
            store: Arc::new(CatalogStore::new()),
            gateway,
            config,
        }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<dyn ArchiverGateway> {
        &self.gateway
    }

    /// Search the catalog.
    ///
    /// An empty query with caching allowed lists the whole snapshot. Cached
    /// matches win when allowed; otherwise the archiver is searched live and
    /// any new channel it reports is appended to the snapshot. `backend`
    /// narrows results to one backend.
    pub async fn search(
        &self,
        query_text: &str,
        allow_cached: bool,
        backend: Option<&str>,
    ) -> Result<Vec<ChannelDescriptor>, GatewayError> {
        let on_backend = |c: &ChannelDescriptor| backend.is_none_or(|b| c.backend == b);

        if query_text.is_empty() && allow_cached {
            let mut all = self.store.snapshot();
            all.retain(|c| on_backend(c));
            return Ok(all);
        }

        let pattern = if query_text.is_empty() {
            MATCH_ALL
        } else {
            query_text
        };

        if allow_cached {
            let matcher = name_pattern(pattern, false);
            let cached: Vec<ChannelDescriptor> = self
                .store
                .snapshot()
                .into_iter()
                .filter(|c| matcher.is_match(&c.name) && on_backend(c))
                .collect();
            if !cached.is_empty() {
                return Ok(cached);
            }

            debug!(query = pattern, "Catalog cache miss");
            if self.config.resync_on_miss {
                self.trigger_resync();
            }
        }

        let mut live = self.gateway.search(pattern, false).await?;
        let added = self.store.learn(&live);
        if added > 0 {
            debug!(added, "Learned channels from live search");
        }

        live.retain(|c| on_backend(c));
        Ok(live)
    }

    pub fn record_access(&self, channel: ChannelDescriptor) {
        self.store.record_access(channel);
    }

    pub fn recent(&self) -> Vec<ChannelDescriptor> {
        self.store.recent()
    }

    pub async fn resync(&self) -> Result<ResyncOutcome, GatewayError> {
        resync_catalog(&self.store, self.gateway.as_ref()).await
    }

    /// Start a resync in the background unless one is already running
    pub fn trigger_resync(&self) {
        if self.store.is_syncing() {
            return;
        }
        let store = Arc::clone(&self.store);
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            if let Err(e) = resync_catalog(&store, gateway.as_ref()).await {
                warn!("Search-triggered catalog resync failed: {}", e);
            }
        });
    }

    /// Fetch a client-ready curve for a channel.
    ///
    /// An all-digit channel name is a series id and is not verified against
    /// the catalog. The resolved channel is recorded as recent once data
    /// has been fetched.
    pub async fn curve(&self, request: &CurveRequest, now_ms: u64) -> Result<Value, CatalogError> {
        let name = request.channel_name.trim();
        let by_series_id = is_series_id(name);

        if !by_series_id && self.search(name, true, None).await?.is_empty() {
            return Err(CatalogError::ChannelNotFound(name.to_string()));
        }

        // Looked up after verification so live-learned channels are found
        let entry = self.store.find(|c| {
            if by_series_id {
                c.series_id == name
            } else {
                c.name == name
            }
        });

        request
            .validate_range(now_ms)
            .map_err(CatalogError::InvalidRange)?;

        let curve = curve::fetch_curve(self.gateway.as_ref(), request).await?;

        if let Some(entry) = entry {
            self.record_access(entry);
        }
        Ok(curve)
    }
}

fn is_series_id(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}
