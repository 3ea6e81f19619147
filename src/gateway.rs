//! Boundary to the data archiver.
//!
//! The catalog and curve paths only see [`ArchiverGateway`]; the network
//! protocol lives in the implementation (the server ships an HTTP one).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::catalog::name_pattern;
use crate::core::{ChannelDescriptor, TimeSeries};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("archiver unreachable: {0}")]
    Unreachable(String),

    #[error("archiver responded with status {0}")]
    Status(u16),

    #[error("malformed archiver response: {0}")]
    Malformed(String),
}

/// Time-range query for a single channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurveQuery {
    pub channel: String,
    pub backend: String,
    /// Range start, unix milliseconds
    pub begin_ms: u64,
    /// Range end, unix milliseconds
    pub end_ms: u64,
    /// Requested bin count, `None` for raw events
    pub bins: Option<u32>,
}

impl CurveQuery {
    /// Same range without binning
    pub fn raw(&self) -> Self {
        Self {
            bins: None,
            ..self.clone()
        }
    }
}

#[async_trait]
pub trait ArchiverGateway: Send + Sync {
    /// Search the archiver catalog for channel names matching `pattern`
    async fn search(
        &self,
        pattern: &str,
        case_sensitive: bool,
    ) -> Result<Vec<ChannelDescriptor>, GatewayError>;

    /// Fetch data for a channel over a time range
    async fn query(&self, query: &CurveQuery) -> Result<TimeSeries, GatewayError>;
}

/// In-memory archiver for tests and offline runs
#[derive(Default)]
pub struct MemoryGateway {
    channels: RwLock<Vec<ChannelDescriptor>>,
    series: RwLock<HashMap<(String, bool), TimeSeries>>,
    search_calls: AtomicUsize,
    query_calls: AtomicUsize,
    failing: AtomicBool,
    search_delay: RwLock<Option<Duration>>,
}

impl MemoryGateway {
    pub fn new(channels: Vec<ChannelDescriptor>) -> Self {
        Self {
            channels: RwLock::new(channels),
            ..Default::default()
        }
    }

    pub fn set_channels(&self, channels: Vec<ChannelDescriptor>) {
        *self.channels.write() = channels;
    }

    /// Register the series returned for `channel`, keyed by whether it is binned
    pub fn insert_series(&self, series: TimeSeries) {
        self.series
            .write()
            .insert((series.channel.clone(), series.binned), series);
    }

    /// Make every call fail with [`GatewayError::Unreachable`]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_search_delay(&self, delay: Option<Duration>) {
        *self.search_delay.write() = delay;
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Unreachable("memory gateway offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiverGateway for MemoryGateway {
    async fn search(
        &self,
        pattern: &str,
        case_sensitive: bool,
    ) -> Result<Vec<ChannelDescriptor>, GatewayError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.search_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;

        let matcher = name_pattern(pattern, case_sensitive);
        Ok(self
            .channels
            .read()
            .iter()
            .filter(|c| matcher.is_match(&c.name))
            .cloned()
            .collect())
    }

    async fn query(&self, query: &CurveQuery) -> Result<TimeSeries, GatewayError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let key = (query.channel.clone(), query.bins.is_some());
        Ok(self
            .series
            .read()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| TimeSeries {
                channel: query.channel.clone(),
                binned: query.bins.is_some(),
                points: vec![],
            }))
    }
}
