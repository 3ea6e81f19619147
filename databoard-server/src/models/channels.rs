//! Channel search and curve query parameters

use databoard::core::ChannelDescriptor;
use databoard::curve::{CurveRequest, DEFAULT_BACKEND};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

/// Query of `GET /channels/search`
#[derive(Clone, Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub search_text: String,

    #[serde(default = "default_true")]
    pub allow_cached_response: bool,

    /// Only return channels of this backend
    pub backend: Option<String>,
}

/// Query of `GET /channels/curve`
#[derive(Clone, Debug, Deserialize)]
pub struct CurveQueryParams {
    pub channel_name: String,

    /// Unix milliseconds
    pub begin_time: u64,

    /// Unix milliseconds
    pub end_time: u64,

    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub num_bins: u32,

    #[serde(default, rename = "useEventsIfBinCountTooLarge")]
    pub use_events_if_bin_count_too_large: bool,

    #[serde(default, rename = "removeEmptyBins")]
    pub remove_empty_bins: bool,
}

impl From<CurveQueryParams> for CurveRequest {
    fn from(params: CurveQueryParams) -> Self {
        CurveRequest {
            channel_name: params.channel_name,
            begin_ms: params.begin_time,
            end_ms: params.end_time,
            backend: params.backend,
            num_bins: params.num_bins,
            events_if_bin_count_too_large: params.use_events_if_bin_count_too_large,
            remove_empty_bins: params.remove_empty_bins,
        }
    }
}

/// Query of `GET /channels/raw-link`
#[derive(Clone, Debug, Deserialize)]
pub struct RawLinkQuery {
    pub channel_name: String,
    pub begin_time: u64,
    pub end_time: u64,
    #[serde(default = "default_backend")]
    pub backend: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelsResponse {
    pub channels: Vec<ChannelDescriptor>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawLinkResponse {
    pub link: String,
}
