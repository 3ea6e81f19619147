//! Channel search, recent list and curve data

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use chrono::Utc;
use databoard::curve::CurveRequest;
use serde_json::Value;
use tracing::debug;

use crate::AppState;
use crate::api::timed;
use crate::daqbuf::raw_data_link;
use crate::error::{Result, ServerError};
use crate::models::{
    ChannelsResponse, CurveQueryParams, RawLinkQuery, RawLinkResponse, SearchQuery,
};

const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);
const RECENT_TIMEOUT: Duration = Duration::from_secs(10);
const CURVE_TIMEOUT: Duration = Duration::from_secs(30);

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/search", get(search_channels))
        .route("/recent", get(recent_channels))
        .route("/curve", get(curve_data))
        .route("/raw-link", get(raw_link))
}

/// GET /channels/search
///
/// Long search text always goes to the archiver; the catalog cache only
/// answers short queries.
async fn search_channels(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ChannelsResponse>> {
    timed(SEARCH_TIMEOUT, async move {
        let text = query.search_text.trim();
        let allow_cached = query.allow_cached_response
            && text.chars().count() <= state.config.cached_query_max_len;

        let channels = state
            .catalog
            .search(text, allow_cached, query.backend.as_deref())
            .await
            .map_err(|e| ServerError::Upstream {
                public: "Error searching channels in backend",
                detail: e.to_string(),
            })?;
        debug!(query = text, allow_cached, found = channels.len(), "Channel search");

        Ok(Json(ChannelsResponse { channels }))
    })
    .await
}

/// GET /channels/recent
async fn recent_channels(State(state): State<Arc<AppState>>) -> Result<Json<ChannelsResponse>> {
    timed(RECENT_TIMEOUT, async move {
        Ok(Json(ChannelsResponse {
            channels: state.catalog.recent(),
        }))
    })
    .await
}

/// GET /channels/curve
async fn curve_data(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CurveQueryParams>,
) -> Result<Json<Value>> {
    timed(CURVE_TIMEOUT, async move {
        let request = CurveRequest::from(params);
        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        let curve = state.catalog.curve(&request, now_ms).await?;
        Ok(Json(curve))
    })
    .await
}

/// GET /channels/raw-link
async fn raw_link(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RawLinkQuery>,
) -> Result<Json<RawLinkResponse>> {
    let link = raw_data_link(
        &state.config.archiver_url,
        query.channel_name.trim(),
        query.begin_time,
        query.end_time,
        &query.backend,
    )
    .map_err(|e| ServerError::BadRequest(e.to_string()))?;

    Ok(Json(RawLinkResponse { link }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use databoard::core::{SeriesPoint, TimeSeries};
    use serde_json::json;

    use crate::api::testing::{channel, test_app};

    const BEGIN: u64 = 1_700_000_000_000;
    const END: u64 = 1_700_000_060_000;

    #[tokio::test]
    async fn empty_search_lists_cached_catalog() {
        let app = test_app(vec![channel("S10:CH1"), channel("S20:CH2")]);
        app.state.catalog.resync().await.unwrap();

        let (status, body) = app.get("/channels/search").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["channels"].as_array().unwrap().len(), 2);
        assert_eq!(app.gateway.search_calls(), 1);
    }

    #[tokio::test]
    async fn short_query_is_served_from_cache() {
        let app = test_app(vec![channel("S10:CH1"), channel("S20:CH2")]);
        app.state.catalog.resync().await.unwrap();

        let (status, body) = app.get("/channels/search?search_text=s10").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["channels"][0]["name"], "S10:CH1");
        assert_eq!(app.gateway.search_calls(), 1);
    }

    #[tokio::test]
    async fn long_query_goes_to_archiver() {
        let app = test_app(vec![channel("S10:CH1")]);
        app.state.catalog.resync().await.unwrap();

        let (_, body) = app.get("/channels/search?search_text=%20S10:CH1%20").await;
        assert_eq!(body["channels"].as_array().unwrap().len(), 1);
        assert_eq!(app.gateway.search_calls(), 2);
    }

    #[tokio::test]
    async fn search_without_match_is_empty_list() {
        let app = test_app(vec![channel("S10:CH1")]);
        let (status, body) = app
            .get("/channels/search?search_text=nothing-here&allow_cached_response=false")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "channels": [] }));
    }

    #[tokio::test]
    async fn archiver_failure_on_search_is_opaque_500() {
        let app = test_app(vec![]);
        app.gateway.set_failing(true);
        let (status, body) = app.get("/channels/search?search_text=abcdefg").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Error searching channels in backend");
    }

    #[tokio::test]
    async fn curve_records_recent_channel() {
        let app = test_app(vec![channel("S10:CH1")]);
        app.state.catalog.resync().await.unwrap();
        app.gateway.insert_series(TimeSeries {
            channel: "S10:CH1".into(),
            binned: false,
            points: vec![SeriesPoint::raw(1_700_000_000_000_000_000, 1.5, Some(7))],
        });

        let uri = format!("/channels/curve?channel_name=S10:CH1&begin_time={BEGIN}&end_time={END}");
        let (status, body) = app.get(&uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["curve"]["S10:CH1"]["1700000000000000000"], 1.5);

        let (_, recent) = app.get("/channels/recent").await;
        assert_eq!(recent["channels"][0]["name"], "S10:CH1");
    }

    #[tokio::test]
    async fn curve_for_unknown_channel_is_404() {
        let app = test_app(vec![channel("S10:CH1")]);
        let uri = format!("/channels/curve?channel_name=MISSING:CH&begin_time={BEGIN}&end_time={END}");
        let (status, body) = app.get(&uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Channel does not exist in backend");
    }

    #[tokio::test]
    async fn curve_with_inverted_range_is_400() {
        let app = test_app(vec![channel("S10:CH1")]);
        let uri = format!("/channels/curve?channel_name=S10:CH1&begin_time={END}&end_time={BEGIN}");
        let (status, _) = app.get(&uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn raw_link_points_at_archiver_events() {
        let app = test_app(vec![]);
        let (status, body) = app
            .get("/channels/raw-link?channel_name=S10:CH1&begin_time=0&end_time=1000")
            .await;
        assert_eq!(status, StatusCode::OK);
        let link = body["link"].as_str().unwrap();
        assert!(link.starts_with("https://data-api.psi.ch/api/4/events?backend=sf-databuffer"));
        assert!(link.contains("channelName=S10%3ACH1"));
    }
}
