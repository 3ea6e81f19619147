//! HTTP gateway to the daqbuf data API
//!
//! ureq is blocking, so every call runs on the blocking thread pool.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use databoard::core::{ChannelDescriptor, SampleValue, SeriesPoint, TimeSeries};
use databoard::gateway::{ArchiverGateway, CurveQuery, GatewayError};
use serde_json::Value;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct DaqbufGateway {
    base_url: String,
    agent: ureq::Agent,
}

impl DaqbufGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent,
        }
    }

    async fn get_json(
        &self,
        path: &str,
        params: Vec<(&'static str, String)>,
    ) -> Result<Value, GatewayError> {
        let agent = self.agent.clone();
        let url = format!("{}/{}", self.base_url, path);

        tokio::task::spawn_blocking(move || {
            debug!(url = %url, "Archiver request");
            let mut request = agent.get(&url).header("Accept", "application/json");
            for (key, value) in &params {
                request = request.query(*key, value);
            }
            let response = request.call().map_err(|e| match e {
                ureq::Error::StatusCode(code) => GatewayError::Status(code),
                other => GatewayError::Unreachable(other.to_string()),
            })?;
            response
                .into_body()
                .read_json::<Value>()
                .map_err(|e| GatewayError::Malformed(e.to_string()))
        })
        .await
        .map_err(|e| GatewayError::Unreachable(format!("archiver request task failed: {}", e)))?
    }
}

#[async_trait]
impl ArchiverGateway for DaqbufGateway {
    async fn search(
        &self,
        pattern: &str,
        case_sensitive: bool,
    ) -> Result<Vec<ChannelDescriptor>, GatewayError> {
        let mut params = vec![("nameRegex", pattern.to_string())];
        if !case_sensitive {
            params.push(("icase", "true".to_string()));
        }
        let body = self.get_json("search/channel", params).await?;
        parse_channels(&body)
    }

    async fn query(&self, query: &CurveQuery) -> Result<TimeSeries, GatewayError> {
        let mut params = vec![
            ("backend", query.backend.clone()),
            ("channelName", query.channel.clone()),
            ("begDate", iso_millis(query.begin_ms)?),
            ("endDate", iso_millis(query.end_ms)?),
        ];

        match query.bins {
            Some(bins) => {
                params.push(("binCount", bins.to_string()));
                let body = self.get_json("binned", params).await?;
                parse_binned(&query.channel, &body)
            }
            None => {
                params.push(("allowLargeResult", "true".to_string()));
                let body = self.get_json("events", params).await?;
                parse_events(&query.channel, &body)
            }
        }
    }
}

/// Browser link to the raw events of a channel
pub fn raw_data_link(
    base_url: &str,
    channel: &str,
    begin_ms: u64,
    end_ms: u64,
    backend: &str,
) -> Result<String, GatewayError> {
    Ok(format!(
        "{}/events?backend={}&channelName={}&begDate={}&endDate={}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(backend),
        urlencoding::encode(channel),
        urlencoding::encode(&link_date(begin_ms)?),
        urlencoding::encode(&link_date(end_ms)?),
    ))
}

fn utc_millis(ms: u64) -> Result<DateTime<Utc>, GatewayError> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .ok_or_else(|| GatewayError::Malformed(format!("timestamp out of range: {}", ms)))
}

fn link_date(ms: u64) -> Result<String, GatewayError> {
    Ok(utc_millis(ms)?.format("%Y-%m-%d %H:%M:%S%.3f+00:00").to_string())
}

fn iso_millis(ms: u64) -> Result<String, GatewayError> {
    Ok(utc_millis(ms)?.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn parse_channels(body: &Value) -> Result<Vec<ChannelDescriptor>, GatewayError> {
    let channels = body
        .get("channels")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::Malformed("search response has no channel list".into()))?;
    Ok(channels.iter().map(ChannelDescriptor::from_value).collect())
}

fn u64_list(body: &Value, key: &str) -> Vec<u64> {
    body.get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().map(|v| v.as_u64().unwrap_or(0)).collect())
        .unwrap_or_default()
}

fn f64_list(body: &Value, key: &str) -> Vec<f64> {
    body.get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect())
        .unwrap_or_default()
}

/// Nanosecond timestamps from an anchor in seconds plus ms/ns offsets
fn timestamps(body: &Value, ms_key: &str, ns_key: &str) -> Result<Vec<u64>, GatewayError> {
    let anchor = body.get("tsAnchor").and_then(Value::as_u64).unwrap_or(0);
    let ms = u64_list(body, ms_key);
    let ns = u64_list(body, ns_key);
    ms.iter()
        .enumerate()
        .map(|(i, ms)| {
            anchor
                .checked_mul(1_000_000_000)
                .and_then(|t| ms.checked_mul(1_000_000).and_then(|m| t.checked_add(m)))
                .and_then(|t| t.checked_add(ns.get(i).copied().unwrap_or(0)))
                .ok_or_else(|| {
                    GatewayError::Malformed(format!(
                        "timestamp overflow: anchor {} offset {}ms",
                        anchor, ms
                    ))
                })
        })
        .collect()
}

/// Enum samples arrive as `{"u": index, "s": label}` and plot as their index
fn sample(value: &Value) -> Option<SampleValue> {
    match value {
        Value::Number(n) => n.as_f64().map(SampleValue::Scalar),
        Value::Bool(b) => Some(SampleValue::Scalar(if *b { 1.0 } else { 0.0 })),
        Value::Array(items) => Some(SampleValue::Waveform(
            items.iter().filter_map(Value::as_f64).collect(),
        )),
        Value::Object(map) => map.get("u").and_then(Value::as_f64).map(SampleValue::Scalar),
        _ => None,
    }
}

fn parse_events(channel: &str, body: &Value) -> Result<TimeSeries, GatewayError> {
    if !body.is_object() {
        return Err(GatewayError::Malformed("events response is not an object".into()));
    }
    let ts = timestamps(body, "tsMs", "tsNs")?;
    let values = body
        .get("values")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let pulse_anchor = body.get("pulseAnchor").and_then(Value::as_u64);
    let pulse_off = u64_list(body, "pulseOff");

    let points = ts
        .into_iter()
        .zip(values.iter())
        .enumerate()
        .filter_map(|(i, (timestamp, raw))| {
            let pulse_id = pulse_anchor.map(|a| a + pulse_off.get(i).copied().unwrap_or(0));
            sample(raw).map(|value| SeriesPoint::raw(timestamp, value, pulse_id))
        })
        .collect();

    Ok(TimeSeries {
        channel: channel.to_string(),
        binned: false,
        points,
    })
}

fn parse_binned(channel: &str, body: &Value) -> Result<TimeSeries, GatewayError> {
    if !body.is_object() {
        return Err(GatewayError::Malformed("binned response is not an object".into()));
    }
    let ts = timestamps(body, "ts1Ms", "ts1Ns")?;
    let avgs = f64_list(body, "avgs");
    let mins = f64_list(body, "mins");
    let maxs = f64_list(body, "maxs");
    let counts = u64_list(body, "counts");

    let points = ts
        .into_iter()
        .enumerate()
        .filter_map(|(i, timestamp)| {
            let avg = *avgs.get(i)?;
            Some(SeriesPoint::bin(
                timestamp,
                avg,
                mins.get(i).copied().unwrap_or(avg),
                maxs.get(i).copied().unwrap_or(avg),
                counts.get(i).copied().unwrap_or(0),
            ))
        })
        .collect();

    Ok(TimeSeries {
        channel: channel.to_string(),
        binned: true,
        points,
    })
}
