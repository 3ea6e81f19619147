//! Archiver results to client curves
//!
//! A curve document looks like
//! `{"curve": {name: {ts: v}, name_min: {..}, name_max: {..}, name_meta: {..}}}`
//! with nanosecond timestamps as object keys.

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::core::{SampleValue, SeriesPoint, TimeSeries};
use crate::gateway::{ArchiverGateway, CurveQuery, GatewayError};

pub const DEFAULT_BACKEND: &str = "sf-databuffer";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurveRequest {
    pub channel_name: String,
    /// Unix milliseconds
    pub begin_ms: u64,
    /// Unix milliseconds
    pub end_ms: u64,
    pub backend: String,
    /// 0 requests raw events
    pub num_bins: u32,
    /// Refetch raw events when there are fewer events than requested bins
    pub events_if_bin_count_too_large: bool,
    pub remove_empty_bins: bool,
}

impl CurveRequest {
    pub fn new(
        channel_name: impl Into<String>,
        begin_ms: u64,
        end_ms: u64,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            channel_name: channel_name.into(),
            begin_ms,
            end_ms,
            backend: backend.into(),
            num_bins: 0,
            events_if_bin_count_too_large: false,
            remove_empty_bins: false,
        }
    }

    pub fn with_bins(mut self, num_bins: u32) -> Self {
        self.num_bins = num_bins;
        self
    }

    pub fn query(&self) -> CurveQuery {
        CurveQuery {
            channel: self.channel_name.trim().to_string(),
            backend: self.backend.clone(),
            begin_ms: self.begin_ms,
            end_ms: self.end_ms,
            bins: (self.num_bins > 0).then_some(self.num_bins),
        }
    }

    pub fn validate_range(&self, now_ms: u64) -> Result<(), String> {
        if self.begin_ms == 0 || self.end_ms == 0 {
            return Err(
                "begin_time or end_time is invalid, must be valid unix time (milliseconds)".into(),
            );
        }
        if self.begin_ms > self.end_ms {
            return Err("begin_time is bigger than end_time, must be smaller or equal".into());
        }
        if self.end_ms > now_ms {
            return Err("end_time is in the future, cannot request data for the future".into());
        }
        Ok(())
    }
}

/// Fetch and shape a curve, falling back to raw events when binning would
/// produce more bins than there are events.
pub async fn fetch_curve(
    gateway: &dyn ArchiverGateway,
    request: &CurveRequest,
) -> Result<Value, GatewayError> {
    let query = request.query();
    let mut series = gateway.query(&query).await?;
    let mut raw = query.bins.is_none();

    if !raw && request.events_if_bin_count_too_large {
        let events = series.total_count();
        if events != 0 && events < u64::from(request.num_bins) {
            debug!(
                channel = %query.channel,
                events,
                bins = request.num_bins,
                "Fewer events than bins, refetching raw"
            );
            series = gateway.query(&query.raw()).await?;
            raw = true;
        }
    }

    Ok(transform(&series, &query.channel, request.remove_empty_bins, raw))
}

pub fn transform(series: &TimeSeries, channel: &str, remove_empty_bins: bool, raw: bool) -> Value {
    if series.is_empty() {
        return json!({ "curve": { channel: {} } });
    }

    let kept: Vec<&SeriesPoint> = series
        .points
        .iter()
        .filter(|p| raw || !remove_empty_bins || p.count != Some(0))
        .collect();

    let mut values = Map::new();
    let mut mins = Map::new();
    let mut maxs = Map::new();
    let mut point_meta = Map::new();

    for point in &kept {
        let ts = point.timestamp.to_string();
        values.insert(ts.clone(), sample_json(&point.value));
        if let Some(min) = point.min {
            mins.insert(ts.clone(), json!(min));
        }
        if let Some(max) = point.max {
            maxs.insert(ts.clone(), json!(max));
        }

        let mut meta = Map::new();
        if let Some(count) = point.count {
            meta.insert("count".into(), json!(count));
        }
        if raw {
            meta.insert("pulseId".into(), json!(point.pulse_id));
        }
        if !meta.is_empty() {
            point_meta.insert(ts, Value::Object(meta));
        }
    }

    let (interval_avg, interval_stddev) = if raw {
        (0, 0.0)
    } else {
        interval_stats(&kept)
    };

    let mut curve = Map::new();
    curve.insert(channel.to_string(), Value::Object(values));
    if !mins.is_empty() {
        curve.insert(format!("{channel}_min"), Value::Object(mins));
    }
    if !maxs.is_empty() {
        curve.insert(format!("{channel}_max"), Value::Object(maxs));
    }
    curve.insert(
        format!("{channel}_meta"),
        json!({
            "raw": raw,
            "waveform": kept.iter().any(|p| p.value.is_waveform()),
            "interval_avg": interval_avg,
            "interval_stddev": interval_stddev,
            "pointMeta": point_meta,
        }),
    );

    json!({ "curve": curve })
}

fn sample_json(value: &SampleValue) -> Value {
    match value {
        SampleValue::Scalar(v) => json!(v),
        SampleValue::Waveform(row) => json!(row),
    }
}

/// Mean (rounded to whole nanoseconds) and population standard deviation
/// of the gaps between consecutive timestamps
fn interval_stats(points: &[&SeriesPoint]) -> (u64, f64) {
    let gaps: Vec<f64> = points
        .windows(2)
        .map(|w| w[1].timestamp.saturating_sub(w[0].timestamp) as f64)
        .collect();
    if gaps.is_empty() {
        return (0, 0.0);
    }

    let n = gaps.len() as f64;
    let mean = gaps.iter().sum::<f64>() / n;
    let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / n;
    (mean.round() as u64, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;

    fn binned(counts: &[u64]) -> TimeSeries {
        TimeSeries {
            channel: "ch".into(),
            binned: true,
            points: counts
                .iter()
                .enumerate()
                .map(|(i, &c)| SeriesPoint::bin(1_000 + i as u64 * 50, 2.0, 1.0, 3.0, c))
                .collect(),
        }
    }

    #[test]
    fn binned_curve_has_min_max_and_counts() {
        let curve = transform(&binned(&[5, 5, 5]), "ch", false, false);
        let c = &curve["curve"];
        assert_eq!(c["ch"]["1000"], 2.0);
        assert_eq!(c["ch_min"]["1050"], 1.0);
        assert_eq!(c["ch_max"]["1100"], 3.0);
        assert_eq!(c["ch_meta"]["raw"], false);
        assert_eq!(c["ch_meta"]["pointMeta"]["1000"]["count"], 5);
        assert_eq!(c["ch_meta"]["interval_avg"], 50);
        assert_eq!(c["ch_meta"]["interval_stddev"], 0.0);
    }

    #[test]
    fn interval_stats_match_uneven_bins() {
        let a = SeriesPoint::bin(1_747_406_011_275_000_064, 0.0, 0.0, 0.0, 1);
        let b = SeriesPoint::bin(1_747_406_011_324_999_936, 0.0, 0.0, 0.0, 1);
        let c = SeriesPoint::bin(1_747_406_011_375_000_064, 0.0, 0.0, 0.0, 1);
        let (avg, stddev) = interval_stats(&[&a, &b, &c]);
        assert_eq!(avg, 50_000_000);
        assert_eq!(stddev, 128.0);
    }

    #[test]
    fn empty_bins_are_dropped_only_when_asked() {
        let series = binned(&[3, 0, 2]);
        let kept = transform(&series, "ch", true, false);
        assert!(kept["curve"]["ch"].get("1050").is_none());

        let all = transform(&series, "ch", false, false);
        assert!(all["curve"]["ch"].get("1050").is_some());
    }

    #[test]
    fn raw_curve_carries_pulse_ids() {
        let series = TimeSeries {
            channel: "ch".into(),
            binned: false,
            points: vec![
                SeriesPoint::raw(10, 1.0, Some(100)),
                SeriesPoint::raw(20, SampleValue::Waveform(vec![1.0, 2.0]), None),
            ],
        };
        let curve = transform(&series, "ch", true, true);
        let meta = &curve["curve"]["ch_meta"];
        assert_eq!(meta["raw"], true);
        assert_eq!(meta["waveform"], true);
        assert_eq!(meta["pointMeta"]["10"]["pulseId"], 100);
        assert_eq!(meta["pointMeta"]["20"]["pulseId"], Value::Null);
        assert!(curve["curve"].get("ch_min").is_none());
    }

    #[test]
    fn rejects_bad_ranges() {
        let now = 10_000;
        assert!(CurveRequest::new("a", 0, 5, DEFAULT_BACKEND).validate_range(now).is_err());
        assert!(CurveRequest::new("a", 6, 5, DEFAULT_BACKEND).validate_range(now).is_err());
        assert!(CurveRequest::new("a", 1, now + 1, DEFAULT_BACKEND).validate_range(now).is_err());
        assert!(CurveRequest::new("a", 5, 5, DEFAULT_BACKEND).validate_range(now).is_ok());
    }

    #[tokio::test]
    async fn falls_back_to_raw_when_events_are_sparse() {
        let gateway = MemoryGateway::default();
        gateway.insert_series(binned(&[1, 1, 0]));
        gateway.insert_series(TimeSeries {
            channel: "ch".into(),
            binned: false,
            points: vec![SeriesPoint::raw(7, 4.0, Some(1)), SeriesPoint::raw(9, 5.0, Some(2))],
        });

        let mut request = CurveRequest::new("ch", 1, 2, DEFAULT_BACKEND).with_bins(100);
        request.events_if_bin_count_too_large = true;

        let curve = fetch_curve(&gateway, &request).await.unwrap();
        assert_eq!(gateway.query_calls(), 2);
        assert_eq!(curve["curve"]["ch_meta"]["raw"], true);
        assert_eq!(curve["curve"]["ch"]["9"], 5.0);
    }

    #[tokio::test]
    async fn keeps_bins_when_events_outnumber_bins() {
        let gateway = MemoryGateway::default();
        gateway.insert_series(binned(&[5, 5, 5]));

        let mut request = CurveRequest::new("ch", 1, 2, DEFAULT_BACKEND).with_bins(3);
        request.events_if_bin_count_too_large = true;

        let curve = fetch_curve(&gateway, &request).await.unwrap();
        assert_eq!(gateway.query_calls(), 1);
        assert_eq!(curve["curve"]["ch_meta"]["raw"], false);
    }
}
