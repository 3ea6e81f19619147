use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One channel entry of the archiver catalog.
///
/// Every text field is kept as a string so the shape stays stable no matter
/// what the archiver sent: missing values become `""` and numeric series
/// ids are stringified to avoid precision loss in browsers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub backend: String,
    pub name: String,
    #[serde(rename = "seriesId")]
    pub series_id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Dimension list, empty for scalars
    #[serde(default)]
    pub shape: Vec<u64>,
    pub unit: String,
    pub description: String,
}

impl ChannelDescriptor {
    pub fn new(backend: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_series_id(mut self, series_id: impl Into<String>) -> Self {
        self.series_id = series_id.into();
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Coerce a loosely typed archiver record into the stable output shape.
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| coerce_string(value.get(key));
        let shape = value
            .get("shape")
            .and_then(Value::as_array)
            .map(|dims| dims.iter().filter_map(Value::as_u64).collect())
            .unwrap_or_default();

        Self {
            backend: text("backend"),
            name: text("name"),
            series_id: text("seriesId"),
            source: text("source"),
            kind: text("type"),
            shape,
            unit: text("unit"),
            description: text("description"),
        }
    }
}

fn coerce_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// A single sample: scalar or one waveform row
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Scalar(f64),
    Waveform(Vec<f64>),
}

impl SampleValue {
    pub fn is_waveform(&self) -> bool {
        matches!(self, SampleValue::Waveform(_))
    }
}

impl From<f64> for SampleValue {
    fn from(v: f64) -> Self {
        SampleValue::Scalar(v)
    }
}

/// One point of an archiver result. For binned data `value` is the bin
/// average and `min`/`max`/`count` describe the bin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Nanoseconds since the unix epoch
    pub timestamp: u64,
    pub value: SampleValue,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub count: Option<u64>,
    pub pulse_id: Option<u64>,
}

impl SeriesPoint {
    pub fn raw(timestamp: u64, value: impl Into<SampleValue>, pulse_id: Option<u64>) -> Self {
        Self {
            timestamp,
            value: value.into(),
            min: None,
            max: None,
            count: None,
            pulse_id,
        }
    }

    pub fn bin(timestamp: u64, avg: f64, min: f64, max: f64, count: u64) -> Self {
        Self {
            timestamp,
            value: SampleValue::Scalar(avg),
            min: Some(min),
            max: Some(max),
            count: Some(count),
            pulse_id: None,
        }
    }
}

/// Query result for one channel
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub channel: String,
    pub binned: bool,
    pub points: Vec<SeriesPoint>,
}

impl TimeSeries {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Sum of per-bin event counts (zero for raw series)
    pub fn total_count(&self) -> u64 {
        self.points.iter().filter_map(|p| p.count).sum()
    }
}
