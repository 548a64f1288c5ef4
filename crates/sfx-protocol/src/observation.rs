use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::value::ObservationValue;

/// The three metric kinds the ingest API accepts. Wire names (the JSON
/// codec's top-level keys, and the binary codec's kind tag) are
/// `gauge` / `counter` / `cumulative_counter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Gauge,
    Counter,
    CumulativeCounter,
}

impl MetricKind {
    pub fn wire_name(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::CumulativeCounter => "cumulative_counter",
        }
    }
}

/// A single time-series observation.
///
/// Invariant: `metric` is non-empty, and every dimension key is non-empty.
/// Both are checked by [`Observation::new`]; there is no way to build an
/// invalid `Observation` outside this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub metric: String,
    pub value: ObservationValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<HashMap<String, String>>,
}

impl Observation {
    pub fn new(metric: impl Into<String>, value: impl Into<ObservationValue>) -> Result<Self, CodecError> {
        let metric = metric.into();
        if metric.is_empty() {
            return Err(CodecError::InvalidInput("metric name must not be empty".into()));
        }
        Ok(Observation {
            metric,
            value: value.into(),
            timestamp: None,
            dimensions: None,
        })
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }

    pub fn with_dimensions(mut self, dimensions: HashMap<String, String>) -> Result<Self, CodecError> {
        if let Some(empty_key) = dimensions.keys().find(|k| k.is_empty()) {
            let _ = empty_key;
            return Err(CodecError::InvalidInput("dimension keys must not be empty".into()));
        }
        self.dimensions = Some(dimensions);
        Ok(self)
    }
}
