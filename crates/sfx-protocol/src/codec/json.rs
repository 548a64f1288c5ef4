use std::collections::HashMap;

use serde_json::{json, Value};

use crate::codec::{IngestCodec, ObservationBatch};
use crate::error::CodecError;
use crate::event::Event;

/// The default ingest wire format: a JSON object keyed by metric kind.
///
/// ```json
/// {"gauge": [{"metric": "...", "value": 1, "timestamp": 123, "dimensions": {}}],
///  "counter": [...],
///  "cumulative_counter": [...]}
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl IngestCodec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode_observations(&self, batches: &[ObservationBatch<'_>]) -> Result<Vec<u8>, CodecError> {
        let mut by_kind: HashMap<&'static str, Vec<&crate::observation::Observation>> = HashMap::new();
        for batch in batches {
            by_kind
                .entry(batch.kind.wire_name())
                .or_default()
                .extend(batch.observations.iter());
        }
        let body = Value::Object(
            by_kind
                .into_iter()
                .map(|(kind, obs)| (kind.to_string(), json!(obs)))
                .collect(),
        );
        serde_json::to_vec(&body).map_err(|e| CodecError::InvalidInput(e.to_string()))
    }

    fn encode_event(&self, event: &Event) -> Result<Vec<u8>, CodecError> {
        // Events are POSTed as a single-element JSON array, matching
        // `_send_event`.
        serde_json::to_vec(&[event]).map_err(|e| CodecError::InvalidInput(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::MetricKind;
    use crate::observation::Observation;

    #[test]
    fn groups_observations_by_kind() {
        let gauge = Observation::new("cpu.load", 1.5_f64).unwrap();
        let counter = Observation::new("requests", 42_i64).unwrap();
        let batches = [
            ObservationBatch { kind: MetricKind::Gauge, observations: std::slice::from_ref(&gauge) },
            ObservationBatch { kind: MetricKind::Counter, observations: std::slice::from_ref(&counter) },
        ];
        let body = JsonCodec.encode_observations(&batches).unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["gauge"][0]["metric"], "cpu.load");
        assert_eq!(parsed["counter"][0]["metric"], "requests");
        assert!(parsed.get("cumulative_counter").is_none());
    }

    #[test]
    fn encodes_event_as_single_element_array() {
        let event = Event::new("deploy").unwrap();
        let body = JsonCodec.encode_event(&event).unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert!(parsed.is_array());
        assert_eq!(parsed.as_array().unwrap().len(), 1);
        assert_eq!(parsed[0]["eventType"], "deploy");
    }
}
