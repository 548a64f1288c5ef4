use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

use crate::codec::{IngestCodec, ObservationBatch};
use crate::error::CodecError;
use crate::event::Event;
use crate::value::{ObservationValue, INT64_MAX, INT64_MIN};

const VALUE_TAG_INT64: u8 = 0;
const VALUE_TAG_DOUBLE: u8 = 1;
const VALUE_TAG_STRING: u8 = 2;

const KIND_GAUGE: u8 = 0;
const KIND_COUNTER: u8 = 1;
const KIND_CUMULATIVE_COUNTER: u8 = 2;

fn kind_tag(kind: crate::observation::MetricKind) -> u8 {
    use crate::observation::MetricKind::*;
    match kind {
        Gauge => KIND_GAUGE,
        Counter => KIND_COUNTER,
        CumulativeCounter => KIND_CUMULATIVE_COUNTER,
    }
}

fn write_u32_framed(out: &mut Vec<u8>, body: &[u8]) -> Result<(), CodecError> {
    out.write_u32::<BigEndian>(body.len() as u32)
        .map_err(|e| CodecError::InvalidInput(e.to_string()))?;
    out.write_all(body).map_err(|e| CodecError::InvalidInput(e.to_string()))?;
    Ok(())
}

fn write_string(out: &mut Vec<u8>, s: &str) -> Result<(), CodecError> {
    out.write_u32::<BigEndian>(s.len() as u32)
        .map_err(|e| CodecError::InvalidInput(e.to_string()))?;
    out.write_all(s.as_bytes())
        .map_err(|e| CodecError::InvalidInput(e.to_string()))?;
    Ok(())
}

/// Compact length-delimited binary encoding for datapoints and events.
///
/// Each datapoint object is written as:
/// `kind_tag(u8) metric(string) value_tag(u8) value timestamp_present(u8) [timestamp i64] dim_count(u32) [key(string) value(string)]*`
/// and the whole object is then length-prefixed with a `u32` frame length,
/// per the server's length-delimited IDL (see §4.1).
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryCodec;

impl BinaryCodec {
    fn encode_observation(&self, kind: crate::observation::MetricKind, obs: &crate::observation::Observation) -> Result<Vec<u8>, CodecError> {
        let mut body = Vec::new();
        body.push(kind_tag(kind));
        write_string(&mut body, &obs.metric)?;
        match &obs.value {
            ObservationValue::Int(v) => {
                if *v < INT64_MIN || *v > INT64_MAX {
                    return Err(CodecError::InvalidInput(format!(
                        "integer value {v} is out of range for a 64-bit datapoint"
                    )));
                }
                body.push(VALUE_TAG_INT64);
                body.write_i64::<BigEndian>(*v as i64)
                    .map_err(|e| CodecError::InvalidInput(e.to_string()))?;
            }
            ObservationValue::Float(v) => {
                body.push(VALUE_TAG_DOUBLE);
                body.write_f64::<BigEndian>(*v)
                    .map_err(|e| CodecError::InvalidInput(e.to_string()))?;
            }
            ObservationValue::Str(v) => {
                body.push(VALUE_TAG_STRING);
                write_string(&mut body, v)?;
            }
        }
        match obs.timestamp {
            Some(ts) => {
                body.push(1);
                body.write_i64::<BigEndian>(ts)
                    .map_err(|e| CodecError::InvalidInput(e.to_string()))?;
            }
            None => body.push(0),
        }
        let dims = obs.dimensions.as_ref();
        let dim_count = dims.map(|d| d.len()).unwrap_or(0) as u32;
        body.write_u32::<BigEndian>(dim_count)
            .map_err(|e| CodecError::InvalidInput(e.to_string()))?;
        if let Some(dims) = dims {
            for (k, v) in dims {
                write_string(&mut body, k)?;
                write_string(&mut body, v)?;
            }
        }
        Ok(body)
    }
}

impl IngestCodec for BinaryCodec {
    fn content_type(&self) -> &'static str {
        "application/x-protobuf"
    }

    fn encode_observations(&self, batches: &[ObservationBatch<'_>]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        let total: usize = batches.iter().map(|b| b.observations.len()).sum();
        out.write_u32::<BigEndian>(total as u32)
            .map_err(|e| CodecError::InvalidInput(e.to_string()))?;
        for batch in batches {
            for obs in batch.observations {
                let body = self.encode_observation(batch.kind, obs)?;
                write_u32_framed(&mut out, &body)?;
            }
        }
        Ok(out)
    }

    fn encode_event(&self, event: &Event) -> Result<Vec<u8>, CodecError> {
        let mut body = Vec::new();
        write_string(&mut body, &event.event_type)?;
        match event.category {
            Some(cat) => {
                body.push(1);
                let name = serde_json::to_string(&cat).unwrap_or_default();
                write_string(&mut body, name.trim_matches('"'))?;
            }
            None => body.push(0),
        }
        body.write_u32::<BigEndian>(event.dimensions.len() as u32)
            .map_err(|e| CodecError::InvalidInput(e.to_string()))?;
        for (k, v) in &event.dimensions {
            write_string(&mut body, k)?;
            write_string(&mut body, v)?;
        }
        body.write_u32::<BigEndian>(event.properties.len() as u32)
            .map_err(|e| CodecError::InvalidInput(e.to_string()))?;
        for (k, v) in &event.properties {
            write_string(&mut body, k)?;
            let encoded = serde_json::to_vec(v).map_err(|e| CodecError::InvalidInput(e.to_string()))?;
            write_u32_framed(&mut body, &encoded)?;
        }
        match event.timestamp_ms {
            Some(ts) => {
                body.push(1);
                body.write_i64::<BigEndian>(ts)
                    .map_err(|e| CodecError::InvalidInput(e.to_string()))?;
            }
            None => body.push(0),
        }
        let mut out = Vec::new();
        write_u32_framed(&mut out, &body)?;
        Ok(out)
    }
}
