pub mod binary;

use serde_json::Value;

use crate::error::CodecError;
use crate::value::ObservationValue;

/// One timeseries identifier/value pair inside a [`StreamMessage::Data`]
/// batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub tsid: String,
    pub value: ObservationValue,
}

/// A decoded message from a SignalFlow channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    StreamStart { timestamp_ms: i64 },
    JobStart { timestamp_ms: i64, handle: String },
    JobProgress { timestamp_ms: i64, progress: i64 },
    ChannelAbort { timestamp_ms: i64, abort_info: Value },
    EndOfChannel { timestamp_ms: i64 },
    Info { logical_timestamp_ms: i64, message: Value },
    Event { tsid: String, timestamp_ms: i64, metadata: Value, properties: Value },
    Metadata { tsid: String, properties: Value },
    ExpiredTsid { tsid: String },
    Data { logical_timestamp_ms: i64, max_delay_ms: Option<i64>, data: Vec<DataPoint> },
    Error { errors: Vec<Value> },
}

fn field<'a>(payload: &'a Value, name: &str) -> Result<&'a Value, CodecError> {
    payload
        .get(name)
        .ok_or_else(|| CodecError::Decode(format!("missing field `{name}`")))
}

fn as_i64(v: &Value, name: &str) -> Result<i64, CodecError> {
    v.as_i64().ok_or_else(|| CodecError::Decode(format!("field `{name}` is not an integer")))
}

fn as_str(v: &Value, name: &str) -> Result<String, CodecError> {
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| CodecError::Decode(format!("field `{name}` is not a string")))
}

fn decode_control_message(payload: &Value) -> Result<Option<StreamMessage>, CodecError> {
    let event = as_str(field(payload, "event")?, "event")?;
    let timestamp_ms = as_i64(field(payload, "timestampMs")?, "timestampMs")?;
    match event.as_str() {
        "STREAM_START" => Ok(Some(StreamMessage::StreamStart { timestamp_ms })),
        "JOB_START" => {
            let handle = as_str(field(payload, "handle")?, "handle")?;
            Ok(Some(StreamMessage::JobStart { timestamp_ms, handle }))
        }
        "JOB_PROGRESS" => {
            let progress = as_i64(field(payload, "progress")?, "progress")?;
            Ok(Some(StreamMessage::JobProgress { timestamp_ms, progress }))
        }
        "CHANNEL_ABORT" => {
            let abort_info = field(payload, "abortInfo")?.clone();
            Ok(Some(StreamMessage::ChannelAbort { timestamp_ms, abort_info }))
        }
        "END_OF_CHANNEL" => Ok(Some(StreamMessage::EndOfChannel { timestamp_ms })),
        other => {
            tracing::warn!(event = other, "unsupported control message; ignoring");
            Ok(None)
        }
    }
}

fn decode_data_point(v: &Value) -> Result<DataPoint, CodecError> {
    let tsid = as_str(field(v, "tsId")?, "tsId")?;
    let raw = field(v, "value")?;
    let value = if let Some(i) = raw.as_i64() {
        ObservationValue::Int(i as i128)
    } else if let Some(f) = raw.as_f64() {
        ObservationValue::Float(f)
    } else {
        return Err(CodecError::Decode("data point value is neither int nor float".into()));
    };
    Ok(DataPoint { tsid, value })
}

/// Decode one SignalFlow message of the given `mtype`. Unknown types
/// return `Ok(None)` and are logged rather than rejected.
pub fn decode(mtype: &str, payload: &Value) -> Result<Option<StreamMessage>, CodecError> {
    match mtype {
        "control-message" => decode_control_message(payload),
        "message" => {
            let logical_timestamp_ms = as_i64(field(payload, "logicalTimestampMs")?, "logicalTimestampMs")?;
            let message = field(payload, "message")?.clone();
            Ok(Some(StreamMessage::Info { logical_timestamp_ms, message }))
        }
        "event" => {
            let tsid = as_str(field(payload, "tsId")?, "tsId")?;
            let timestamp_ms = as_i64(field(payload, "timestampMs")?, "timestampMs")?;
            let metadata = field(payload, "metadata")?.clone();
            let properties = field(payload, "properties")?.clone();
            Ok(Some(StreamMessage::Event { tsid, timestamp_ms, metadata, properties }))
        }
        "metadata" => {
            let tsid = as_str(field(payload, "tsId")?, "tsId")?;
            let properties = field(payload, "properties")?.clone();
            Ok(Some(StreamMessage::Metadata { tsid, properties }))
        }
        "expired-tsid" => {
            let tsid = as_str(field(payload, "tsId")?, "tsId")?;
            Ok(Some(StreamMessage::ExpiredTsid { tsid }))
        }
        "data" => {
            let logical_timestamp_ms = as_i64(field(payload, "logicalTimestampMs")?, "logicalTimestampMs")?;
            let max_delay_ms = payload.get("maxDelayMs").and_then(|v| v.as_i64());
            let data = field(payload, "data")?
                .as_array()
                .ok_or_else(|| CodecError::Decode("field `data` is not an array".into()))?
                .iter()
                .map(decode_data_point)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(StreamMessage::Data { logical_timestamp_ms, max_delay_ms, data }))
        }
        "error" => {
            let errors = field(payload, "errors")?
                .as_array()
                .ok_or_else(|| CodecError::Decode("field `errors` is not an array".into()))?
                .clone();
            Ok(Some(StreamMessage::Error { errors }))
        }
        other => {
            tracing::warn!(mtype = other, "unsupported stream message type; ignoring");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_stream_start() {
        let payload = json!({"event": "STREAM_START", "timestampMs": 1});
        let msg = decode("control-message", &payload).unwrap().unwrap();
        assert_eq!(msg, StreamMessage::StreamStart { timestamp_ms: 1 });
    }

    #[test]
    fn decodes_data_message() {
        let payload = json!({
            "logicalTimestampMs": 1234,
            "data": [{"tsId": "AAAAAAAAAAo", "value": 42}],
        });
        let msg = decode("data", &payload).unwrap().unwrap();
        assert_eq!(
            msg,
            StreamMessage::Data {
                logical_timestamp_ms: 1234,
                max_delay_ms: None,
                data: vec![DataPoint { tsid: "AAAAAAAAAAo".into(), value: ObservationValue::Int(42) }],
            }
        );
    }

    #[test]
    fn unknown_type_is_ignored() {
        let msg = decode("something-new", &json!({})).unwrap();
        assert!(msg.is_none());
    }
}
