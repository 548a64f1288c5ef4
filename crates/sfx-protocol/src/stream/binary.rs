use std::io::Read;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::GzDecoder;
use serde_json::Value;

use crate::error::CodecError;
use crate::stream::DataPoint;
use crate::value::ObservationValue;

const HEADER_LEN: usize = 20;
const FLAG_COMPRESSED: u8 = 0b01;
const FLAG_JSON: u8 = 0b10;

const MESSAGE_TYPE_DATA: u8 = 5;

const VALUE_ABSENT: u8 = 0;
const VALUE_INT64: u8 = 1;
const VALUE_DOUBLE: u8 = 2;

/// The decoded form of one framed binary SignalFlow message: either a JSON
/// envelope (caller dispatches it through [`crate::stream::decode`]) or a
/// decoded data batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BinaryFrame {
    Json { channel: String, payload: Value },
    Data { channel: String, logical_timestamp_ms: i64, max_delay_ms: Option<i64>, data: Vec<DataPoint> },
}

fn read_channel_id(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn decode_data_point(buf: &[u8; 17]) -> Result<Option<DataPoint>, CodecError> {
    let value_type = buf[0];
    let tsid = URL_SAFE_NO_PAD.encode(&buf[1..9]);
    let mut value_bytes = &buf[9..17];
    let value = match value_type {
        VALUE_ABSENT => return Ok(None),
        VALUE_INT64 => ObservationValue::Int(
            value_bytes.read_i64::<BigEndian>().map_err(|e| CodecError::Decode(e.to_string()))? as i128,
        ),
        VALUE_DOUBLE => ObservationValue::Float(
            value_bytes.read_f64::<BigEndian>().map_err(|e| CodecError::Decode(e.to_string()))?,
        ),
        other => return Err(CodecError::Decode(format!("unknown datapoint value type {other}"))),
    };
    Ok(Some(DataPoint { tsid, value }))
}

/// Decode one framed binary SignalFlow message, following the version- and
/// flags-tolerant layout:
///
/// `{version u8, message_type u8, flags u8, reserved u8, channel_id char[16]}`
/// followed by a (possibly gzip-compressed) body.
pub fn decode_frame(frame: &[u8]) -> Result<Option<BinaryFrame>, CodecError> {
    if frame.len() < HEADER_LEN {
        return Err(CodecError::Decode("frame shorter than the 20-byte header".into()));
    }
    let version = frame[0];
    let message_type = frame[1];
    let flags = frame[2];
    // frame[3] is a reserved padding byte.
    let channel = read_channel_id(&frame[4..20]);
    let mut body = &frame[HEADER_LEN..];

    let decompressed;
    if flags & FLAG_COMPRESSED != 0 {
        let mut decoder = GzDecoder::new(body);
        let mut buf = Vec::new();
        decoder
            .read_to_end(&mut buf)
            .map_err(|e| CodecError::Decode(format!("gzip decompression failed: {e}")))?;
        decompressed = buf;
        body = &decompressed[..];
    }

    if flags & FLAG_JSON != 0 {
        let payload: Value = serde_json::from_slice(body).map_err(|e| CodecError::Decode(e.to_string()))?;
        return Ok(Some(BinaryFrame::Json { channel, payload }));
    }

    if message_type != MESSAGE_TYPE_DATA {
        tracing::warn!(message_type, version, "unsupported binary message type; dropping");
        return Ok(None);
    }

    let mut cur = body;
    let logical_timestamp_ms = cur.read_i64::<BigEndian>().map_err(|e| CodecError::Decode(e.to_string()))?;
    let max_delay_ms = match version {
        1 => None,
        2 | 3 => Some(cur.read_i64::<BigEndian>().map_err(|e| CodecError::Decode(e.to_string()))?),
        other => {
            tracing::warn!(version = other, "unsupported binary data batch version; dropping");
            return Ok(None);
        }
    };
    let count = cur.read_i32::<BigEndian>().map_err(|e| CodecError::Decode(e.to_string()))?;
    let mut data = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        let mut chunk = [0u8; 17];
        cur.read_exact(&mut chunk).map_err(|e| CodecError::Decode(e.to_string()))?;
        if let Some(point) = decode_data_point(&chunk)? {
            data.push(point);
        }
    }
    Ok(Some(BinaryFrame::Data { channel, logical_timestamp_ms, max_delay_ms, data }))
}
