pub mod binary;
pub mod json;

use crate::error::CodecError;
use crate::event::Event;
use crate::observation::{MetricKind, Observation};

/// A batch of observations of the same kind, ready to be handed to an
/// [`IngestCodec`].
pub struct ObservationBatch<'a> {
    pub kind: MetricKind,
    pub observations: &'a [Observation],
}

/// Encodes outgoing ingest payloads. Implemented by the JSON codec (the
/// default) and the compact binary codec.
///
/// Implementations only encode; decoding a payload back is not part of the
/// ingest protocol; it only exists in tests to assert round-trip fidelity.
pub trait IngestCodec {
    /// MIME content type to send as the `Content-Type` header.
    fn content_type(&self) -> &'static str;

    /// Encode one or more batches of observations, grouped by metric kind,
    /// into a single request body.
    fn encode_observations(&self, batches: &[ObservationBatch<'_>]) -> Result<Vec<u8>, CodecError>;

    /// Encode a single event into a request body.
    fn encode_event(&self, event: &Event) -> Result<Vec<u8>, CodecError>;
}
