//! Wire types and codecs shared by the ingest and SignalFlow clients.
//!
//! This crate has no I/O of its own: it only defines the domain types
//! (`Observation`, `Event`, `StreamMessage`, …) and the codecs that
//! translate them to and from bytes.

pub mod codec;
pub mod error;
pub mod event;
pub mod observation;
pub mod stream;
pub mod value;

pub use codec::{IngestCodec, ObservationBatch};
pub use error::CodecError;
pub use event::{Event, EventCategory};
pub use observation::{MetricKind, Observation};
pub use stream::{DataPoint, StreamMessage};
pub use value::{ObservationValue, PropertyValue, INT64_MAX, INT64_MIN};
