//! Background-batched HTTP client for the datapoint and event ingest API.
//!
//! [`IngestClient::new`] spawns a single background worker task that owns a
//! bounded queue; `send` enqueues observations without blocking (returning
//! [`IngestError::QueueFull`] under back-pressure), while `send_event` POSTs
//! synchronously.

mod client;
mod config;
mod error;
mod worker;

pub use client::IngestClient;
pub use config::{IngestConfig, DEFAULT_BATCH_SIZE, DEFAULT_INGEST_ENDPOINT, DEFAULT_QUEUE_CAPACITY, DEFAULT_TIMEOUT};
pub use error::IngestError;

pub use sfx_protocol::codec::json::JsonCodec;
pub use sfx_protocol::codec::{binary::BinaryCodec, IngestCodec};
pub use sfx_protocol::{Event, EventCategory, MetricKind, Observation, ObservationValue, PropertyValue};
