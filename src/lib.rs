//! Unified client for metrics ingest and SignalFlow streaming analytics.
//!
//! [`Client`] is built once from a [`Config`] and hands out per-token
//! subsystem clients: [`Client::ingest`] for batched datapoint/event
//! delivery, [`Client::signalflow`] for executing and attaching to
//! streaming computations.

pub use sfx_ingest::{IngestClient, IngestConfig, IngestError};
pub use sfx_protocol::codec::{json::JsonCodec, IngestCodec};
pub use sfx_protocol::{CodecError, Event, EventCategory, MetricKind, Observation, ObservationValue, PropertyValue};
pub use sfx_signalflow::{
    AttachParams, Channel, Computation, ComputationError, ComputationState, ExecuteParams, LimitedResultSet,
    SignalFlowClient, SseConfig, SseTransport, Transport, TransportError, WebSocketTransport, WsConfig,
};

use std::sync::Arc;
use std::time::Duration;

const DEFAULT_API_ENDPOINT: &str = "https://api.signalfx.com";

/// The wire codec `sfx-ingest` uses to encode observations and events.
///
/// An explicit choice rather than runtime content negotiation: pick once,
/// at construction, and every batch this client sends uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    Json,
    Binary,
}

/// Which transport [`Client::signalflow`] builds: the multiplexed WebSocket
/// connection, or the one-HTTP-POST-per-computation SSE fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamTransport {
    #[default]
    WebSocket,
    Sse,
}

/// Shared configuration for both subsystems.
///
/// `api_endpoint` is carried for parity with the original multi-endpoint
/// client shape but is not otherwise consulted by `ingest`/`signalflow`
/// today; `ingest_endpoint` and `stream_endpoint` are the ones actually
/// dialed.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_endpoint: String,
    pub ingest_endpoint: String,
    pub stream_endpoint: String,
    pub timeout: Duration,
    pub compress: bool,
    pub codec: Codec,
    pub stream_transport: StreamTransport,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            ingest_endpoint: sfx_ingest::DEFAULT_INGEST_ENDPOINT.to_string(),
            stream_endpoint: "https://stream.signalfx.com".to_string(),
            timeout: Duration::from_secs(5),
            compress: true,
            codec: Codec::default(),
            stream_transport: StreamTransport::default(),
        }
    }
}

/// Per-call overrides accepted by [`Client::ingest`], layered on top of
/// [`Config`]'s defaults.
#[derive(Debug, Clone, Default)]
pub struct IngestOverrides {
    pub batch_size: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub user_agent_extra: Vec<String>,
}

/// Entry point: holds the shared [`Config`] and builds subsystem clients
/// on demand. Cheaply `Clone`able.
#[derive(Clone)]
pub struct Client {
    config: Config,
}

impl Client {
    pub fn new(config: Config) -> Self {
        Client { config }
    }

    /// Build a batched ingest client authenticated with `token`.
    pub fn ingest(&self, token: impl Into<String>) -> IngestClient {
        self.ingest_with(token, IngestOverrides::default())
    }

    /// Same as [`Client::ingest`], with per-call overrides for batch size,
    /// queue capacity, and extra `User-Agent` tokens.
    pub fn ingest_with(&self, token: impl Into<String>, overrides: IngestOverrides) -> IngestClient {
        let mut ingest_config = IngestConfig {
            endpoint: self.config.ingest_endpoint.clone(),
            timeout: self.config.timeout,
            compress: self.config.compress,
            user_agent_extra: overrides.user_agent_extra,
            ..IngestConfig::default()
        };
        if let Some(batch_size) = overrides.batch_size {
            ingest_config.batch_size = batch_size;
        }
        if let Some(queue_capacity) = overrides.queue_capacity {
            ingest_config.queue_capacity = queue_capacity;
        }

        match self.config.codec {
            Codec::Json => IngestClient::new(token, ingest_config),
            Codec::Binary => {
                IngestClient::with_codec(token, ingest_config, Arc::new(sfx_protocol::codec::binary::BinaryCodec))
            }
        }
    }

    /// Build a SignalFlow client authenticated with `token`, using the
    /// transport selected by [`Config::stream_transport`].
    pub fn signalflow(&self, token: impl Into<String>) -> SignalFlowClient {
        let token = token.into();
        let transport: Arc<dyn Transport> = match self.config.stream_transport {
            StreamTransport::WebSocket => Arc::new(WebSocketTransport::new(
                token,
                WsConfig {
                    endpoint: self.config.stream_endpoint.clone(),
                    timeout: self.config.timeout,
                    compress: self.config.compress,
                    ..WsConfig::default()
                },
            )),
            StreamTransport::Sse => Arc::new(SseTransport::new(
                token,
                SseConfig { endpoint: self.config.stream_endpoint.clone(), timeout: self.config.timeout, ..SseConfig::default() },
            )),
        };
        SignalFlowClient::new(transport)
    }
}

/// Unifies every subsystem's error type behind one enum, the way
/// `services/receiver/src/session.rs`'s `SessionError` folds its
/// dependencies' errors into a single `#[from]`-derived type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Computation(#[from] ComputationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_json_codec_and_websocket_transport() {
        let config = Config::default();
        assert_eq!(config.codec, Codec::Json);
        assert_eq!(config.stream_transport, StreamTransport::WebSocket);
        assert!(config.compress);
    }

    #[tokio::test]
    async fn ingest_with_overrides_builds_a_usable_client() {
        let client = Client::new(Config::default());
        let ingest = client.ingest_with(
            "test-token",
            IngestOverrides { batch_size: Some(10), queue_capacity: Some(4), user_agent_extra: vec!["demo/1.0".to_string()] },
        );
        assert_eq!(ingest.sent_batch_count(), 0);
        ingest.stop().await;
    }

    #[test]
    fn signalflow_builds_websocket_transport_by_default() {
        let client = Client::new(Config::default());
        let _signalflow = client.signalflow("test-token");
    }

    #[test]
    fn signalflow_can_be_built_with_sse_transport() {
        let client = Client::new(Config { stream_transport: StreamTransport::Sse, ..Config::default() });
        let _signalflow = client.signalflow("test-token");
    }

    #[test]
    fn error_variants_convert_via_from() {
        let err: Error = CodecError::InvalidInput("bad".into()).into();
        assert!(matches!(err, Error::Codec(_)));
    }
}
