pub mod sse;
pub mod ws;

use async_trait::async_trait;

use crate::channel::Channel;
use crate::error::TransportError;
use crate::params::{AttachParams, ExecuteParams};

/// A capability for interacting with the SignalFlow API, implemented by both
/// the multiplexed WebSocket transport (the default) and the HTTP/SSE
/// fallback.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, program: &str, params: &ExecuteParams) -> Result<Channel, TransportError>;

    async fn preflight(&self, program: &str, params: &ExecuteParams) -> Result<Channel, TransportError>;

    async fn start(&self, program: &str, params: &ExecuteParams) -> Result<(), TransportError>;

    async fn attach(&self, handle: &str, params: &AttachParams) -> Result<Channel, TransportError>;

    async fn keepalive(&self, handle: &str) -> Result<(), TransportError>;

    async fn stop(&self, handle: &str, reason: Option<&str>) -> Result<(), TransportError>;

    /// Close the underlying connection(s). Any open channels receive the
    /// end sentinel.
    async fn close(&self);
}
