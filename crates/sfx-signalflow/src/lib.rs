//! SignalFlow streaming analytics client.
//!
//! [`SignalFlowClient`] wraps one [`Transport`] — the multiplexed WebSocket
//! transport by default, or the HTTP/SSE fallback — and turns each
//! `execute`/`preflight`/`attach` call into a [`Computation`]: a stateful
//! consumer of that computation's [`Channel`] that tracks lifecycle state,
//! accumulates metadata, folds same-tick `Data` frames together, and knows
//! how to re-issue its own opening request if the connection drops before
//! the computation reaches a terminal state.

mod channel;
mod computation;
pub mod error;
mod params;
pub mod transport;

pub use channel::Channel;
pub use computation::{Computation, ComputationState, LimitedResultSet};
pub use error::{ComputationError, TransportError};
pub use params::{AttachParams, ExecuteParams};
pub use transport::sse::{SseConfig, SseTransport};
pub use transport::ws::{WebSocketTransport, WsConfig};
pub use transport::Transport;

use std::sync::Arc;

use computation::ReexecuteFn;

/// Entry point for executing and attaching to SignalFlow computations.
///
/// Cheaply `Clone`able: every clone shares the same underlying [`Transport`]
/// (and, for the WebSocket transport, the same connection and routing
/// table).
#[derive(Clone)]
pub struct SignalFlowClient {
    transport: Arc<dyn Transport>,
}

impl SignalFlowClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        SignalFlowClient { transport }
    }

    /// Execute a program and return a [`Computation`] over its output.
    pub async fn execute(
        &self,
        program: impl Into<String>,
        params: ExecuteParams,
    ) -> Result<Computation, TransportError> {
        let program = program.into();
        let channel = self.transport.execute(&program, &params).await?;
        let reexecute = self.reexecute_execute(program, params);
        Ok(Computation::new(channel, reexecute))
    }

    /// Validate a program without running it to completion, returning a
    /// [`Computation`] over the preflight diagnostics.
    pub async fn preflight(
        &self,
        program: impl Into<String>,
        params: ExecuteParams,
    ) -> Result<Computation, TransportError> {
        let program = program.into();
        let channel = self.transport.preflight(&program, &params).await?;
        let reexecute = self.reexecute_preflight(program, params);
        Ok(Computation::new(channel, reexecute))
    }

    /// Fire-and-forget start of a background computation; no channel is
    /// opened and no messages are returned.
    pub async fn start(&self, program: &str, params: &ExecuteParams) -> Result<(), TransportError> {
        self.transport.start(program, params).await
    }

    /// Attach a channel to an already-running computation by handle.
    pub async fn attach(
        &self,
        handle: impl Into<String>,
        params: AttachParams,
    ) -> Result<Computation, TransportError> {
        let handle = handle.into();
        let channel = self.transport.attach(&handle, &params).await?;
        let reexecute = self.reexecute_attach(handle, params);
        Ok(Computation::new(channel, reexecute))
    }

    pub async fn keepalive(&self, handle: &str) -> Result<(), TransportError> {
        self.transport.keepalive(handle).await
    }

    pub async fn stop(&self, handle: &str, reason: Option<&str>) -> Result<(), TransportError> {
        self.transport.stop(handle, reason).await
    }

    /// Close the underlying connection(s). Every open channel (and the
    /// `Computation`s iterating them) receives the end sentinel.
    pub async fn close(&self) {
        self.transport.close().await;
    }

    fn reexecute_execute(&self, program: String, params: ExecuteParams) -> ReexecuteFn {
        let transport = self.transport.clone();
        Arc::new(move |since| {
            let transport = transport.clone();
            let program = program.clone();
            let params = since.map_or_else(|| params.clone(), |since| params.with_start(since));
            Box::pin(async move { transport.execute(&program, &params).await })
        })
    }

    fn reexecute_preflight(&self, program: String, params: ExecuteParams) -> ReexecuteFn {
        let transport = self.transport.clone();
        Arc::new(move |since| {
            let transport = transport.clone();
            let program = program.clone();
            let params = since.map_or_else(|| params.clone(), |since| params.with_start(since));
            Box::pin(async move { transport.preflight(&program, &params).await })
        })
    }

    /// `attach` carries no `start` field, so resumption simply re-attaches
    /// to the same server-side handle; `since` is ignored.
    fn reexecute_attach(&self, handle: String, params: AttachParams) -> ReexecuteFn {
        let transport = self.transport.clone();
        Arc::new(move |_since| {
            let transport = transport.clone();
            let handle = handle.clone();
            let params = params.clone();
            Box::pin(async move { transport.attach(&handle, &params).await })
        })
    }
}
