/// Errors surfaced while opening or using a SignalFlow transport connection.
///
/// Distinct from [`ComputationError`], which is raised while iterating a
/// computation's message stream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// A non-2xx HTTP response, or a server-reported error body on the
    /// `execute`/`attach`/... request itself.
    #[error("signalflow request failed (status {status}): {message}")]
    Http { status: u16, error_type: Option<String>, message: String },

    /// Network/IO failure establishing or maintaining the connection
    /// (connect refused, DNS failure, WebSocket protocol error, timeout).
    #[error("signalflow transport io error: {0}")]
    Io(String),

    /// The WebSocket closed with a non-1000 code before or after
    /// authenticating. Carries the close code and optional reason.
    #[error("signalflow connection closed (code {code}): {reason}")]
    Closed { code: u16, reason: String },

    /// The authenticate handshake's reply never arrived before the
    /// connection closed.
    #[error("signalflow authentication failed (close code {0}): {1}")]
    AuthenticationFailed(u16, String),
}

/// Errors raised while iterating a [`crate::Computation`]'s message stream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ComputationError {
    /// The computation terminated abnormally (`CHANNEL_ABORT`). Carries the
    /// server-reported abort state (e.g. `"ABORT_REQUESTED"`) and reason.
    #[error("computation aborted ({state}): {reason}")]
    Aborted { state: String, reason: String },

    /// The server reported one or more errors on the channel (`error`
    /// frames), typically during initialization.
    #[error("computation failed: {errors:?}")]
    Failed { errors: Vec<serde_json::Value> },

    /// The underlying transport failed (including after the one-shot
    /// resume attempt).
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] sfx_protocol::CodecError),
}
