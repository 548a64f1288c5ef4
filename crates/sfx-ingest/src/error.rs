/// Errors raised by the ingest client.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Codec(#[from] sfx_protocol::CodecError),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Returned by `send`/`send_event` when the bounded queue is full. This
    /// is the back-pressure policy this client uses in place of blocking.
    #[error("ingest queue is full")]
    QueueFull,

    /// Returned by any public operation invoked after `stop()` has completed.
    #[error("ingest client has already been stopped")]
    AlreadyStopped,
}
