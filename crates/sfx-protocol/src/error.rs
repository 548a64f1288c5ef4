/// Errors raised while validating or (de)serializing wire payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Caller-supplied data failed validation before it ever reached the wire.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A payload received from the server could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}
