use std::time::Duration;

pub const DEFAULT_INGEST_ENDPOINT: &str = "https://ingest.signalfx.com";
pub const DEFAULT_BATCH_SIZE: usize = 300;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Configuration for an [`crate::IngestClient`].
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub endpoint: String,
    pub timeout: Duration,
    /// Maximum number of items the background worker pulls out of the queue
    /// per HTTP request.
    pub batch_size: usize,
    /// Capacity of the bounded queue feeding the worker. `send` returns
    /// [`crate::IngestError::QueueFull`] once it's full rather than blocking.
    pub queue_capacity: usize,
    pub compress: bool,
    pub user_agent_extra: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            endpoint: DEFAULT_INGEST_ENDPOINT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            compress: true,
            user_agent_extra: Vec::new(),
        }
    }
}
