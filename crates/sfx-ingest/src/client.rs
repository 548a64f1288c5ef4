use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use sfx_protocol::codec::json::JsonCodec;
use sfx_protocol::codec::IngestCodec;
use sfx_protocol::{Event, MetricKind, Observation};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::worker::{self, ErrorCounters, WorkItem, WorkerHandles};

fn user_agent(extra: &[String]) -> String {
    let mut parts = vec![format!("sfx-ingest/{}", env!("CARGO_PKG_VERSION"))];
    parts.extend(extra.iter().cloned());
    parts.join(" ")
}

struct Inner {
    tx: mpsc::Sender<WorkItem>,
    rx: Mutex<Option<mpsc::Receiver<WorkItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_handles: Mutex<Option<WorkerHandles>>,
    dimensions: Mutex<HashMap<String, String>>,
    error_counters: Arc<ErrorCounters>,
    stopped: AtomicBool,
    token: String,
    endpoint: String,
    event_endpoint: String,
    http: reqwest::Client,
    user_agent: String,
    compress: bool,
    timeout: std::time::Duration,
    codec: Arc<dyn IngestCodec + Send + Sync>,
    sent_batches: Arc<AtomicU64>,
}

/// Batched, background-delivered client for datapoints and events.
///
/// Holds a single bounded queue; the background worker that drains it in
/// batches of up to [`IngestConfig::batch_size`] and POSTs them to the
/// ingest endpoint is spawned lazily, on the first call to [`IngestClient::send`]
/// or [`IngestClient::send_event`] that has anything to do. A client that's
/// built and dropped (or `stop()`ped) without ever sending never starts a
/// task.
#[derive(Clone)]
pub struct IngestClient {
    inner: Arc<Inner>,
}

impl IngestClient {
    pub fn new(token: impl Into<String>, config: IngestConfig) -> Self {
        Self::with_codec(token, config, Arc::new(JsonCodec))
    }

    pub fn with_codec(
        token: impl Into<String>,
        config: IngestConfig,
        codec: Arc<dyn IngestCodec + Send + Sync>,
    ) -> Self {
        let token = token.into();
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let user_agent = user_agent(&config.user_agent_extra);
        let error_counters = Arc::new(ErrorCounters::default());
        let sent_batches = Arc::new(AtomicU64::new(0));
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let handles = WorkerHandles {
            codec: codec.clone(),
            endpoint: config.endpoint.clone(),
            token: token.clone(),
            user_agent: user_agent.clone(),
            compress: config.compress,
            timeout: config.timeout,
            batch_size: config.batch_size.max(1),
            error_counters: error_counters.clone(),
            sent_batches: sent_batches.clone(),
        };

        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let event_endpoint = format!("{endpoint}/v2/event");

        IngestClient {
            inner: Arc::new(Inner {
                tx,
                rx: Mutex::new(Some(rx)),
                worker: Mutex::new(None),
                worker_handles: Mutex::new(Some(handles)),
                dimensions: Mutex::new(HashMap::new()),
                error_counters,
                stopped: AtomicBool::new(false),
                token,
                endpoint,
                event_endpoint,
                http,
                user_agent,
                compress: config.compress,
                timeout: config.timeout,
                codec,
                sent_batches,
            }),
        }
    }

    /// Spawn the background worker if it hasn't been started yet. A no-op
    /// on every call after the first.
    async fn ensure_worker_started(&self) {
        let mut worker = self.inner.worker.lock().await;
        if worker.is_some() {
            return;
        }
        let rx = self.inner.rx.lock().await.take();
        let handles = self.inner.worker_handles.lock().await.take();
        if let (Some(rx), Some(handles)) = (rx, handles) {
            *worker = Some(tokio::spawn(worker::run(rx, handles)));
        }
    }

    /// Number of batches successfully POSTed since this client was created.
    /// Exposed for tests; not part of the public API surface otherwise.
    pub fn sent_batch_count(&self) -> u64 {
        self.inner.sent_batches.load(Ordering::Relaxed)
    }

    pub async fn add_dimensions(&self, dimensions: HashMap<String, String>) {
        let mut guard = self.inner.dimensions.lock().await;
        guard.extend(dimensions);
    }

    pub async fn remove_dimensions(&self, names: &[String]) {
        let mut guard = self.inner.dimensions.lock().await;
        for name in names {
            guard.remove(name);
        }
    }

    async fn merged_dimensions(&self, observation: &Observation) -> Option<HashMap<String, String>> {
        let extra = self.inner.dimensions.lock().await;
        if extra.is_empty() {
            return observation.dimensions.clone();
        }
        let mut merged = observation.dimensions.clone().unwrap_or_default();
        for (k, v) in extra.iter() {
            merged.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Some(merged)
    }

    /// Enqueue gauges, counters, and cumulative counters for background
    /// delivery. Returns immediately; a no-op if all three are empty.
    /// Fails with [`IngestError::QueueFull`] if the bounded queue is full,
    /// or [`IngestError::AlreadyStopped`] after `stop()` has completed.
    pub async fn send(
        &self,
        gauges: &[Observation],
        counters: &[Observation],
        cumulative_counters: &[Observation],
    ) -> Result<(), IngestError> {
        if gauges.is_empty() && counters.is_empty() && cumulative_counters.is_empty() {
            return Ok(());
        }
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(IngestError::AlreadyStopped);
        }
        self.ensure_worker_started().await;

        for (kind, observations) in [
            (MetricKind::Gauge, gauges),
            (MetricKind::Counter, counters),
            (MetricKind::CumulativeCounter, cumulative_counters),
        ] {
            for observation in observations {
                let mut observation = observation.clone();
                observation.dimensions = self.merged_dimensions(&observation).await;
                self.inner
                    .tx
                    .try_send(WorkItem::Observation { kind, observation })
                    .map_err(|_| IngestError::QueueFull)?;
            }
        }
        Ok(())
    }

    /// Validate and synchronously POST a single event to the event endpoint.
    pub async fn send_event(&self, mut event: Event) -> Result<(), IngestError> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(IngestError::AlreadyStopped);
        }
        self.ensure_worker_started().await;
        {
            let extra = self.inner.dimensions.lock().await;
            for (k, v) in extra.iter() {
                event.dimensions.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        let body = self.inner.codec.encode_event(&event)?;
        let body = if self.inner.compress {
            crate::worker::gzip_compress(&body).unwrap_or(body)
        } else {
            body
        };

        let mut req = self
            .inner
            .http
            .post(&self.inner.event_endpoint)
            .header("X-SF-Token", &self.inner.token)
            .header("User-Agent", &self.inner.user_agent)
            .header("Content-Type", self.inner.codec.content_type())
            .body(body);
        if self.inner.compress {
            req = req.header("Content-Encoding", "gzip");
        }
        req.send().await?.error_for_status()?;
        Ok(())
    }

    /// Idempotently stop the worker: the already-stopped flag is flipped
    /// first so no further `send` calls enqueue anything, then a sentinel is
    /// pushed and the worker is joined, draining everything queued before
    /// `stop()` was called.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.inner.worker.lock().await.take() {
            let _ = self.inner.tx.send(WorkItem::Stop).await;
            let _ = handle.await;
        }
    }

    pub async fn reset_error_counters(&self) -> HashMap<String, u64> {
        self.inner.error_counters.reset().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_includes_extras() {
        let ua = user_agent(&["extra/1.0".to_string()]);
        assert!(ua.starts_with("sfx-ingest/"));
        assert!(ua.ends_with("extra/1.0"));
    }

    #[tokio::test]
    async fn add_and_remove_dimensions_round_trip() {
        let client = IngestClient::new("tok", IngestConfig { queue_capacity: 4, ..IngestConfig::default() });
        client.add_dimensions(HashMap::from([("env".to_string(), "prod".to_string())])).await;
        let obs = Observation::new("m", 1_i64).unwrap();
        let merged = client.merged_dimensions(&obs).await.unwrap();
        assert_eq!(merged.get("env"), Some(&"prod".to_string()));

        client.remove_dimensions(&["env".to_string()]).await;
        let merged = client.merged_dimensions(&obs).await;
        assert!(merged.is_none());
        client.stop().await;
    }
}
