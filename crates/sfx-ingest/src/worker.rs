use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sfx_protocol::codec::{IngestCodec, ObservationBatch};
use sfx_protocol::{MetricKind, Observation};
use tokio::sync::{mpsc, Mutex};

pub(crate) enum WorkItem {
    Observation { kind: MetricKind, observation: Observation },
    Stop,
}

#[derive(Default)]
pub(crate) struct ErrorCounters {
    counters: Mutex<HashMap<String, u64>>,
}

impl ErrorCounters {
    pub(crate) async fn increment(&self, kind: &str) {
        let mut counters = self.counters.lock().await;
        *counters.entry(kind.to_string()).or_insert(0) += 1;
    }

    pub(crate) async fn reset(&self) -> HashMap<String, u64> {
        let mut counters = self.counters.lock().await;
        std::mem::take(&mut *counters)
    }
}

pub(crate) fn gzip_compress(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(8));
    encoder.write_all(body)?;
    encoder.finish()
}

async fn post_batch(
    http: &reqwest::Client,
    url: &str,
    token: &str,
    user_agent: &str,
    content_type: &str,
    compress: bool,
    body: Vec<u8>,
) -> Result<(), reqwest::Error> {
    let body = if compress {
        gzip_compress(&body).unwrap_or(body)
    } else {
        body
    };
    let mut req = http
        .post(url)
        .header("X-SF-Token", token)
        .header("User-Agent", user_agent)
        .header("Content-Type", content_type)
        .body(body);
    if compress {
        req = req.header("Content-Encoding", "gzip");
    }
    req.send().await?.error_for_status()?;
    Ok(())
}

/// Encode and POST one batch, rebuilding the HTTP client and retrying exactly
/// once if the first attempt fails with a connection-level error. Mirrors
/// `_post`'s `_reconnect()`-then-retry behaviour.
async fn post_with_reconnect(
    http: &mut reqwest::Client,
    url: &str,
    token: &str,
    user_agent: &str,
    content_type: &str,
    compress: bool,
    body: Vec<u8>,
    timeout: std::time::Duration,
) -> Result<(), reqwest::Error> {
    match post_batch(http, url, token, user_agent, content_type, compress, body.clone()).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_connect() || e.is_timeout() => {
            *http = reqwest::Client::builder().timeout(timeout).build().unwrap_or_else(|_| http.clone());
            post_batch(http, url, token, user_agent, content_type, compress, body).await
        }
        Err(e) => Err(e),
    }
}

pub(crate) struct WorkerHandles {
    pub codec: Arc<dyn IngestCodec + Send + Sync>,
    pub endpoint: String,
    pub token: String,
    pub user_agent: String,
    pub compress: bool,
    pub timeout: std::time::Duration,
    pub batch_size: usize,
    pub error_counters: Arc<ErrorCounters>,
    pub sent_batches: Arc<AtomicU64>,
}

pub(crate) async fn run(mut rx: mpsc::Receiver<WorkItem>, handles: WorkerHandles) {
    let mut http = match reqwest::Client::builder().timeout(handles.timeout).build() {
        Ok(client) => client,
        Err(_) => reqwest::Client::new(),
    };
    let url = format!("{}/v2/datapoint", handles.endpoint.trim_end_matches('/'));

    loop {
        let first = match rx.recv().await {
            Some(item) => item,
            None => break,
        };
        if matches!(first, WorkItem::Stop) {
            break;
        }
        let mut batch = vec![first];
        let mut stop_requested = false;
        while batch.len() < handles.batch_size {
            match rx.try_recv() {
                Ok(WorkItem::Stop) => {
                    stop_requested = true;
                    break;
                }
                Ok(item) => batch.push(item),
                Err(_) => break,
            }
        }

        let mut by_kind: HashMap<MetricKind, Vec<Observation>> = HashMap::new();
        for item in batch {
            if let WorkItem::Observation { kind, observation } = item {
                by_kind.entry(kind).or_default().push(observation);
            }
        }
        let owned: Vec<(MetricKind, Vec<Observation>)> = by_kind.into_iter().collect();
        let batches: Vec<ObservationBatch<'_>> = owned
            .iter()
            .map(|(kind, obs)| ObservationBatch { kind: *kind, observations: obs })
            .collect();

        match handles.codec.encode_observations(&batches) {
            Ok(body) => {
                match post_with_reconnect(
                    &mut http,
                    &url,
                    &handles.token,
                    &handles.user_agent,
                    handles.codec.content_type(),
                    handles.compress,
                    body,
                    handles.timeout,
                )
                .await
                {
                    Ok(()) => {
                        handles.sent_batches.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "posting datapoints to the ingest endpoint failed");
                        handles.error_counters.increment(error_kind(&e)).await;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "encoding datapoint batch failed");
                handles.error_counters.increment("CodecError").await;
            }
        }

        if stop_requested {
            break;
        }
    }
}

fn error_kind(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "Timeout"
    } else if err.is_connect() {
        "ConnectionError"
    } else if err.is_status() {
        "HttpStatusError"
    } else {
        "RequestError"
    }
}
