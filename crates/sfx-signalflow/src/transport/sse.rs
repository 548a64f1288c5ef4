//! HTTP/SSE fallback transport: one POST per computation, whose response
//! body is consumed as a server-sent-event stream instead of sharing a
//! single multiplexed socket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;

use crate::channel::{random_channel_name, Channel, ChannelEvent, DetachRequest};
use crate::error::TransportError;
use crate::params::{AttachParams, ExecuteParams};
use crate::transport::Transport;

const CHANNEL_QUEUE_CAPACITY: usize = 256;

/// Configuration for [`SseTransport`].
#[derive(Debug, Clone)]
pub struct SseConfig {
    /// `https://stream.<host>`-style base endpoint.
    pub endpoint: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for SseConfig {
    fn default() -> Self {
        SseConfig {
            endpoint: "https://stream.signalfx.com".to_string(),
            timeout: Duration::from_secs(5),
            user_agent: format!("sfx-signalflow/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

struct Inner {
    http: reqwest::Client,
    token: String,
    endpoint: String,
    user_agent: String,
    streams: Mutex<HashMap<String, AbortHandle>>,
    detach_tx: mpsc::UnboundedSender<DetachRequest>,
}

/// One computation per HTTP connection, each consumed as an SSE stream.
///
/// Cheaply `Clone`able; every clone shares the same live-stream registry so
/// `close()` from any clone tears down every open computation.
#[derive(Clone)]
pub struct SseTransport {
    inner: Arc<Inner>,
}

impl SseTransport {
    pub fn new(token: impl Into<String>, config: SseConfig) -> Self {
        let http = reqwest::Client::builder().timeout(config.timeout).build().unwrap_or_else(|_| reqwest::Client::new());
        let (detach_tx, mut detach_rx) = mpsc::unbounded_channel::<DetachRequest>();
        let inner = Arc::new(Inner {
            http,
            token: token.into(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            user_agent: config.user_agent,
            streams: Mutex::new(HashMap::new()),
            detach_tx,
        });

        let bg = inner.clone();
        tokio::spawn(async move {
            while let Some(DetachRequest(name)) = detach_rx.recv().await {
                if let Some(handle) = bg.streams.lock().await.remove(&name) {
                    handle.abort();
                }
            }
        });

        SseTransport { inner }
    }

    async fn open(&self, path: &str, body: Value) -> Result<Channel, TransportError> {
        let name = random_channel_name();
        let url = format!("{}/v2/signalflow/{path}", self.inner.endpoint);
        let response = self
            .inner
            .http
            .post(&url)
            .header("X-SF-Token", &self.inner.token)
            .header("User-Agent", &self.inner.user_agent)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(TransportError::Http {
                status,
                error_type: error_body.get("errorType").and_then(Value::as_str).map(str::to_string),
                message: error_body.get("message").and_then(Value::as_str).unwrap_or_default().to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(CHANNEL_QUEUE_CAPACITY);
        let byte_stream = response.bytes_stream().map(|r| r.map_err(std::io::Error::other));
        let mut events = byte_stream.eventsource();
        let task = tokio::spawn(async move {
            loop {
                let event = match events.next().await {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "signalflow sse stream error");
                        let _ = tx.send(ChannelEvent::End(Some(TransportError::Io(e.to_string())))).await;
                        return;
                    }
                    None => {
                        // The stream ended without an explicit EndOfChannel/
                        // ChannelAbort control message: an unexpected disconnect.
                        let _ = tx
                            .send(ChannelEvent::End(Some(TransportError::Io(
                                "signalflow sse stream ended unexpectedly".to_string(),
                            ))))
                            .await;
                        return;
                    }
                };
                let payload: Value = match serde_json::from_str(&event.data) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to parse signalflow sse event payload");
                        continue;
                    }
                };
                let is_terminal = event.event == "control-message"
                    && matches!(payload.get("event").and_then(Value::as_str), Some("END_OF_CHANNEL") | Some("ABORT_CHANNEL"));
                match sfx_protocol::stream::decode(&event.event, &payload) {
                    Ok(Some(msg)) => {
                        if tx.send(ChannelEvent::Message(msg)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "failed to decode signalflow sse event"),
                }
                if is_terminal {
                    let _ = tx.send(ChannelEvent::End(None)).await;
                    return;
                }
            }
        });

        self.inner.streams.lock().await.insert(name.clone(), task.abort_handle());
        Ok(Channel::new(name, rx, self.inner.detach_tx.clone()))
    }

    async fn post_fire_and_forget(&self, path: &str, body: Value) -> Result<(), TransportError> {
        let url = format!("{}/v2/signalflow/{path}", self.inner.endpoint);
        let response = self
            .inner
            .http
            .post(&url)
            .header("X-SF-Token", &self.inner.token)
            .header("User-Agent", &self.inner.user_agent)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(TransportError::Http {
                status,
                error_type: error_body.get("errorType").and_then(Value::as_str).map(str::to_string),
                message: error_body.get("message").and_then(Value::as_str).unwrap_or_default().to_string(),
            });
        }
        Ok(())
    }
}

fn merge_fields(request: &mut Value, fields: serde_json::Map<String, Value>) {
    if let Value::Object(map) = request {
        map.extend(fields);
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn execute(&self, program: &str, params: &ExecuteParams) -> Result<Channel, TransportError> {
        let mut body = json!({ "program": program });
        merge_fields(&mut body, params.to_json_fields());
        self.open("execute", body).await
    }

    async fn preflight(&self, program: &str, params: &ExecuteParams) -> Result<Channel, TransportError> {
        let mut body = json!({ "program": program });
        merge_fields(&mut body, params.to_json_fields());
        self.open("preflight", body).await
    }

    async fn start(&self, program: &str, params: &ExecuteParams) -> Result<(), TransportError> {
        let mut body = json!({ "program": program });
        merge_fields(&mut body, params.to_json_fields());
        self.post_fire_and_forget("start", body).await
    }

    async fn attach(&self, handle: &str, params: &AttachParams) -> Result<Channel, TransportError> {
        let mut body = json!({ "handle": handle });
        merge_fields(&mut body, params.to_json_fields());
        self.open("attach", body).await
    }

    async fn keepalive(&self, handle: &str) -> Result<(), TransportError> {
        self.post_fire_and_forget("keepalive", json!({ "handle": handle })).await
    }

    async fn stop(&self, handle: &str, reason: Option<&str>) -> Result<(), TransportError> {
        let mut body = json!({ "handle": handle });
        if let Some(reason) = reason {
            body["reason"] = Value::from(reason);
        }
        self.post_fire_and_forget("stop", body).await
    }

    async fn close(&self) {
        let mut streams = self.inner.streams.lock().await;
        for (_, handle) in streams.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(endpoint: &str) -> SseConfig {
        SseConfig { endpoint: endpoint.to_string(), timeout: Duration::from_secs(2), user_agent: "test-agent".to_string() }
    }

    #[tokio::test]
    async fn execute_decodes_sse_events_into_messages() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: control-message\n",
            "data: {\"event\":\"STREAM_START\",\"timestampMs\":1}\n\n",
            "event: data\n",
            "data: {\"logicalTimestampMs\":10,\"data\":[{\"tsId\":\"abc\",\"value\":1}]}\n\n",
            "event: control-message\n",
            "data: {\"event\":\"END_OF_CHANNEL\",\"timestampMs\":2}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v2/signalflow/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let transport = SseTransport::new("test-token", config_for(&server.uri()));
        let channel = transport.execute("data('cpu.load').publish()", &ExecuteParams::default()).await.unwrap();

        let first = channel.next().await.unwrap();
        assert!(matches!(first, sfx_protocol::StreamMessage::StreamStart { timestamp_ms: 1 }));
        let second = channel.next().await.unwrap();
        assert!(matches!(second, sfx_protocol::StreamMessage::Data { logical_timestamp_ms: 10, .. }));
        assert!(channel.next().await.is_none());
    }

    #[tokio::test]
    async fn non_2xx_response_surfaces_as_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/signalflow/execute"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "errorType": "INVALID_PROGRAM",
                "message": "unexpected token",
            })))
            .mount(&server)
            .await;

        let transport = SseTransport::new("test-token", config_for(&server.uri()));
        let err = transport.execute("not a program", &ExecuteParams::default()).await.unwrap_err();
        match err {
            TransportError::Http { status, error_type, message } => {
                assert_eq!(status, 400);
                assert_eq!(error_type.as_deref(), Some("INVALID_PROGRAM"));
                assert_eq!(message, "unexpected token");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }
}
