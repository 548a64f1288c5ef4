//! Multiplexed WebSocket transport: the primary SignalFlow connection.
//!
//! One authenticated duplex connection carries an arbitrary number of
//! computation channels, routed by the `channel` field on every frame. One
//! reader task owns the socket's read half, senders write through a guarded
//! sink, and a bounded per-channel queue feeds the `Channel` the caller
//! iterates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use sfx_protocol::stream::binary::{decode_frame, BinaryFrame};
use sfx_protocol::StreamMessage;

use crate::channel::{random_channel_name, Channel, ChannelEvent, DetachRequest};
use crate::error::TransportError;
use crate::params::{AttachParams, ExecuteParams};
use crate::transport::Transport;

const CHANNEL_QUEUE_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Configuration for [`WebSocketTransport`].
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// `https://stream.<host>`-style base endpoint; translated to
    /// `wss://stream.<host>/v2/signalflow/connect`.
    pub endpoint: String,
    pub timeout: Duration,
    pub compress: bool,
    pub user_agent: String,
}

impl Default for WsConfig {
    fn default() -> Self {
        WsConfig {
            endpoint: "https://stream.signalfx.com".to_string(),
            timeout: Duration::from_secs(5),
            compress: true,
            user_agent: format!("sfx-signalflow/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn websocket_url(endpoint: &str) -> String {
    let ws_base = endpoint.replacen("https://", "wss://", 1).replacen("http://", "ws://", 1);
    format!("{}/v2/signalflow/connect", ws_base.trim_end_matches('/'))
}

#[derive(Debug, Clone)]
enum ConnState {
    Disconnected,
    Connecting,
    Ready,
    Errored(TransportError),
}

struct Inner {
    token: String,
    ws_url: String,
    user_agent: String,
    timeout: Duration,
    compress: bool,
    state: Mutex<ConnState>,
    ready: Notify,
    sink: Mutex<Option<WsSink>>,
    channels: Mutex<HashMap<String, mpsc::Sender<ChannelEvent>>>,
    server_time_ms: Mutex<Option<i64>>,
    detach_tx: mpsc::UnboundedSender<DetachRequest>,
}

/// A single multiplexed WebSocket connection to the SignalFlow API.
///
/// Cheaply `Clone`able; all clones share the same connection and routing
/// table via an inner `Arc`.
#[derive(Clone)]
pub struct WebSocketTransport {
    inner: Arc<Inner>,
}

impl WebSocketTransport {
    pub fn new(token: impl Into<String>, config: WsConfig) -> Self {
        let (detach_tx, mut detach_rx) = mpsc::unbounded_channel::<DetachRequest>();
        let inner = Arc::new(Inner {
            token: token.into(),
            ws_url: websocket_url(&config.endpoint),
            user_agent: config.user_agent,
            timeout: config.timeout,
            compress: config.compress,
            state: Mutex::new(ConnState::Disconnected),
            ready: Notify::new(),
            sink: Mutex::new(None),
            channels: Mutex::new(HashMap::new()),
            server_time_ms: Mutex::new(None),
            detach_tx,
        });

        let bg = inner.clone();
        tokio::spawn(async move {
            while let Some(DetachRequest(name)) = detach_rx.recv().await {
                bg.detach_channel(&name).await;
            }
        });

        WebSocketTransport { inner }
    }

    /// Last server time watermark observed via `KEEP_ALIVE` frames.
    pub async fn server_time_ms(&self) -> Option<i64> {
        *self.inner.server_time_ms.lock().await
    }

    async fn open_channel(&self, request: Value) -> Result<Channel, TransportError> {
        let name = request
            .get("channel")
            .and_then(Value::as_str)
            .expect("open_channel requests always carry a channel field")
            .to_string();
        let (tx, rx) = mpsc::channel(CHANNEL_QUEUE_CAPACITY);
        self.inner.channels.lock().await.insert(name.clone(), tx);
        if let Err(e) = self.inner.send_frame(request).await {
            self.inner.channels.lock().await.remove(&name);
            return Err(e);
        }
        Ok(Channel::new(name, rx, self.inner.detach_tx.clone()))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn execute(&self, program: &str, params: &ExecuteParams) -> Result<Channel, TransportError> {
        let name = random_channel_name();
        let mut request = json!({
            "type": "execute",
            "channel": name,
            "compress": self.inner.compress,
            "program": program,
        });
        merge_fields(&mut request, params.to_json_fields());
        self.open_channel(request).await
    }

    async fn preflight(&self, program: &str, params: &ExecuteParams) -> Result<Channel, TransportError> {
        let name = random_channel_name();
        let mut request = json!({
            "type": "preflight",
            "channel": name,
            "compress": self.inner.compress,
            "program": program,
        });
        merge_fields(&mut request, params.to_json_fields());
        self.open_channel(request).await
    }

    async fn start(&self, program: &str, params: &ExecuteParams) -> Result<(), TransportError> {
        let mut request = json!({ "type": "start", "program": program });
        merge_fields(&mut request, params.to_json_fields());
        self.inner.send_frame(request).await
    }

    async fn attach(&self, handle: &str, params: &AttachParams) -> Result<Channel, TransportError> {
        let name = random_channel_name();
        let mut request = json!({
            "type": "attach",
            "channel": name,
            "compress": self.inner.compress,
            "handle": handle,
        });
        merge_fields(&mut request, params.to_json_fields());
        self.open_channel(request).await
    }

    async fn keepalive(&self, handle: &str) -> Result<(), TransportError> {
        self.inner.send_frame(json!({ "type": "keepalive", "handle": handle })).await
    }

    async fn stop(&self, handle: &str, reason: Option<&str>) -> Result<(), TransportError> {
        let mut request = json!({ "type": "stop", "handle": handle });
        if let Some(reason) = reason {
            request["reason"] = Value::from(reason);
        }
        self.inner.send_frame(request).await
    }

    async fn close(&self) {
        let mut sink_guard = self.inner.sink.lock().await;
        if let Some(mut sink) = sink_guard.take() {
            let _ = sink
                .send(Message::Close(Some(CloseFrame { code: CloseCode::Normal, reason: "".into() })))
                .await;
        }
        drop(sink_guard);
        let mut channels = self.inner.channels.lock().await;
        for (_, tx) in channels.drain() {
            let _ = tx.send(ChannelEvent::End(None)).await;
        }
        *self.inner.state.lock().await = ConnState::Disconnected;
    }
}

fn merge_fields(request: &mut Value, fields: serde_json::Map<String, Value>) {
    if let Value::Object(map) = request {
        map.extend(fields);
    }
}

impl Inner {
    async fn ensure_ready(self: &Arc<Self>) -> Result<(), TransportError> {
        loop {
            let mut guard = self.state.lock().await;
            match guard.clone() {
                ConnState::Ready => return Ok(()),
                ConnState::Errored(e) => {
                    *guard = ConnState::Disconnected;
                    return Err(e);
                }
                ConnState::Connecting => {
                    drop(guard);
                    self.ready.notified().await;
                }
                ConnState::Disconnected => {
                    *guard = ConnState::Connecting;
                    drop(guard);
                    if let Err(e) = self.clone().connect().await {
                        *self.state.lock().await = ConnState::Errored(e.clone());
                        self.ready.notify_waiters();
                        return Err(e);
                    }
                }
            }
        }
    }

    async fn send_frame(self: &Arc<Self>, request: Value) -> Result<(), TransportError> {
        self.ensure_ready().await?;
        self.send_frame_raw(&request).await
    }

    async fn send_frame_raw(&self, value: &Value) -> Result<(), TransportError> {
        let mut sink_guard = self.sink.lock().await;
        let sink = sink_guard.as_mut().ok_or_else(|| TransportError::Io("not connected".into()))?;
        sink.send(Message::Text(value.to_string().into())).await.map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn connect(self: Arc<Self>) -> Result<(), TransportError> {
        let mut request = self.ws_url.clone().into_client_request().map_err(|e| TransportError::Io(e.to_string()))?;
        let token_header = self.token.parse().map_err(|_| TransportError::Io("invalid token header value".into()))?;
        request.headers_mut().insert("X-SF-Token", token_header);

        let connect_fut = tokio_tungstenite::connect_async(request);
        let (ws, _response) = tokio::time::timeout(self.timeout, connect_fut)
            .await
            .map_err(|_| TransportError::Io("connect timed out".into()))?
            .map_err(|e| TransportError::Io(e.to_string()))?;

        tracing::info!(url = %self.ws_url, "signalflow websocket connected");
        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);

        self.send_frame_raw(&json!({
            "type": "authenticate",
            "token": self.token,
            "userAgent": self.user_agent,
        }))
        .await?;

        let reader = self.clone();
        tokio::spawn(async move { reader.read_loop(stream).await });
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, mut stream: WsSource) {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(&text) {
                    Ok(value) => self.dispatch(value).await,
                    Err(e) => tracing::warn!(error = %e, "failed to parse signalflow text frame"),
                },
                Some(Ok(Message::Binary(bytes))) => self.dispatch_binary(&bytes).await,
                Some(Ok(Message::Ping(payload))) => {
                    let mut sink_guard = self.sink.lock().await;
                    if let Some(sink) = sink_guard.as_mut() {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = close_code_and_reason(frame);
                    self.handle_disconnect(code, reason).await;
                    return;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "signalflow websocket read error");
                    self.handle_disconnect(1006, e.to_string()).await;
                    return;
                }
                None => {
                    self.handle_disconnect(1006, "connection closed".to_string()).await;
                    return;
                }
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, value: Value) {
        if value.get("event").and_then(Value::as_str) == Some("KEEP_ALIVE") {
            if let Some(ts) = value.get("timestampMs").and_then(Value::as_i64) {
                *self.server_time_ms.lock().await = Some(ts);
            }
            return;
        }

        if value.get("type").and_then(Value::as_str) == Some("authenticated") {
            tracing::info!(
                user_id = value.get("userId").and_then(Value::as_str).unwrap_or_default(),
                org_id = value.get("orgId").and_then(Value::as_str).unwrap_or_default(),
                "signalflow authentication handshake completed"
            );
            *self.state.lock().await = ConnState::Ready;
            self.ready.notify_waiters();
            return;
        }

        let Some(channel) = value.get("channel").and_then(Value::as_str).map(str::to_string) else {
            tracing::debug!("dropping signalflow frame with no channel");
            return;
        };

        let mtype = value.get("type").and_then(Value::as_str).unwrap_or_default().to_string();
        let is_terminal = mtype == "control-message"
            && matches!(value.get("event").and_then(Value::as_str), Some("END_OF_CHANNEL") | Some("ABORT_CHANNEL"));
        let decoded = match sfx_protocol::stream::decode(&mtype, &value) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(error = %e, channel = %channel, "failed to decode signalflow frame");
                None
            }
        };
        self.route(&channel, decoded, is_terminal).await;
    }

    async fn dispatch_binary(self: &Arc<Self>, bytes: &[u8]) {
        match decode_frame(bytes) {
            Ok(Some(BinaryFrame::Json { channel, payload })) => {
                let mut payload = payload;
                if let Value::Object(map) = &mut payload {
                    map.entry("channel").or_insert_with(|| Value::String(channel.clone()));
                }
                self.dispatch(payload).await;
            }
            Ok(Some(BinaryFrame::Data { channel, logical_timestamp_ms, max_delay_ms, data })) => {
                let message = StreamMessage::Data { logical_timestamp_ms, max_delay_ms, data };
                self.route(&channel, Some(message), false).await;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "failed to decode binary signalflow frame"),
        }
    }

    async fn route(&self, channel: &str, decoded: Option<StreamMessage>, is_terminal: bool) {
        let tx = {
            let mut channels = self.channels.lock().await;
            if is_terminal { channels.remove(channel) } else { channels.get(channel).cloned() }
        };
        let Some(tx) = tx else { return };
        if let Some(msg) = decoded {
            let _ = tx.send(ChannelEvent::Message(msg)).await;
        }
        if is_terminal {
            let _ = tx.send(ChannelEvent::End(None)).await;
        }
    }

    async fn detach_channel(&self, name: &str) {
        let existed = self.channels.lock().await.remove(name);
        if let Some(tx) = existed {
            let _ = tx.send(ChannelEvent::End(None)).await;
            let _ = self.send_frame_raw(&json!({ "type": "detach", "channel": name })).await;
        }
    }

    /// Every open channel gets the end sentinel; a clean close (code 1000)
    /// carries no error (consumers see it the same as an explicit
    /// `EndOfChannel`), any other code carries the error that caused it so
    /// `Computation` knows to attempt a resume. A non-1000 close observed
    /// before the `authenticated` reply arrived (state still `Connecting`)
    /// is reported as `AuthenticationFailed` rather than `Closed`, since no
    /// channel could have been open yet to resume. The transport itself
    /// also records the error so the next call through `ensure_ready`
    /// surfaces it once, then reconnects fresh.
    async fn handle_disconnect(&self, code: u16, reason: String) {
        tracing::info!(code, reason = %reason, "lost signalflow websocket connection");
        let was_connecting = matches!(*self.state.lock().await, ConnState::Connecting);
        let transport_err = if code == 1000 {
            None
        } else if was_connecting {
            Some(TransportError::AuthenticationFailed(code, reason.clone()))
        } else {
            Some(TransportError::Closed { code, reason: reason.clone() })
        };

        let mut channels = self.channels.lock().await;
        for (_, tx) in channels.drain() {
            let _ = tx.send(ChannelEvent::End(transport_err.clone())).await;
        }
        drop(channels);

        *self.sink.lock().await = None;
        let mut state = self.state.lock().await;
        *state = match (code, transport_err) {
            (1000, _) => ConnState::Disconnected,
            (_, Some(err)) => ConnState::Errored(err),
            (_, None) => ConnState::Disconnected,
        };
        drop(state);
        self.ready.notify_waiters();
    }
}

fn close_code_and_reason(frame: Option<CloseFrame>) -> (u16, String) {
    match frame {
        Some(frame) => (frame.code.into(), frame.reason.to_string()),
        None => (1000, String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_https_endpoint_to_wss_connect_url() {
        assert_eq!(
            websocket_url("https://stream.signalfx.com"),
            "wss://stream.signalfx.com/v2/signalflow/connect"
        );
    }

    #[test]
    fn translates_http_endpoint_to_ws_connect_url() {
        assert_eq!(websocket_url("http://127.0.0.1:9000"), "ws://127.0.0.1:9000/v2/signalflow/connect");
    }
}
