//! Stateful consumer of one computation's message channel.
//!
//! Control messages drive lifecycle state, `Metadata`/`ExpiredTsid`/`Info`
//! messages are intercepted to update accumulated fields rather than handed
//! to the caller, and `Data` frames sharing one logical timestamp are folded
//! into a single emitted batch by counting frames-per-tick once a full tick
//! has been observed (see [`Inner::fold_data`]).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use sfx_protocol::{DataPoint, ObservationValue, StreamMessage};

use crate::channel::Channel;
use crate::error::{ComputationError, TransportError};

/// Lifecycle state of a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputationState {
    Unknown,
    StreamStarted,
    ComputationStarted,
    DataReceived,
    Completed,
    Aborted,
}

impl ComputationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ComputationState::Completed | ComputationState::Aborted)
    }
}

/// Derived field populated by a `FIND_LIMITED_RESULT_SET` info message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimitedResultSet {
    pub matched_size: i64,
    pub limit_size: i64,
}

/// Re-issues the request that opened this computation's channel, threading
/// `since` in as the new `start`. Built by
/// [`crate::SignalFlowClient`]'s `execute`/`preflight`/`attach`.
pub(crate) type ReexecuteFn = Arc<
    dyn Fn(Option<i64>) -> Pin<Box<dyn Future<Output = Result<Channel, TransportError>> + Send>> + Send + Sync,
>;

struct PartialBatch {
    logical_timestamp_ms: i64,
    max_delay_ms: Option<i64>,
    data: HashMap<String, ObservationValue>,
}

enum ApplyOutcome {
    Yield(StreamMessage),
    Abort(ComputationError),
    Failed(ComputationError),
    Continue,
    End,
}

struct Inner {
    channel: Channel,
    reexecute: ReexecuteFn,
    state: ComputationState,
    handle_id: Option<String>,
    resolution_ms: Option<i64>,
    input_series_count: i64,
    last_logical_ts: Option<i64>,
    known_series: HashMap<String, Value>,
    find_matched_no_timeseries: bool,
    find_limited_result_set: Option<LimitedResultSet>,
    groupby_missing_property: Vec<String>,
    expected_batches_per_tick: Option<usize>,
    batch_count_detected: bool,
    current_batch: Option<PartialBatch>,
    current_batch_count: usize,
    resumed_once: bool,
    pending_error: Option<ComputationError>,
}

impl Inner {
    fn apply(&mut self, message: StreamMessage) -> ApplyOutcome {
        match message {
            StreamMessage::StreamStart { .. } => {
                self.state = ComputationState::StreamStarted;
                ApplyOutcome::Yield(message)
            }
            StreamMessage::JobStart { ref handle, .. } => {
                self.state = ComputationState::ComputationStarted;
                self.handle_id = Some(handle.clone());
                ApplyOutcome::Yield(message)
            }
            StreamMessage::JobProgress { .. } => ApplyOutcome::Yield(message),
            StreamMessage::ChannelAbort { ref abort_info, .. } => {
                let (state, reason) = extract_abort(abort_info);
                ApplyOutcome::Abort(ComputationError::Aborted { state, reason })
            }
            StreamMessage::EndOfChannel { .. } => ApplyOutcome::End,
            StreamMessage::Metadata { tsid, properties } => {
                self.known_series.insert(tsid, properties);
                ApplyOutcome::Continue
            }
            StreamMessage::ExpiredTsid { tsid } => {
                self.known_series.remove(&tsid);
                ApplyOutcome::Continue
            }
            StreamMessage::Info { message, .. } => {
                self.apply_info(&message);
                ApplyOutcome::Continue
            }
            StreamMessage::Event { .. } => ApplyOutcome::Yield(message),
            StreamMessage::Data { logical_timestamp_ms, max_delay_ms, data } => {
                self.state = ComputationState::DataReceived;
                match self.fold_data(logical_timestamp_ms, max_delay_ms, data) {
                    Some(ready) => ApplyOutcome::Yield(ready),
                    None => ApplyOutcome::Continue,
                }
            }
            StreamMessage::Error { errors } => ApplyOutcome::Failed(ComputationError::Failed { errors }),
        }
    }

    fn apply_info(&mut self, message: &Value) {
        let Some(code) = message.get("messageCode").and_then(Value::as_str) else {
            tracing::debug!("signalflow info message missing messageCode; ignoring");
            return;
        };
        let contents = message.get("contents");
        match code {
            "JOB_RUNNING_RESOLUTION" => {
                if let Some(ms) = contents.and_then(|c| c.get("resolutionMs")).and_then(Value::as_i64) {
                    self.resolution_ms = Some(ms);
                }
            }
            "FETCH_NUM_TIMESERIES" => {
                if let Some(n) = contents.and_then(|c| c.get("count")).and_then(Value::as_i64) {
                    self.input_series_count += n;
                }
            }
            "FIND_MATCHED_NO_TIMESERIES" => self.find_matched_no_timeseries = true,
            "FIND_LIMITED_RESULT_SET" => {
                let matched_size = contents.and_then(|c| c.get("matchedSize")).and_then(Value::as_i64).unwrap_or(0);
                let limit_size = contents.and_then(|c| c.get("limitSize")).and_then(Value::as_i64).unwrap_or(0);
                self.find_limited_result_set = Some(LimitedResultSet { matched_size, limit_size });
            }
            "GROUPBY_MISSING_PROPERTY" => {
                if let Some(name) = contents.and_then(|c| c.get("property")).and_then(Value::as_str) {
                    self.groupby_missing_property.push(name.to_string());
                }
            }
            other => tracing::debug!(code = other, "unrecognized signalflow info message code"),
        }
    }

    /// Fold one `Data` frame into the held partial batch, emitting it once
    /// either the expected per-tick frame count is reached or the logical
    /// timestamp advances.
    fn fold_data(&mut self, logical_timestamp_ms: i64, max_delay_ms: Option<i64>, data: Vec<DataPoint>) -> Option<StreamMessage> {
        match &mut self.current_batch {
            Some(batch) if batch.logical_timestamp_ms == logical_timestamp_ms => {
                for point in data {
                    batch.data.insert(point.tsid, point.value);
                }
                if max_delay_ms.is_some() {
                    batch.max_delay_ms = max_delay_ms;
                }
                self.current_batch_count += 1;
                self.ready_if_expected_reached()
            }
            Some(_) => {
                if !self.batch_count_detected {
                    self.expected_batches_per_tick = Some(self.current_batch_count);
                    self.batch_count_detected = true;
                }
                let ready = self.flush_current_batch();
                self.begin_batch(logical_timestamp_ms, max_delay_ms, data);
                ready
            }
            None => {
                self.begin_batch(logical_timestamp_ms, max_delay_ms, data);
                self.ready_if_expected_reached()
            }
        }
    }

    fn begin_batch(&mut self, logical_timestamp_ms: i64, max_delay_ms: Option<i64>, data: Vec<DataPoint>) {
        let mut map = HashMap::with_capacity(data.len());
        for point in data {
            map.insert(point.tsid, point.value);
        }
        self.current_batch = Some(PartialBatch { logical_timestamp_ms, max_delay_ms, data: map });
        self.current_batch_count = 1;
        // Advance on receipt, not just on flush: a resume after an
        // unexpected disconnect must use the newest tick observed, even if
        // it's still held as a partial batch, or the reconnect would ask
        // the server to replay a tick we've already started consuming.
        self.last_logical_ts = Some(logical_timestamp_ms);
    }

    fn ready_if_expected_reached(&mut self) -> Option<StreamMessage> {
        match self.expected_batches_per_tick {
            Some(expected) if self.current_batch_count >= expected => self.flush_current_batch(),
            _ => None,
        }
    }

    fn flush_current_batch(&mut self) -> Option<StreamMessage> {
        let batch = self.current_batch.take()?;
        self.current_batch_count = 0;
        // last_logical_ts was already advanced in begin_batch when this
        // batch started.
        let data = batch.data.into_iter().map(|(tsid, value)| DataPoint { tsid, value }).collect();
        Some(StreamMessage::Data {
            logical_timestamp_ms: batch.logical_timestamp_ms,
            max_delay_ms: batch.max_delay_ms,
            data,
        })
    }

    async fn advance(&mut self) -> Option<Result<StreamMessage, ComputationError>> {
        loop {
            if let Some(err) = self.pending_error.take() {
                return Some(Err(err));
            }
            if self.state.is_terminal() {
                return self.flush_current_batch().map(Ok);
            }

            match self.channel.next().await {
                Some(message) => match self.apply(message) {
                    ApplyOutcome::Yield(message) => return Some(Ok(message)),
                    ApplyOutcome::Continue => continue,
                    ApplyOutcome::Failed(err) => return Some(Err(err)),
                    ApplyOutcome::Abort(err) => {
                        self.state = ComputationState::Aborted;
                        match self.flush_current_batch() {
                            Some(batch) => {
                                self.pending_error = Some(err);
                                return Some(Ok(batch));
                            }
                            None => return Some(Err(err)),
                        }
                    }
                    ApplyOutcome::End => {
                        self.state = ComputationState::Completed;
                        return self.flush_current_batch().map(Ok).or(None);
                    }
                },
                None => return self.handle_unexpected_end().await,
            }
        }
    }

    /// The channel closed without an `EndOfChannel`/`ChannelAbort` message.
    /// A clean close (`Channel::close_error` is `None` — code 1000, an
    /// explicit detach) is treated exactly like an explicit `EndOfChannel`:
    /// no resume attempt, no error. A close carrying a transport error is an
    /// unexpected disconnect: attempt to resume exactly once by re-invoking
    /// the factory with `last_logical_ts`; a second consecutive failure is
    /// surfaced rather than retried indefinitely.
    async fn handle_unexpected_end(&mut self) -> Option<Result<StreamMessage, ComputationError>> {
        let Some(err) = self.channel.close_error().await else {
            self.state = ComputationState::Completed;
            return self.flush_current_batch().map(Ok);
        };

        if !self.resumed_once {
            self.resumed_once = true;
            match (self.reexecute)(self.last_logical_ts).await {
                Ok(channel) => {
                    self.channel = channel;
                    return Box::pin(self.advance()).await;
                }
                Err(resume_err) => return self.terminate_with_transport_error(resume_err),
            }
        }
        self.terminate_with_transport_error(err)
    }

    fn terminate_with_transport_error(&mut self, err: TransportError) -> Option<Result<StreamMessage, ComputationError>> {
        self.state = ComputationState::Aborted;
        match self.flush_current_batch() {
            Some(batch) => {
                self.pending_error = Some(ComputationError::Transport(err));
                Some(Ok(batch))
            }
            None => Some(Err(ComputationError::Transport(err))),
        }
    }
}

fn extract_abort(info: &Value) -> (String, String) {
    let state = info.get("sf_job_abortState").and_then(Value::as_str).unwrap_or("UNKNOWN").to_string();
    let reason = info.get("sf_job_abortReason").and_then(Value::as_str).unwrap_or_default().to_string();
    (state, reason)
}

/// A live handle to a running SignalFlow computation.
///
/// Wraps a [`Channel`] and reconstructs higher-level semantics from its raw
/// message stream: lifecycle transitions, metadata/digest accumulation, and
/// folding same-logical-timestamp `Data` frames into a single emitted
/// message. Obtained from [`crate::SignalFlowClient::execute`],
/// [`crate::SignalFlowClient::preflight`], or [`crate::SignalFlowClient::attach`].
pub struct Computation {
    inner: Mutex<Inner>,
}

impl Computation {
    pub(crate) fn new(channel: Channel, reexecute: ReexecuteFn) -> Self {
        Computation {
            inner: Mutex::new(Inner {
                channel,
                reexecute,
                state: ComputationState::Unknown,
                handle_id: None,
                resolution_ms: None,
                input_series_count: 0,
                last_logical_ts: None,
                known_series: HashMap::new(),
                find_matched_no_timeseries: false,
                find_limited_result_set: None,
                groupby_missing_property: Vec::new(),
                expected_batches_per_tick: None,
                batch_count_detected: false,
                current_batch: None,
                current_batch_count: 0,
                resumed_once: false,
                pending_error: None,
            }),
        }
    }

    pub async fn state(&self) -> ComputationState {
        self.inner.lock().await.state
    }

    pub async fn handle_id(&self) -> Option<String> {
        self.inner.lock().await.handle_id.clone()
    }

    pub async fn resolution_ms(&self) -> Option<i64> {
        self.inner.lock().await.resolution_ms
    }

    pub async fn input_series_count(&self) -> i64 {
        self.inner.lock().await.input_series_count
    }

    pub async fn last_logical_ts(&self) -> Option<i64> {
        self.inner.lock().await.last_logical_ts
    }

    pub async fn find_matched_no_timeseries(&self) -> bool {
        self.inner.lock().await.find_matched_no_timeseries
    }

    pub async fn find_limited_result_set(&self) -> Option<LimitedResultSet> {
        self.inner.lock().await.find_limited_result_set
    }

    pub async fn groupby_missing_property(&self) -> Vec<String> {
        self.inner.lock().await.groupby_missing_property.clone()
    }

    /// The metadata for a given timeseries ID, if a `Metadata` message has
    /// been seen for it and it hasn't since expired.
    pub async fn get_metadata(&self, tsid: &str) -> Option<Value> {
        self.inner.lock().await.known_series.get(tsid).cloned()
    }

    /// Terminate iteration early: marks the computation completed and
    /// detaches the underlying channel.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = ComputationState::Completed;
        inner.channel.close();
    }

    /// Pull the next logical message from the computation's output.
    ///
    /// `Metadata`/`ExpiredTsid`/`Info` messages update this `Computation`'s
    /// accumulated fields and are never yielded directly. `Data` frames
    /// sharing one logical timestamp are merged into a single emitted
    /// message. Returns `None` once the computation has reached a terminal
    /// state and any held partial batch has been flushed.
    pub async fn next(&self) -> Option<Result<StreamMessage, ComputationError>> {
        let mut inner = self.inner.lock().await;
        inner.advance().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ChannelEvent};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn test_channel() -> (Channel, mpsc::Sender<ChannelEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let (detach_tx, _detach_rx) = mpsc::unbounded_channel();
        (Channel::new("test".to_string(), rx, detach_tx), tx)
    }

    fn never_resumes() -> ReexecuteFn {
        Arc::new(|_since| Box::pin(async { Err(TransportError::Io("resume not supported in this test".into())) }))
    }

    fn data(ts: i64, points: &[(&str, i64)]) -> StreamMessage {
        StreamMessage::Data {
            logical_timestamp_ms: ts,
            max_delay_ms: None,
            data: points.iter().map(|(tsid, v)| DataPoint { tsid: (*tsid).to_string(), value: ObservationValue::Int(*v as i128) }).collect(),
        }
    }

    fn sorted_pairs(msg: &StreamMessage) -> Vec<(String, i128)> {
        match msg {
            StreamMessage::Data { data, .. } => {
                let mut pairs: Vec<_> = data
                    .iter()
                    .map(|p| (p.tsid.clone(), match p.value {
                        ObservationValue::Int(v) => v,
                        _ => panic!("expected int value"),
                    }))
                    .collect();
                pairs.sort();
                pairs
            }
            other => panic!("expected Data message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_start_transitions_state_and_is_yielded() {
        let (channel, tx) = test_channel();
        let computation = Computation::new(channel, never_resumes());
        tx.send(ChannelEvent::Message(StreamMessage::StreamStart { timestamp_ms: 1 })).await.unwrap();

        let msg = computation.next().await.unwrap().unwrap();
        assert_eq!(msg, StreamMessage::StreamStart { timestamp_ms: 1 });
        assert_eq!(computation.state().await, ComputationState::StreamStarted);
    }

    #[tokio::test]
    async fn job_start_captures_handle_and_advances_state() {
        let (channel, tx) = test_channel();
        let computation = Computation::new(channel, never_resumes());
        tx.send(ChannelEvent::Message(StreamMessage::JobStart { timestamp_ms: 1, handle: "job-123".into() })).await.unwrap();

        let msg = computation.next().await.unwrap().unwrap();
        assert_eq!(msg, StreamMessage::JobStart { timestamp_ms: 1, handle: "job-123".into() });
        assert_eq!(computation.state().await, ComputationState::ComputationStarted);
        assert_eq!(computation.handle_id().await.as_deref(), Some("job-123"));
    }

    #[tokio::test]
    async fn metadata_is_intercepted_then_expires() {
        let (channel, tx) = test_channel();
        let computation = Computation::new(channel, never_resumes());
        tx.send(ChannelEvent::Message(StreamMessage::Metadata { tsid: "abc".into(), properties: json!({"sf_metric": "cpu"}) }))
            .await
            .unwrap();
        tx.send(ChannelEvent::Message(StreamMessage::ExpiredTsid { tsid: "abc".into() })).await.unwrap();
        tx.send(ChannelEvent::Message(StreamMessage::EndOfChannel { timestamp_ms: 2 })).await.unwrap();

        assert_eq!(computation.next().await, None);
        assert_eq!(computation.get_metadata("abc").await, None);
        assert_eq!(computation.state().await, ComputationState::Completed);
    }

    #[tokio::test]
    async fn info_messages_update_derived_fields() {
        let (channel, tx) = test_channel();
        let computation = Computation::new(channel, never_resumes());
        tx.send(ChannelEvent::Message(StreamMessage::Info {
            logical_timestamp_ms: 1,
            message: json!({"messageCode": "JOB_RUNNING_RESOLUTION", "contents": {"resolutionMs": 1000}}),
        }))
        .await
        .unwrap();
        tx.send(ChannelEvent::Message(StreamMessage::Info {
            logical_timestamp_ms: 1,
            message: json!({"messageCode": "FETCH_NUM_TIMESERIES", "contents": {"count": 7}}),
        }))
        .await
        .unwrap();
        tx.send(ChannelEvent::Message(StreamMessage::EndOfChannel { timestamp_ms: 2 })).await.unwrap();

        assert_eq!(computation.next().await, None);
        assert_eq!(computation.resolution_ms().await, Some(1000));
        assert_eq!(computation.input_series_count().await, 7);
    }

    #[tokio::test]
    async fn channel_abort_raises_computation_aborted() {
        let (channel, tx) = test_channel();
        let computation = Computation::new(channel, never_resumes());
        tx.send(ChannelEvent::Message(StreamMessage::ChannelAbort {
            timestamp_ms: 1,
            abort_info: json!({"sf_job_abortState": "ABORT_REQUESTED", "sf_job_abortReason": "stopped by caller"}),
        }))
        .await
        .unwrap();

        let err = computation.next().await.unwrap().unwrap_err();
        match err {
            ComputationError::Aborted { state, reason } => {
                assert_eq!(state, "ABORT_REQUESTED");
                assert_eq!(reason, "stopped by caller");
            }
            other => panic!("expected Aborted, got {other:?}"),
        }
        assert_eq!(computation.state().await, ComputationState::Aborted);
    }

    #[tokio::test]
    async fn error_message_raises_computation_failed() {
        let (channel, tx) = test_channel();
        let computation = Computation::new(channel, never_resumes());
        tx.send(ChannelEvent::Message(StreamMessage::Error { errors: vec![json!({"code": "BAD_PROGRAM"})] })).await.unwrap();

        let err = computation.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ComputationError::Failed { .. }));
    }

    #[tokio::test]
    async fn accumulates_same_tick_frames_and_flushes_on_advance() {
        // Data(10,{a:1}), Data(10,{b:2}), Data(20,{a:3}), EndOfChannel
        // => Data(10,{a:1,b:2}), then Data(20,{a:3}), then terminal.
        let (channel, tx) = test_channel();
        let computation = Computation::new(channel, never_resumes());
        tx.send(ChannelEvent::Message(data(10, &[("a", 1)]))).await.unwrap();
        tx.send(ChannelEvent::Message(data(10, &[("b", 2)]))).await.unwrap();
        tx.send(ChannelEvent::Message(data(20, &[("a", 3)]))).await.unwrap();
        tx.send(ChannelEvent::Message(StreamMessage::EndOfChannel { timestamp_ms: 99 })).await.unwrap();

        let first = computation.next().await.unwrap().unwrap();
        assert_eq!(sorted_pairs(&first), vec![("a".to_string(), 1), ("b".to_string(), 2)]);
        assert!(matches!(first, StreamMessage::Data { logical_timestamp_ms: 10, .. }));

        let second = computation.next().await.unwrap().unwrap();
        assert_eq!(sorted_pairs(&second), vec![("a".to_string(), 3)]);
        assert!(matches!(second, StreamMessage::Data { logical_timestamp_ms: 20, .. }));

        assert_eq!(computation.next().await, None);
        assert_eq!(computation.last_logical_ts().await, Some(20));
    }

    #[tokio::test]
    async fn flushes_held_partial_batch_on_early_end_of_channel() {
        let (channel, tx) = test_channel();
        let computation = Computation::new(channel, never_resumes());
        tx.send(ChannelEvent::Message(data(10, &[("a", 1)]))).await.unwrap();
        tx.send(ChannelEvent::Message(StreamMessage::EndOfChannel { timestamp_ms: 11 })).await.unwrap();

        let only = computation.next().await.unwrap().unwrap();
        assert_eq!(sorted_pairs(&only), vec![("a".to_string(), 1)]);
        assert_eq!(computation.next().await, None);
    }

    #[tokio::test]
    async fn resumes_once_with_last_logical_ts_then_surfaces_new_channel_messages() {
        let (channel, tx) = test_channel();
        tx.send(ChannelEvent::Message(data(100, &[("a", 1)]))).await.unwrap();
        tx.send(ChannelEvent::Message(data(200, &[("a", 2)]))).await.unwrap();
        // Simulate an unexpected disconnect: the channel ends with an error,
        // not an EndOfChannel control message.
        tx.send(ChannelEvent::End(Some(TransportError::Closed { code: 1006, reason: "lost connection".into() })))
            .await
            .unwrap();

        let seen_since = Arc::new(Mutex::new(None));
        let seen_since_clone = seen_since.clone();
        let reexecute: ReexecuteFn = Arc::new(move |since| {
            let seen_since = seen_since_clone.clone();
            Box::pin(async move {
                *seen_since.lock().await = Some(since);
                let (tx2, rx2) = mpsc::channel(8);
                let (detach_tx, _detach_rx) = mpsc::unbounded_channel();
                tx2.send(ChannelEvent::Message(StreamMessage::EndOfChannel { timestamp_ms: 1 })).await.unwrap();
                Ok(Channel::new("resumed".to_string(), rx2, detach_tx))
            })
        });
        let computation = Computation::new(channel, reexecute);

        let first = computation.next().await.unwrap().unwrap();
        assert!(matches!(first, StreamMessage::Data { logical_timestamp_ms: 100, .. }));
        // ts 200 is still held as a partial batch when the channel ends; it
        // gets flushed once the resumed channel reaches its own terminal
        // message, after resumption has already fired with since=200.
        let second = computation.next().await.unwrap().unwrap();
        assert!(matches!(second, StreamMessage::Data { logical_timestamp_ms: 200, .. }));

        assert_eq!(computation.next().await, None);
        assert_eq!(*seen_since.lock().await, Some(Some(200)));
    }

    #[tokio::test]
    async fn second_consecutive_disconnect_is_surfaced_as_an_error() {
        let (channel, tx) = test_channel();
        tx.send(ChannelEvent::End(Some(TransportError::Closed { code: 1006, reason: "lost connection".into() })))
            .await
            .unwrap();

        let reexecute: ReexecuteFn = Arc::new(|_since| {
            Box::pin(async move {
                let (tx2, rx2) = mpsc::channel::<ChannelEvent>(1);
                let (detach_tx, _detach_rx) = mpsc::unbounded_channel();
                // The reconnect itself also ends immediately, with another error.
                tx2.send(ChannelEvent::End(Some(TransportError::Closed { code: 1006, reason: "still down".into() })))
                    .await
                    .unwrap();
                Ok(Channel::new("resumed".to_string(), rx2, detach_tx))
            })
        });
        let computation = Computation::new(channel, reexecute);

        let err = computation.next().await.unwrap().unwrap_err();
        match err {
            ComputationError::Transport(TransportError::Closed { reason, .. }) => assert_eq!(reason, "still down"),
            other => panic!("expected Transport(Closed), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn clean_channel_close_completes_without_resume_attempt() {
        let (channel, tx) = test_channel();
        tx.send(ChannelEvent::Message(data(10, &[("a", 1)]))).await.unwrap();
        // A clean close (e.g. websocket code 1000, or an explicit detach)
        // carries no error and must not trigger a resume attempt.
        tx.send(ChannelEvent::End(None)).await.unwrap();

        let computation = Computation::new(channel, never_resumes());

        let only = computation.next().await.unwrap().unwrap();
        assert_eq!(sorted_pairs(&only), vec![("a".to_string(), 1)]);
        assert_eq!(computation.next().await, None);
        assert_eq!(computation.state().await, ComputationState::Completed);
    }
}
