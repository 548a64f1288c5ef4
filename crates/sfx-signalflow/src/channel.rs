use rand::Rng;
use tokio::sync::{mpsc, Mutex};

use sfx_protocol::StreamMessage;

use crate::error::TransportError;

const CHANNEL_NAME_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CHANNEL_NAME_LENGTH: usize = 8;

/// Generate a random 8-character channel name.
pub fn random_channel_name() -> String {
    let mut rng = rand::thread_rng();
    (0..CHANNEL_NAME_LENGTH)
        .map(|_| CHANNEL_NAME_ALPHABET[rng.gen_range(0..CHANNEL_NAME_ALPHABET.len())] as char)
        .collect()
}

/// A message pushed into a channel's queue by the owning transport's
/// dispatcher. `End` is the sentinel delivered on detach, end-of-channel, or
/// a connection close; it carries the error that caused it, or `None` for a
/// clean close (code 1000), an explicit detach, or an explicit
/// `EndOfChannel`/`ChannelAbort` control message.
pub(crate) enum ChannelEvent {
    Message(StreamMessage),
    End(Option<TransportError>),
}

/// Request sent back to the owning transport to remove a channel from its
/// routing table and (for the WebSocket transport) send a `detach` frame.
///
/// This is a weak back-reference realized as a channel handle rather than a
/// literal `Weak<T>` so detaching never has to re-enter the transport's own
/// connection mutex from inside `Channel::close`.
pub(crate) struct DetachRequest(pub String);

/// A transport-agnostic source of one computation's messages.
///
/// Backed by a bounded queue fed by the owning transport's dispatcher
/// (the multiplexed WebSocket reader task, or the SSE event stream pump).
/// `next()` blocks until a message arrives or the channel is closed.
pub struct Channel {
    name: String,
    rx: Mutex<mpsc::Receiver<ChannelEvent>>,
    detach_tx: mpsc::UnboundedSender<DetachRequest>,
    close_error: Mutex<Option<TransportError>>,
}

impl Channel {
    pub(crate) fn new(
        name: String,
        rx: mpsc::Receiver<ChannelEvent>,
        detach_tx: mpsc::UnboundedSender<DetachRequest>,
    ) -> Self {
        Channel { name, rx: Mutex::new(rx), detach_tx, close_error: Mutex::new(None) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next message. Returns `None` once the channel has been
    /// closed (detached, ended, or the connection was lost). If the close
    /// was caused by a transport error, it's recorded and retrievable via
    /// [`Channel::close_error`].
    pub async fn next(&self) -> Option<StreamMessage> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                Some(ChannelEvent::Message(msg)) => return Some(msg),
                Some(ChannelEvent::End(err)) => {
                    if err.is_some() {
                        *self.close_error.lock().await = err;
                    }
                    return None;
                }
                None => return None,
            }
        }
    }

    /// The transport error that caused this channel to end, if any.
    ///
    /// `None` after a clean close (code 1000), an explicit `detach`, or an
    /// explicit `EndOfChannel`/`ChannelAbort` control message — those are
    /// surfaced to the caller as ordinary messages instead. Populated only
    /// once [`Channel::next`] has returned `None`.
    pub async fn close_error(&self) -> Option<TransportError> {
        self.close_error.lock().await.clone()
    }

    /// Detach this channel: removes it from the transport's routing table
    /// and sends the `detach` control frame (WebSocket) or closes the
    /// underlying stream (SSE).
    pub fn close(&self) {
        let _ = self.detach_tx.send(DetachRequest(self.name.clone()));
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}
