//! WebSocket channel registry contract.
//!
//! The WebSocket server that owns the sockets lives outside this
//! repository; it exposes its connected channels through
//! [`WebSocketChannels`]. The registry is externally synchronised and a
//! channel can attach or detach at any time — an absent channel is a
//! retryable condition for the sink, never an error.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::{broadcast, mpsc};
use weir_core::Error;

use crate::wire::BatchAck;

/// One attached WebSocket channel: an outbound frame queue plus an
/// acknowledgement feed.
#[derive(Clone)]
pub struct WebSocketChannel {
    frames: mpsc::Sender<String>,
    acks: broadcast::Sender<BatchAck>,
}

impl WebSocketChannel {
    /// Wraps the frame queue and ack feed of an attached socket.
    #[must_use]
    pub fn new(frames: mpsc::Sender<String>, acks: broadcast::Sender<BatchAck>) -> Self {
        Self { frames, acks }
    }

    /// Queues one text frame for the socket.
    ///
    /// # Errors
    ///
    /// Returns a retryable transport error when the channel has closed.
    pub async fn send_frame(&self, frame: String) -> Result<(), Error> {
        self.frames
            .send(frame)
            .await
            .map_err(|_| Error::transport_retryable("websocket channel closed"))
    }

    /// Subscribes to the acknowledgement feed.
    ///
    /// Subscribe before sending the frame so the matching ack cannot be
    /// missed.
    #[must_use]
    pub fn subscribe_acks(&self) -> broadcast::Receiver<BatchAck> {
        self.acks.subscribe()
    }
}

/// Registry of attached WebSocket channels, keyed by channel name.
pub trait WebSocketChannels: Send + Sync {
    /// Looks up an attached channel, `None` when absent or detached.
    fn channel(&self, name: &str) -> Option<WebSocketChannel>;
}

/// A process-local channel registry for tests and embedders that host
/// the WebSocket server in the same process.
#[derive(Default)]
pub struct InProcessChannels {
    channels: Mutex<HashMap<String, WebSocketChannel>>,
}

impl InProcessChannels {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a channel and returns the consumer-side handles: the
    /// frame receiver to read deliveries from, and the ack sender to
    /// acknowledge them on.
    pub fn attach(
        &self,
        name: impl Into<String>,
        buffer: usize,
    ) -> (mpsc::Receiver<String>, broadcast::Sender<BatchAck>) {
        let (frame_tx, frame_rx) = mpsc::channel(buffer);
        let (ack_tx, _) = broadcast::channel(buffer);
        self.channels.lock().unwrap().insert(
            name.into(),
            WebSocketChannel::new(frame_tx, ack_tx.clone()),
        );
        (frame_rx, ack_tx)
    }

    /// Detaches a channel; subsequent lookups return `None`.
    pub fn detach(&self, name: &str) {
        self.channels.lock().unwrap().remove(name);
    }
}

impl WebSocketChannels for InProcessChannels {
    fn channel(&self, name: &str) -> Option<WebSocketChannel> {
        self.channels.lock().unwrap().get(name).cloned()
    }
}
