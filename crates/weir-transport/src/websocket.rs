//! WebSocket channel sink.
//!
//! Delivers each batch as a single JSON text frame on a named channel
//! from the registry, then waits for an acknowledgement frame correlated
//! by batch ID. Every failure mode of a socket — absent channel, closed
//! channel, ack timeout, ack carrying an error — classifies as
//! retryable: the consumer may reattach at any moment.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use weir_core::{Batch, Error};

use crate::channels::WebSocketChannels;
use crate::sink::{SendOutcome, SinkTransport};
use crate::wire::BatchAck;

/// Default time to wait for a batch acknowledgement.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Sink delivering batches over a named WebSocket channel.
pub struct WebSocketSink<DT> {
    channel_name: String,
    registry: Arc<dyn WebSocketChannels>,
    ack_timeout: Duration,
    _marker: PhantomData<fn() -> DT>,
}

impl<DT> WebSocketSink<DT> {
    /// Creates a sink for the named channel.
    #[must_use]
    pub fn new(channel_name: impl Into<String>, registry: Arc<dyn WebSocketChannels>) -> Self {
        Self {
            channel_name: channel_name.into(),
            registry,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            _marker: PhantomData,
        }
    }

    /// Overrides the acknowledgement timeout.
    #[must_use]
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }
}

/// Waits on the ack feed for the ack matching `batch_id`.
///
/// Acks for other batches are skipped; a lagged subscriber keeps
/// reading. Returns `None` when the feed closes.
async fn await_ack(
    mut acks: broadcast::Receiver<BatchAck>,
    batch_id: uuid::Uuid,
) -> Option<BatchAck> {
    loop {
        match acks.recv().await {
            Ok(ack) if ack.batch_id == batch_id => return Some(ack),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "ack feed lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[async_trait]
impl<DT> SinkTransport<DT> for WebSocketSink<DT>
where
    DT: Serialize + Send + Sync,
{
    async fn send(&self, batch: &Batch<DT>) -> SendOutcome {
        let Some(channel) = self.registry.channel(&self.channel_name) else {
            return SendOutcome::Retryable(Error::transport_retryable(format!(
                "websocket channel '{}' is not attached",
                self.channel_name
            )));
        };

        // Subscribe before sending so the ack cannot slip past us.
        let acks = channel.subscribe_acks();

        let frame = match serde_json::to_string(batch) {
            Ok(frame) => frame,
            Err(e) => {
                return SendOutcome::Fatal(Error::transport_fatal(format!(
                    "batch serialisation failed: {e}"
                )))
            }
        };

        if let Err(e) = channel.send_frame(frame).await {
            return SendOutcome::Retryable(e);
        }
        debug!(
            channel = %self.channel_name,
            batch_id = %batch.batch_id,
            events = batch.len(),
            "sent batch frame"
        );

        match tokio::time::timeout(self.ack_timeout, await_ack(acks, batch.batch_id)).await {
            Err(_) => SendOutcome::Retryable(Error::transport_retryable(format!(
                "no ack for batch {} within {:?}",
                batch.batch_id, self.ack_timeout
            ))),
            Ok(None) => SendOutcome::Retryable(Error::transport_retryable(format!(
                "websocket channel '{}' closed awaiting ack",
                self.channel_name
            ))),
            Ok(Some(BatchAck { error: Some(e), .. })) => SendOutcome::Retryable(
                Error::transport_retryable(format!("batch rejected by consumer: {e}")),
            ),
            Ok(Some(_)) => SendOutcome::Delivered,
        }
    }
}
