//! # Weir Transport
//!
//! Sink transports for event-stream batches. A transport delivers one
//! batch and reports a classification — delivered, retryable, or fatal —
//! and nothing else: retry scheduling belongs to the stream engine.
//!
//! Two concrete sinks ship here: delivery over a named WebSocket channel
//! looked up in an externally owned channel registry, and delivery by
//! HTTP POST to a webhook endpoint with optional client TLS.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod channels;
pub mod sink;
pub mod tls;
pub mod webhook;
pub mod websocket;
pub mod wire;

pub use channels::{InProcessChannels, WebSocketChannel, WebSocketChannels};
pub use sink::{SendOutcome, SinkTransport};
pub use tls::{ServerTlsConfig, TlsProfileConfig};
pub use webhook::WebhookSink;
pub use websocket::WebSocketSink;
pub use wire::BatchAck;
