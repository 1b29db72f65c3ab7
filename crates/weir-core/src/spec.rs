//! Persisted and in-memory data model for event streams.
//!
//! [`EventStreamSpec`] is the persisted definition of a stream. All
//! policy fields are optional: absent values are resolved against live
//! defaults at activation time and are never written back, so a change
//! to the defaults applies to every stream that did not pin the value.
//!
//! [`Event`] and [`Batch`] are the in-memory shapes flowing from the
//! source runtime through the dispatcher to a sink transport. A batch
//! serialises directly to the sink wire format:
//! `{"batchId": <uuid>, "events": [...]}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retry::RetryPolicy;

/// Lifecycle status of an event stream.
///
/// Only `Started` and `Stopped` can be asserted externally; the remaining
/// variants are reported by status enrichment or persisted transiently
/// during deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// The stream should be (or is) actively delivering.
    Started,
    /// The stream is establishing its source loop.
    Starting,
    /// The stream is draining its tasks.
    Stopping,
    /// The stream is not delivering.
    Stopped,
    /// The stream is marked for removal.
    Deleted,
    /// No live state is available for this stream.
    Unknown,
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Starting => "starting",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Deleted => "deleted",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Where a stream delivers its batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum TransportDescriptor {
    /// Deliver over a named WebSocket channel from the channel registry.
    #[serde(rename = "websocket")]
    WebSocket {
        /// Name of the channel in the registry.
        channel: String,
    },
    /// POST each batch to an HTTP endpoint.
    #[serde(rename = "webhook")]
    Webhook {
        /// Destination URL.
        url: String,
        /// Optional named client-TLS profile.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tls_profile: Option<String>,
    },
}

/// What the dispatcher does with a batch the sink classified as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FatalPolicy {
    /// Drop the batch immediately, log, and advance the checkpoint.
    Drop,
    /// Treat as retryable for a bounded number of attempts, then drop.
    #[default]
    RetryThenDrop,
}

/// Persisted definition of one event stream.
///
/// The `config` blob is opaque to the manager; the source runtime
/// validates it and it must serialise losslessly to the persistence
/// layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(deserialize = "CT: serde::de::DeserializeOwned"))]
pub struct EventStreamSpec<CT> {
    /// Opaque ID assigned on creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Human name, unique per namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Persisted lifecycle status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StreamStatus>,
    /// Type-parameterised configuration, validated by the source runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<CT>,
    /// Sink transport descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportDescriptor>,
    /// Maximum events per batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Maximum milliseconds an open batch waits before flushing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_timeout_ms: Option<u64>,
    /// Delivery retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Handling of batches the sink classifies as fatal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_policy: Option<FatalPolicy>,
    /// Sequence ID delivery starts from when no checkpoint exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_sequence_id: Option<String>,
}

impl<CT> Default for EventStreamSpec<CT> {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            status: None,
            config: None,
            transport: None,
            batch_size: None,
            batch_timeout_ms: None,
            retry: None,
            fatal_policy: None,
            initial_sequence_id: None,
        }
    }
}

impl<CT> EventStreamSpec<CT> {
    /// Returns the assigned ID, or the empty string before assignment.
    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    /// Returns the stream name, or the empty string when unset.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// A stream spec enriched with its live status.
///
/// The persisted status field inside the spec is cleared so the overlaid
/// status is the only `status` key in the serialised form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStreamWithStatus<CT> {
    /// The persisted spec (status field cleared).
    #[serde(flatten)]
    pub spec: EventStreamSpec<CT>,
    /// The live status overlay.
    pub status: StreamStatus,
}

impl<CT> EventStreamWithStatus<CT> {
    /// Overlays `status` onto `spec`.
    pub fn new(mut spec: EventStreamSpec<CT>, status: StreamStatus) -> Self {
        spec.status = None;
        Self { spec, status }
    }
}

/// Last successfully delivered position of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// The stream this checkpoint belongs to.
    pub stream_id: String,
    /// Sequence ID of the last successfully delivered event.
    pub sequence_id: String,
}

/// One event produced by the source runtime.
///
/// Sequence IDs are opaque strings, monotone per stream as defined by the
/// source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event<DT> {
    /// Source-assigned position of this event.
    pub sequence_id: String,
    /// Typed payload.
    pub data: DT,
}

impl<DT> Event<DT> {
    /// Builds an event.
    pub fn new(sequence_id: impl Into<String>, data: DT) -> Self {
        Self {
            sequence_id: sequence_id.into(),
            data,
        }
    }
}

/// An ordered group of events dispatched to a sink as a unit.
///
/// Serialises to the wire envelope `{"batchId": ..., "events": [...]}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch<DT> {
    /// Correlation ID, matched by sink acknowledgements.
    pub batch_id: Uuid,
    /// Events in source order.
    pub events: Vec<Event<DT>>,
}

impl<DT> Batch<DT> {
    /// Builds a batch with a fresh correlation ID.
    #[must_use]
    pub fn new(events: Vec<Event<DT>>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            events,
        }
    }

    /// Sequence ID of the final event, `None` for an empty batch.
    #[must_use]
    pub fn last_sequence_id(&self) -> Option<&str> {
        self.events.last().map(|e| e.sequence_id.as_str())
    }

    /// Number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the batch holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_round_trip_camel_case() {
        let spec = EventStreamSpec::<serde_json::Value> {
            id: Some("es1".into()),
            name: Some("orders".into()),
            status: Some(StreamStatus::Started),
            transport: Some(TransportDescriptor::Webhook {
                url: "https://example.com/hook".into(),
                tls_profile: Some("internal".into()),
            }),
            batch_size: Some(10),
            batch_timeout_ms: Some(50),
            initial_sequence_id: Some("0".into()),
            ..EventStreamSpec::default()
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["batchSize"], 10);
        assert_eq!(json["batchTimeoutMs"], 50);
        assert_eq!(json["initialSequenceId"], "0");
        assert_eq!(json["transport"]["type"], "webhook");
        assert_eq!(json["transport"]["tlsProfile"], "internal");
        assert_eq!(json["status"], "started");

        let back: EventStreamSpec<serde_json::Value> = serde_json::from_value(json).unwrap();
        assert_eq!(back.id(), "es1");
        assert_eq!(back.batch_size, Some(10));
    }

    #[test]
    fn test_spec_sparse_serialization_omits_absent_fields() {
        let spec = EventStreamSpec::<serde_json::Value> {
            id: Some("es1".into()),
            initial_sequence_id: Some("z".into()),
            ..EventStreamSpec::default()
        };
        let json = serde_json::to_value(&spec).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2, "only explicitly set fields serialise: {obj:?}");
    }

    #[test]
    fn test_websocket_transport_tagging() {
        let t = TransportDescriptor::WebSocket {
            channel: "ch1".into(),
        };
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["type"], "websocket");
        assert_eq!(json["channel"], "ch1");
    }

    #[test]
    fn test_batch_wire_shape() {
        let batch = Batch::new(vec![
            Event::new("a", serde_json::json!({"n": 1})),
            Event::new("b", serde_json::json!({"n": 2})),
        ]);
        let json = serde_json::to_value(&batch).unwrap();
        assert!(json["batchId"].is_string());
        assert_eq!(json["events"].as_array().unwrap().len(), 2);
        assert_eq!(json["events"][0]["sequenceId"], "a");
        assert_eq!(batch.last_sequence_id(), Some("b"));
    }

    #[test]
    fn test_status_overlay_replaces_persisted_status() {
        let spec = EventStreamSpec::<serde_json::Value> {
            id: Some("es1".into()),
            status: Some(StreamStatus::Started),
            ..EventStreamSpec::default()
        };
        let with_status = EventStreamWithStatus::new(spec, StreamStatus::Starting);
        let json = serde_json::to_value(&with_status).unwrap();
        assert_eq!(json["status"], "starting");
    }

    #[test]
    fn test_fatal_policy_default() {
        assert_eq!(FatalPolicy::default(), FatalPolicy::RetryThenDrop);
    }
}
