//! Wire formats shared by the sink transports.
//!
//! A batch serialises to a single JSON object
//! `{"batchId": <uuid>, "events": [...]}` — the same body is sent as one
//! WebSocket text frame or as one HTTP POST. WebSocket deliveries are
//! acknowledged with a [`BatchAck`] frame correlated by batch ID.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Acknowledgement frame sent back by a WebSocket channel consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAck {
    /// The batch being acknowledged.
    pub batch_id: Uuid,
    /// Set when the consumer failed to process the batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchAck {
    /// A successful acknowledgement.
    #[must_use]
    pub fn ok(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            error: None,
        }
    }

    /// A failed acknowledgement.
    #[must_use]
    pub fn failed(batch_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            batch_id,
            error: Some(error.into()),
        }
    }
}
