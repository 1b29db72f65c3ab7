//! The sink transport contract.

use async_trait::async_trait;
use serde::Serialize;
use weir_core::{Batch, Error};

/// Classification of one delivery attempt.
///
/// Transports classify; they never retry. The stream engine owns the
/// retry schedule and the poison-pill policy for fatal outcomes.
#[derive(Debug)]
pub enum SendOutcome {
    /// The sink acknowledged the batch.
    Delivered,
    /// Transient failure; the same batch should be retried after backoff.
    Retryable(Error),
    /// Permanent failure; retrying the same batch cannot succeed.
    Fatal(Error),
}

impl SendOutcome {
    /// Returns whether this outcome is [`SendOutcome::Delivered`].
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Delivers batches to one destination.
#[async_trait]
pub trait SinkTransport<DT>: Send + Sync
where
    DT: Serialize + Send + Sync,
{
    /// Attempts to deliver one batch.
    ///
    /// Implementations must bound each attempt with their own timeout
    /// and must abort promptly when the returned future is dropped (the
    /// engine drops in-flight sends on stream cancellation).
    async fn send(&self, batch: &Batch<DT>) -> SendOutcome;
}
