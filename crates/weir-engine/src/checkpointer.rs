//! Narrow checkpoint capability handed to each live stream.
//!
//! A stream never sees the full persistence gateway: the manager hands
//! it a [`Checkpointer`] scoped to its own stream ID at construction,
//! which also keeps the stream free of any reference back to the
//! manager.

use std::sync::Arc;

use weir_core::{Checkpoint, Error};
use weir_persistence::Persistence;

/// Loads and advances the checkpoint of exactly one stream.
pub struct Checkpointer<CT>
where
    CT: Send + Sync,
{
    persistence: Arc<dyn Persistence<CT>>,
    stream_id: String,
}

impl<CT> Clone for Checkpointer<CT>
where
    CT: Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            persistence: Arc::clone(&self.persistence),
            stream_id: self.stream_id.clone(),
        }
    }
}

impl<CT> Checkpointer<CT>
where
    CT: Send + Sync,
{
    /// Scopes the gateway to one stream.
    pub fn new(persistence: Arc<dyn Persistence<CT>>, stream_id: impl Into<String>) -> Self {
        Self {
            persistence,
            stream_id: stream_id.into(),
        }
    }

    /// Loads the stream's checkpoint, `None` before the first delivery.
    pub async fn load(&self) -> Result<Option<Checkpoint>, Error> {
        self.persistence.checkpoints().get(&self.stream_id).await
    }

    /// Records `sequence_id` as the last successfully delivered position.
    pub async fn advance(&self, sequence_id: &str) -> Result<(), Error> {
        self.persistence
            .checkpoints()
            .upsert(&Checkpoint {
                stream_id: self.stream_id.clone(),
                sequence_id: sequence_id.to_string(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_persistence::MemoryPersistence;

    #[tokio::test]
    async fn test_load_advance_cycle() {
        let persistence: Arc<dyn Persistence<serde_json::Value>> =
            Arc::new(MemoryPersistence::new());
        let checkpointer = Checkpointer::new(Arc::clone(&persistence), "es1");

        assert!(checkpointer.load().await.unwrap().is_none());

        checkpointer.advance("c").await.unwrap();
        assert_eq!(
            checkpointer.load().await.unwrap().unwrap().sequence_id,
            "c"
        );

        checkpointer.advance("d").await.unwrap();
        assert_eq!(
            checkpointer.load().await.unwrap().unwrap().sequence_id,
            "d"
        );
    }

    #[tokio::test]
    async fn test_scoped_to_one_stream() {
        let persistence: Arc<dyn Persistence<serde_json::Value>> =
            Arc::new(MemoryPersistence::new());
        let a = Checkpointer::new(Arc::clone(&persistence), "a");
        let b = Checkpointer::new(Arc::clone(&persistence), "b");

        a.advance("5").await.unwrap();
        assert!(b.load().await.unwrap().is_none());
    }
}
