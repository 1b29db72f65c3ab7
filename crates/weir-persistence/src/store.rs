//! Store traits the persistence driver implements.
//!
//! Two entity tables: `event_streams` and `checkpoints`. A stream spec
//! serialises to a row whose typed-config column is stored as JSON;
//! sparse updates touch only the fields that are explicitly set on the
//! partial spec.

use async_trait::async_trait;
use weir_core::{Checkpoint, Error, EventStreamSpec};

use crate::filter::{Filter, UpsertOptimization};

/// CRUD over persisted stream specs.
#[async_trait]
pub trait SpecStore<CT>: Send + Sync
where
    CT: Send + Sync,
{
    /// Fetches one spec by ID, `None` when absent.
    async fn get_by_id(&self, id: &str) -> Result<Option<EventStreamSpec<CT>>, Error>;

    /// Fetches specs matching `filter` under a stable ordering.
    async fn get_many(&self, filter: &Filter) -> Result<Vec<EventStreamSpec<CT>>, Error>;

    /// Inserts or replaces a spec atomically; returns whether the row
    /// was new. The spec's ID must be set.
    async fn upsert(
        &self,
        spec: &EventStreamSpec<CT>,
        optimization: UpsertOptimization,
    ) -> Result<bool, Error>;

    /// Updates only the fields explicitly set on `partial`. The partial
    /// spec's ID selects the row.
    async fn update_sparse(&self, partial: &EventStreamSpec<CT>) -> Result<(), Error>;

    /// Removes a spec row. Removing an absent row is not an error.
    async fn delete(&self, id: &str) -> Result<(), Error>;
}

/// CRUD over persisted checkpoints, keyed by stream ID.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Fetches the checkpoint for a stream, `None` when none exists.
    async fn get(&self, stream_id: &str) -> Result<Option<Checkpoint>, Error>;

    /// Inserts or replaces the checkpoint for a stream.
    async fn upsert(&self, checkpoint: &Checkpoint) -> Result<(), Error>;

    /// Removes every checkpoint row belonging to a stream.
    async fn delete_where_stream(&self, stream_id: &str) -> Result<(), Error>;
}

/// The full persistence gateway handed to the manager.
pub trait Persistence<CT>: Send + Sync
where
    CT: Send + Sync,
{
    /// The `event_streams` table.
    fn event_streams(&self) -> &dyn SpecStore<CT>;

    /// The `checkpoints` table.
    fn checkpoints(&self) -> &dyn CheckpointStore;
}
