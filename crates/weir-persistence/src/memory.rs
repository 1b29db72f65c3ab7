//! In-memory reference implementation of the persistence gateway.
//!
//! Tables are `BTreeMap`s keyed by ID, which gives the stable pagination
//! ordering the contract requires. Suitable for tests and embedders that
//! do not need durability; a SQL driver supplies the durable variant.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use weir_core::error_codes;
use weir_core::{Checkpoint, Error, EventStreamSpec};

use crate::filter::{Filter, UpsertOptimization};
use crate::store::{CheckpointStore, Persistence, SpecStore};

/// In-memory persistence over `BTreeMap` tables.
pub struct MemoryPersistence<CT> {
    specs: Mutex<BTreeMap<String, EventStreamSpec<CT>>>,
    checkpoints: Mutex<BTreeMap<String, Checkpoint>>,
}

impl<CT> Default for MemoryPersistence<CT> {
    fn default() -> Self {
        Self {
            specs: Mutex::new(BTreeMap::new()),
            checkpoints: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<CT> MemoryPersistence<CT> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Matches one spec against the filter's equality conditions.
fn matches<CT>(spec: &EventStreamSpec<CT>, filter: &Filter) -> Result<bool, Error> {
    for (field, value) in filter.conditions() {
        let actual = match field.as_str() {
            "id" => Some(spec.id().to_string()),
            "name" => Some(spec.name().to_string()),
            "status" => spec.status.map(|s| s.to_string()),
            other => {
                return Err(Error::storage(format!(
                    "unsupported filter field '{other}'"
                )))
            }
        };
        if actual.as_deref() != Some(value.as_str()) {
            return Ok(false);
        }
    }
    Ok(true)
}

#[async_trait]
impl<CT> SpecStore<CT> for MemoryPersistence<CT>
where
    CT: Clone + Send + Sync + 'static,
{
    async fn get_by_id(&self, id: &str) -> Result<Option<EventStreamSpec<CT>>, Error> {
        Ok(self.specs.lock().unwrap().get(id).cloned())
    }

    async fn get_many(&self, filter: &Filter) -> Result<Vec<EventStreamSpec<CT>>, Error> {
        let specs = self.specs.lock().unwrap();
        let mut out = Vec::new();
        let mut skipped = 0u64;
        for spec in specs.values() {
            if !matches(spec, filter)? {
                continue;
            }
            if skipped < filter.skip_or_zero() {
                skipped += 1;
                continue;
            }
            out.push(spec.clone());
            if filter
                .limit_opt()
                .is_some_and(|limit| out.len() as u64 >= limit)
            {
                break;
            }
        }
        Ok(out)
    }

    async fn upsert(
        &self,
        spec: &EventStreamSpec<CT>,
        _optimization: UpsertOptimization,
    ) -> Result<bool, Error> {
        if spec.id().is_empty() {
            return Err(Error::validation(
                error_codes::CONFIG_INVALID,
                "cannot upsert a spec without an ID",
            ));
        }
        let mut specs = self.specs.lock().unwrap();
        let is_new = specs.insert(spec.id().to_string(), spec.clone()).is_none();
        Ok(is_new)
    }

    async fn update_sparse(&self, partial: &EventStreamSpec<CT>) -> Result<(), Error> {
        let mut specs = self.specs.lock().unwrap();
        let Some(existing) = specs.get_mut(partial.id()) else {
            return Err(Error::not_found(partial.id()));
        };
        if let Some(name) = &partial.name {
            existing.name = Some(name.clone());
        }
        if let Some(status) = partial.status {
            existing.status = Some(status);
        }
        if let Some(config) = &partial.config {
            existing.config = Some(config.clone());
        }
        if let Some(transport) = &partial.transport {
            existing.transport = Some(transport.clone());
        }
        if let Some(batch_size) = partial.batch_size {
            existing.batch_size = Some(batch_size);
        }
        if let Some(batch_timeout_ms) = partial.batch_timeout_ms {
            existing.batch_timeout_ms = Some(batch_timeout_ms);
        }
        if let Some(retry) = &partial.retry {
            existing.retry = Some(retry.clone());
        }
        if let Some(fatal_policy) = partial.fatal_policy {
            existing.fatal_policy = Some(fatal_policy);
        }
        if let Some(initial_sequence_id) = &partial.initial_sequence_id {
            existing.initial_sequence_id = Some(initial_sequence_id.clone());
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), Error> {
        self.specs.lock().unwrap().remove(id);
        Ok(())
    }
}

#[async_trait]
impl<CT> CheckpointStore for MemoryPersistence<CT>
where
    CT: Clone + Send + Sync + 'static,
{
    async fn get(&self, stream_id: &str) -> Result<Option<Checkpoint>, Error> {
        Ok(self.checkpoints.lock().unwrap().get(stream_id).cloned())
    }

    async fn upsert(&self, checkpoint: &Checkpoint) -> Result<(), Error> {
        self.checkpoints
            .lock()
            .unwrap()
            .insert(checkpoint.stream_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn delete_where_stream(&self, stream_id: &str) -> Result<(), Error> {
        self.checkpoints.lock().unwrap().remove(stream_id);
        Ok(())
    }
}

impl<CT> Persistence<CT> for MemoryPersistence<CT>
where
    CT: Clone + Send + Sync + 'static,
{
    fn event_streams(&self) -> &dyn SpecStore<CT> {
        self
    }

    fn checkpoints(&self) -> &dyn CheckpointStore {
        self
    }
}
