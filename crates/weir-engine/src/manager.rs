//! The event-stream manager: registry of live streams and the single
//! mediator of external mutations.
//!
//! The registry mutex is held only across map lookups and mutations,
//! never across I/O. Each live stream serialises its own lifecycle
//! transitions internally. On construction the manager pages the spec
//! table, purging any `deleted` rows it encounters and materialising
//! everything else, honouring the persisted status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

use weir_core::{
    Error, EventStreamSpec, EventStreamWithStatus, SourceRuntime, StreamStatus,
    TransportDescriptor,
};
use weir_core::error_codes;
use weir_persistence::{Filter, Persistence, UpsertOptimization};
use weir_transport::tls::load_client_material;
use weir_transport::{SinkTransport, WebSocketChannels, WebSocketSink, WebhookSink};

use crate::checkpointer::Checkpointer;
use crate::config::ManagerConfig;
use crate::stream::{EventStream, StreamSettings};
use crate::validate::validate_stream;

/// Page size for the startup scan of the spec table.
const INIT_PAGE_SIZE: u64 = 25;

/// Builds the sink for a transport descriptor.
///
/// The default factory wires WebSocket descriptors to the channel
/// registry and webhook descriptors to an HTTP client; embedders and
/// tests substitute their own transports through
/// [`EventStreamManager::with_sink_factory`].
pub type SinkFactory<DT> =
    Arc<dyn Fn(&TransportDescriptor) -> Result<Arc<dyn SinkTransport<DT>>, Error> + Send + Sync>;

fn default_sink_factory<DT>(
    config: &ManagerConfig,
    channels: Arc<dyn WebSocketChannels>,
) -> SinkFactory<DT>
where
    DT: Serialize + Send + Sync + 'static,
{
    let tls_profiles = config.tls_profiles.clone();
    let ack_timeout = config.ack_timeout;
    let request_timeout = config.webhook_request_timeout;
    Arc::new(move |transport| match transport {
        TransportDescriptor::WebSocket { channel } => {
            let sink = WebSocketSink::new(channel.clone(), Arc::clone(&channels))
                .with_ack_timeout(ack_timeout);
            Ok(Arc::new(sink) as Arc<dyn SinkTransport<DT>>)
        }
        TransportDescriptor::Webhook { url, tls_profile } => {
            let profile = tls_profile
                .as_ref()
                .map(|name| {
                    tls_profiles.get(name).ok_or_else(|| {
                        Error::validation(
                            error_codes::UNKNOWN_TLS_PROFILE,
                            format!("webhook references unknown TLS profile '{name}'"),
                        )
                    })
                })
                .transpose()?;
            let sink = WebhookSink::new(url.clone(), profile, request_timeout)?;
            Ok(Arc::new(sink) as Arc<dyn SinkTransport<DT>>)
        }
    })
}

/// Owns every live stream in the process and mediates all external
/// mutations against them.
pub struct EventStreamManager<CT, DT>
where
    CT: Send + Sync,
    DT: Serialize + Send + Sync,
{
    config: ManagerConfig,
    streams: StdMutex<HashMap<String, Arc<EventStream<CT, DT>>>>,
    persistence: Arc<dyn Persistence<CT>>,
    runtime: Arc<dyn SourceRuntime<CT, DT>>,
    sink_factory: SinkFactory<DT>,
}

impl<CT, DT> EventStreamManager<CT, DT>
where
    CT: Clone + Send + Sync + 'static,
    DT: Serialize + Send + Sync + 'static,
{
    /// Builds a manager with the default transports and materialises all
    /// persisted streams.
    pub async fn new(
        config: ManagerConfig,
        persistence: Arc<dyn Persistence<CT>>,
        channels: Arc<dyn WebSocketChannels>,
        runtime: Arc<dyn SourceRuntime<CT, DT>>,
    ) -> Result<Self, Error> {
        let factory = default_sink_factory(&config, channels);
        Self::with_sink_factory(config, persistence, runtime, factory).await
    }

    /// Builds a manager with a custom sink factory.
    pub async fn with_sink_factory(
        config: ManagerConfig,
        persistence: Arc<dyn Persistence<CT>>,
        runtime: Arc<dyn SourceRuntime<CT, DT>>,
        sink_factory: SinkFactory<DT>,
    ) -> Result<Self, Error> {
        config.validate()?;
        // Parse the TLS profiles up front; the map is read-only from here.
        for (name, profile) in &config.tls_profiles {
            if let Err(e) = load_client_material(profile) {
                error!(profile = %name, error = %e, "invalid TLS profile");
                return Err(e);
            }
        }

        let manager = Self {
            config,
            streams: StdMutex::new(HashMap::new()),
            persistence,
            runtime,
            sink_factory,
        };
        manager.initialize().await?;
        Ok(manager)
    }

    fn add_stream(&self, stream: Arc<EventStream<CT, DT>>) {
        let spec = stream.spec();
        info!(
            stream = %spec.name(),
            id = %stream.id(),
            status = %stream.status(),
            "adding stream"
        );
        self.streams
            .lock()
            .unwrap()
            .insert(stream.id().to_string(), stream);
    }

    fn live_stream(&self, id: &str) -> Option<Arc<EventStream<CT, DT>>> {
        self.streams.lock().unwrap().get(id).cloned()
    }

    fn stream(&self, id: &str) -> Result<Arc<EventStream<CT, DT>>, Error> {
        self.live_stream(id).ok_or_else(|| Error::not_found(id))
    }

    fn remove_stream(&self, id: &str) {
        self.streams.lock().unwrap().remove(id);
    }

    /// A partial spec carrying only an ID and a status.
    fn sparse_status(id: &str, status: StreamStatus) -> EventStreamSpec<CT> {
        EventStreamSpec {
            id: Some(id.to_string()),
            status: Some(status),
            ..EventStreamSpec::default()
        }
    }

    /// Validates a persisted spec and builds its live stream.
    async fn init_stream(
        &self,
        spec: &EventStreamSpec<CT>,
    ) -> Result<Arc<EventStream<CT, DT>>, Error> {
        let mut check = spec.clone();
        validate_stream(&mut check, &self.config, self.runtime.as_ref(), false).await?;
        let transport = spec.transport.as_ref().ok_or_else(|| {
            Error::validation(
                error_codes::INVALID_TRANSPORT,
                "a transport descriptor is required",
            )
        })?;
        let sink = (self.sink_factory)(transport)?;
        let settings = StreamSettings::resolve(spec, &self.config.defaults);
        let checkpointer = Checkpointer::new(Arc::clone(&self.persistence), spec.id());
        Ok(Arc::new(EventStream::new(
            spec.clone(),
            settings,
            Arc::clone(&self.runtime),
            sink,
            checkpointer,
            self.config.shutdown_timeout,
        )))
    }

    /// Pages the spec table, purging deleted rows and materialising the
    /// rest.
    async fn initialize(&self) -> Result<(), Error> {
        let mut skip = 0;
        loop {
            let page = self
                .persistence
                .event_streams()
                .get_many(&Filter::new().skip(skip).limit(INIT_PAGE_SIZE))
                .await?;
            if page.is_empty() {
                break;
            }
            for spec in &page {
                if spec.status == Some(StreamStatus::Deleted) {
                    info!(stream = %spec.id(), "purging deleted stream");
                    self.persistence
                        .checkpoints()
                        .delete_where_stream(spec.id())
                        .await?;
                    self.persistence.event_streams().delete(spec.id()).await?;
                } else {
                    let stream = self.init_stream(spec).await?;
                    self.add_stream(Arc::clone(&stream));
                    if spec.status == Some(StreamStatus::Started) {
                        stream.ensure_active().await?;
                    }
                }
            }
            skip += INIT_PAGE_SIZE;
        }
        Ok(())
    }

    /// Creates or reconfigures a stream; returns whether it was new.
    ///
    /// Assigns a fresh ID when absent and defaults the status to
    /// `started`. Validation deliberately does not write defaults into
    /// the spec, so nil fields pick up new defaults on a restart. Any
    /// pre-existing live stream for the same ID is suspended and rebuilt
    /// once the persisted row is updated.
    pub async fn upsert_stream(&self, spec: &mut EventStreamSpec<CT>) -> Result<bool, Error> {
        let existing = if spec.id().is_empty() {
            spec.id = Some(self.runtime.new_id());
            None
        } else {
            self.live_stream(spec.id())
        };

        // Only statuses that can be asserted externally are started/stopped.
        if spec.status.is_none() {
            spec.status = Some(StreamStatus::Started);
        }
        validate_stream(spec, &self.config, self.runtime.as_ref(), false).await?;

        let is_new = self
            .persistence
            .event_streams()
            .upsert(spec, UpsertOptimization::Existing)
            .await?;
        self.reinit(spec, existing).await?;
        Ok(is_new)
    }

    /// Runtime handling once the persisted row is updated.
    async fn reinit(
        &self,
        spec: &EventStreamSpec<CT>,
        existing: Option<Arc<EventStream<CT, DT>>>,
    ) -> Result<(), Error> {
        if let Some(existing) = existing {
            existing.suspend().await?;
        }
        let stream = self.init_stream(spec).await?;
        self.add_stream(Arc::clone(&stream));
        if spec.status == Some(StreamStatus::Started) {
            stream.ensure_active().await?;
        }
        Ok(())
    }

    /// Fetches one stream, with its live status overlaid.
    pub async fn get_stream(&self, id: &str) -> Result<EventStreamWithStatus<CT>, Error> {
        let spec = self
            .persistence
            .event_streams()
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found(id))?;
        Ok(self.enrich(spec))
    }

    /// Lists streams matching `filter`, with live statuses overlaid.
    pub async fn list_streams(
        &self,
        filter: &Filter,
    ) -> Result<Vec<EventStreamWithStatus<CT>>, Error> {
        let specs = self.persistence.event_streams().get_many(filter).await?;
        Ok(specs.into_iter().map(|spec| self.enrich(spec)).collect())
    }

    fn enrich(&self, spec: EventStreamSpec<CT>) -> EventStreamWithStatus<CT> {
        if let Some(stream) = self.live_stream(spec.id()) {
            return EventStreamWithStatus::new(spec, stream.status());
        }
        // Fall back to unknown status rather than failing.
        error!(stream = %spec.id(), "no in-memory state for stream");
        EventStreamWithStatus::new(spec, StreamStatus::Unknown)
    }

    /// Persists `started` status and activates the stream.
    pub async fn start_stream(&self, id: &str) -> Result<(), Error> {
        let stream = self.stream(id)?;
        self.persistence
            .event_streams()
            .update_sparse(&Self::sparse_status(id, StreamStatus::Started))
            .await?;
        stream.set_status(StreamStatus::Started);
        stream.ensure_active().await
    }

    /// Drains the stream's tasks and persists `stopped` status.
    pub async fn stop_stream(&self, id: &str) -> Result<(), Error> {
        let stream = self.stream(id)?;
        stream.suspend().await?;
        self.persistence
            .event_streams()
            .update_sparse(&Self::sparse_status(id, StreamStatus::Stopped))
            .await?;
        stream.set_status(StreamStatus::Stopped);
        Ok(())
    }

    /// Rewinds a stream to `sequence_id`: suspends it, removes its
    /// checkpoint, persists the new initial sequence, and restarts it if
    /// its persisted status is `started`.
    pub async fn reset_stream(&self, id: &str, sequence_id: &str) -> Result<(), Error> {
        let stream = self.stream(id)?;
        stream.suspend().await?;
        self.persistence
            .checkpoints()
            .delete_where_stream(id)
            .await?;
        stream.set_initial_sequence_id(sequence_id);
        self.persistence
            .event_streams()
            .update_sparse(&EventStreamSpec {
                id: Some(id.to_string()),
                initial_sequence_id: Some(sequence_id.to_string()),
                ..EventStreamSpec::default()
            })
            .await?;
        if stream.spec().status == Some(StreamStatus::Started) {
            return stream.ensure_active().await;
        }
        Ok(())
    }

    /// Permanently removes a stream.
    ///
    /// The stream is fully drained before any row is touched, so a late
    /// checkpoint write cannot race the removal. The `deleted` marker is
    /// persisted before the rows go away; a crash in between is cleaned
    /// up by the startup purge.
    pub async fn delete_stream(&self, id: &str) -> Result<(), Error> {
        let stream = self.stream(id)?;
        stream.delete().await?;
        self.persistence
            .event_streams()
            .update_sparse(&Self::sparse_status(id, StreamStatus::Deleted))
            .await?;
        self.persistence
            .checkpoints()
            .delete_where_stream(id)
            .await?;
        self.persistence.event_streams().delete(id).await?;
        self.remove_stream(id);
        Ok(())
    }

    /// Suspends every live stream concurrently and waits for them all.
    pub async fn close(&self) {
        let streams: Vec<_> = self.streams.lock().unwrap().values().cloned().collect();
        let suspends = streams.iter().map(|stream| async move {
            if let Err(e) = stream.suspend().await {
                warn!(stream = %stream.id(), error = %e, "failed to stop event stream");
            }
        });
        join_all(suspends).await;
    }
}
