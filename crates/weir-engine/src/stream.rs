//! Per-stream delivery engine.
//!
//! A live stream owns two tasks linked by a bounded event queue whose
//! capacity equals the batch size, so at most one full batch sits in
//! flight beyond the one being dispatched:
//!
//! - the **producer** drives [`SourceRuntime::run`], restarting it from
//!   the last persisted checkpoint with backoff when it exits without
//!   being told to;
//! - the **dispatcher** assembles batches (size-full or timeout-elapsed,
//!   whichever first), delivers them to the sink, and advances the
//!   checkpoint after every successful delivery.
//!
//! Lifecycle: `Created → Stopped → Starting → Running → Draining →
//! Stopped`, with `Deleted` terminal. A stream is marked `Running` by
//! the deliverer's first `deliver` call of the current run. Suspension
//! flips a watch signal that both tasks select on, which also cancels
//! any in-flight send.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use weir_core::spec::FatalPolicy;
use weir_core::{
    Batch, Deliverer, Error, Event, EventStreamSpec, RetryDriver, RetrySettings, SourceRuntime,
    StreamStatus,
};
use weir_transport::{SendOutcome, SinkTransport};

use crate::checkpointer::Checkpointer;
use crate::config::StreamDefaults;

/// Send attempts per batch for fatal outcomes under
/// [`FatalPolicy::RetryThenDrop`], when the retry policy leaves
/// `max_attempts` unset.
const DEFAULT_FATAL_ATTEMPTS: u32 = 5;

/// Live lifecycle state of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamState {
    /// Registered, never activated.
    Created,
    /// Not delivering.
    Stopped,
    /// Tasks spawned; source loop not yet observed delivering.
    Starting,
    /// Source loop observed delivering.
    Running,
    /// Exit signalled; waiting for both tasks.
    Draining,
    /// Terminal.
    Deleted,
}

/// Resolved per-stream settings: spec fields overlaid on live defaults.
#[derive(Debug, Clone)]
pub(crate) struct StreamSettings {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub retry: RetrySettings,
    pub fatal_policy: FatalPolicy,
}

impl StreamSettings {
    pub(crate) fn resolve<CT>(spec: &EventStreamSpec<CT>, defaults: &StreamDefaults) -> Self {
        Self {
            batch_size: spec.batch_size.unwrap_or(defaults.batch_size).max(1),
            batch_timeout: spec
                .batch_timeout_ms
                .map_or(defaults.batch_timeout, Duration::from_millis),
            retry: spec
                .retry
                .as_ref()
                .map_or_else(|| defaults.retry.clone(), |r| r.resolve(&defaults.retry)),
            fatal_policy: spec.fatal_policy.unwrap_or(defaults.fatal_policy),
        }
    }
}

/// Handles to a stream's running tasks.
struct ActiveTasks {
    exit_tx: watch::Sender<bool>,
    producer: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// One live stream: spec snapshot, lifecycle state, and task handles.
pub(crate) struct EventStream<CT, DT>
where
    CT: Send + Sync,
    DT: Serialize + Send + Sync,
{
    stream_id: String,
    spec: StdMutex<Arc<EventStreamSpec<CT>>>,
    state: Arc<StdMutex<StreamState>>,
    // Serialises lifecycle transitions; held across task joins, so it is
    // an async mutex, unlike the cheap state flag above.
    lifecycle: AsyncMutex<Option<ActiveTasks>>,
    runtime: Arc<dyn SourceRuntime<CT, DT>>,
    sink: Arc<dyn SinkTransport<DT>>,
    checkpointer: Checkpointer<CT>,
    settings: StreamSettings,
    shutdown_timeout: Duration,
}

fn set_state(state: &StdMutex<StreamState>, to: StreamState) {
    *state.lock().unwrap() = to;
}

impl<CT, DT> EventStream<CT, DT>
where
    CT: Clone + Send + Sync + 'static,
    DT: Serialize + Send + Sync + 'static,
{
    pub(crate) fn new(
        spec: EventStreamSpec<CT>,
        settings: StreamSettings,
        runtime: Arc<dyn SourceRuntime<CT, DT>>,
        sink: Arc<dyn SinkTransport<DT>>,
        checkpointer: Checkpointer<CT>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            stream_id: spec.id().to_string(),
            spec: StdMutex::new(Arc::new(spec)),
            state: Arc::new(StdMutex::new(StreamState::Created)),
            lifecycle: AsyncMutex::new(None),
            runtime,
            sink,
            checkpointer,
            settings,
            shutdown_timeout,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.stream_id
    }

    /// Current spec snapshot.
    pub(crate) fn spec(&self) -> Arc<EventStreamSpec<CT>> {
        Arc::clone(&self.spec.lock().unwrap())
    }

    /// Updates the in-memory snapshot after a reset.
    pub(crate) fn set_initial_sequence_id(&self, sequence_id: &str) {
        let mut guard = self.spec.lock().unwrap();
        let mut spec = guard.as_ref().clone();
        spec.initial_sequence_id = Some(sequence_id.to_string());
        *guard = Arc::new(spec);
    }

    /// Updates the snapshot's persisted-status view after a start/stop.
    pub(crate) fn set_status(&self, status: StreamStatus) {
        let mut guard = self.spec.lock().unwrap();
        let mut spec = guard.as_ref().clone();
        spec.status = Some(status);
        *guard = Arc::new(spec);
    }

    /// Live status for enrichment.
    pub(crate) fn status(&self) -> StreamStatus {
        match *self.state.lock().unwrap() {
            StreamState::Created | StreamState::Stopped => StreamStatus::Stopped,
            StreamState::Starting => StreamStatus::Starting,
            StreamState::Running => StreamStatus::Started,
            StreamState::Draining => StreamStatus::Stopping,
            StreamState::Deleted => StreamStatus::Deleted,
        }
    }

    /// Spawns the producer and dispatcher if they are not running.
    pub(crate) async fn ensure_active(&self) -> Result<(), Error> {
        let mut lifecycle = self.lifecycle.lock().await;
        if *self.state.lock().unwrap() == StreamState::Deleted {
            return Err(Error::conflict(format!(
                "event stream '{}' is deleted",
                self.stream_id
            )));
        }
        if lifecycle.is_some() {
            return Ok(());
        }

        let (exit_tx, exit_rx) = watch::channel(false);
        let (queue_tx, queue_rx) = mpsc::channel::<Event<DT>>(self.settings.batch_size);
        set_state(&self.state, StreamState::Starting);

        let producer = tokio::spawn(producer_task(
            self.stream_id.clone(),
            self.spec(),
            Arc::clone(&self.runtime),
            self.checkpointer.clone(),
            Arc::clone(&self.state),
            self.settings.retry.clone(),
            queue_tx,
            exit_rx.clone(),
        ));
        let dispatcher = tokio::spawn(dispatcher_task(
            self.stream_id.clone(),
            Arc::clone(&self.sink),
            self.checkpointer.clone(),
            self.settings.clone(),
            queue_rx,
            exit_rx,
        ));

        *lifecycle = Some(ActiveTasks {
            exit_tx,
            producer,
            dispatcher,
        });
        info!(stream = %self.stream_id, "event stream activated");
        Ok(())
    }

    /// Stops the tasks without touching persisted status.
    ///
    /// Signals exit (which both tasks select on, cancelling any in-flight
    /// send), then waits for them within the shutdown grace period.
    pub(crate) async fn suspend(&self) -> Result<(), Error> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(ActiveTasks {
            exit_tx,
            mut producer,
            mut dispatcher,
        }) = lifecycle.take()
        else {
            return Ok(());
        };

        set_state(&self.state, StreamState::Draining);
        let _ = exit_tx.send(true);

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            let _ = (&mut producer).await;
            let _ = (&mut dispatcher).await;
        })
        .await;

        if drained.is_err() {
            producer.abort();
            dispatcher.abort();
            set_state(&self.state, StreamState::Stopped);
            return Err(Error::timeout(format!(
                "event stream '{}' did not drain within {:?}",
                self.stream_id, self.shutdown_timeout
            )));
        }

        set_state(&self.state, StreamState::Stopped);
        debug!(stream = %self.stream_id, "event stream suspended");
        Ok(())
    }

    /// Suspends and marks the stream terminally deleted.
    pub(crate) async fn delete(&self) -> Result<(), Error> {
        self.suspend().await?;
        set_state(&self.state, StreamState::Deleted);
        Ok(())
    }
}

/// Drives the source runtime, restarting it from the last persisted
/// checkpoint with backoff whenever it exits without instruction.
#[allow(clippy::too_many_arguments)]
async fn producer_task<CT, DT>(
    stream_id: String,
    spec: Arc<EventStreamSpec<CT>>,
    runtime: Arc<dyn SourceRuntime<CT, DT>>,
    checkpointer: Checkpointer<CT>,
    state: Arc<StdMutex<StreamState>>,
    retry: RetrySettings,
    queue_tx: mpsc::Sender<Event<DT>>,
    exit_rx: watch::Receiver<bool>,
) where
    CT: Send + Sync + 'static,
    DT: Send + 'static,
{
    let fallback_delay = retry.max_delay;
    // Restarts and storage retries are bounded only by cancellation.
    let unbounded = RetrySettings {
        max_attempts: None,
        ..retry
    };
    let mut restart = RetryDriver::new(unbounded.clone());
    let mut storage = RetryDriver::new(unbounded);
    let mut exit = exit_rx.clone();

    'outer: loop {
        if *exit.borrow() {
            break;
        }

        // Resume position: checkpoint, else the spec's initial sequence.
        let from_sequence_id = loop {
            match checkpointer.load().await {
                Ok(checkpoint) => {
                    storage.reset();
                    break checkpoint
                        .map(|cp| cp.sequence_id)
                        .or_else(|| spec.initial_sequence_id.clone());
                }
                Err(e) => {
                    warn!(stream = %stream_id, error = %e, "checkpoint load failed, retrying");
                    let delay = storage.next_backoff().unwrap_or(fallback_delay);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        _ = exit.wait_for(|stopping| *stopping) => break 'outer,
                    }
                }
            }
        };

        let state_on_deliver = Arc::clone(&state);
        let deliverer = Deliverer::new(queue_tx.clone(), exit_rx.clone(), move || {
            let mut s = state_on_deliver.lock().unwrap();
            if *s == StreamState::Starting {
                *s = StreamState::Running;
            }
        });

        let result = runtime.run(spec.as_ref(), from_sequence_id, &deliverer).await;
        if *exit.borrow() {
            break;
        }

        // Abnormal exit: the runtime was never told to stop.
        if deliverer.has_delivered() {
            restart.reset();
        }
        match result {
            Ok(()) => warn!(
                stream = %stream_id,
                "source runtime returned without an exit instruction, restarting from checkpoint"
            ),
            Err(e) => warn!(
                stream = %stream_id,
                error = %e,
                "source runtime failed, restarting from checkpoint"
            ),
        }
        set_state(&state, StreamState::Starting);
        let delay = restart.next_backoff().unwrap_or(fallback_delay);
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = exit.wait_for(|stopping| *stopping) => break,
        }
    }
}

/// Assembles batches from the queue and delivers them to the sink,
/// advancing the checkpoint after each batch leaves the pipeline.
async fn dispatcher_task<CT, DT>(
    stream_id: String,
    sink: Arc<dyn SinkTransport<DT>>,
    checkpointer: Checkpointer<CT>,
    settings: StreamSettings,
    mut queue_rx: mpsc::Receiver<Event<DT>>,
    exit_rx: watch::Receiver<bool>,
) where
    CT: Send + Sync + 'static,
    DT: Serialize + Send + Sync + 'static,
{
    let mut exit = exit_rx.clone();
    let mut delivery_retry = RetryDriver::new(settings.retry.clone());
    let fatal_attempts = settings
        .retry
        .max_attempts
        .unwrap_or(DEFAULT_FATAL_ATTEMPTS);
    let storage_settings = RetrySettings {
        max_attempts: None,
        ..settings.retry.clone()
    };

    'main: loop {
        // First event opens the batch and arms the flush timer.
        let first = tokio::select! {
            event = queue_rx.recv() => event,
            _ = exit.wait_for(|stopping| *stopping) => break 'main,
        };
        let Some(first) = first else { break };

        let mut events = Vec::with_capacity(settings.batch_size);
        events.push(first);
        let deadline = tokio::time::Instant::now() + settings.batch_timeout;
        while events.len() < settings.batch_size {
            tokio::select! {
                event = queue_rx.recv() => match event {
                    Some(event) => events.push(event),
                    None => break,
                },
                () = tokio::time::sleep_until(deadline) => break,
                _ = exit.wait_for(|stopping| *stopping) => break 'main,
            }
        }

        let batch = Batch::new(events);
        delivery_retry.reset();

        // Deliver, retrying the same batch. Exit cancels an in-flight
        // send and abandons the batch without advancing the checkpoint.
        let delivered = loop {
            let outcome = tokio::select! {
                outcome = sink.send(&batch) => outcome,
                _ = exit.wait_for(|stopping| *stopping) => break 'main,
            };
            match outcome {
                SendOutcome::Delivered => break true,
                SendOutcome::Retryable(e) => {
                    warn!(
                        stream = %stream_id,
                        batch_id = %batch.batch_id,
                        attempt = delivery_retry.attempt() + 1,
                        error = %e,
                        "batch delivery failed, will retry"
                    );
                    match delivery_retry.next_backoff() {
                        Some(delay) => tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            _ = exit.wait_for(|stopping| *stopping) => break 'main,
                        },
                        None => {
                            error!(
                                stream = %stream_id,
                                batch_id = %batch.batch_id,
                                attempts = delivery_retry.attempt(),
                                "delivery attempts exhausted, dropping batch"
                            );
                            break false;
                        }
                    }
                }
                SendOutcome::Fatal(e) => match settings.fatal_policy {
                    FatalPolicy::Drop => {
                        error!(
                            stream = %stream_id,
                            batch_id = %batch.batch_id,
                            error = %e,
                            "fatal delivery failure, dropping batch"
                        );
                        break false;
                    }
                    FatalPolicy::RetryThenDrop => {
                        if delivery_retry.attempt() + 1 >= fatal_attempts {
                            error!(
                                stream = %stream_id,
                                batch_id = %batch.batch_id,
                                attempts = delivery_retry.attempt() + 1,
                                error = %e,
                                "fatal delivery failure, attempts exhausted, dropping batch"
                            );
                            break false;
                        }
                        warn!(
                            stream = %stream_id,
                            batch_id = %batch.batch_id,
                            attempt = delivery_retry.attempt() + 1,
                            error = %e,
                            "fatal delivery failure, retrying under retry-then-drop policy"
                        );
                        match delivery_retry.next_backoff() {
                            Some(delay) => tokio::select! {
                                () = tokio::time::sleep(delay) => {}
                                _ = exit.wait_for(|stopping| *stopping) => break 'main,
                            },
                            None => break false,
                        }
                    }
                },
            }
        };

        // The checkpoint advances for delivered batches and for dropped
        // poison pills alike, so the stream never wedges behind one batch.
        if let Some(sequence_id) = batch.last_sequence_id() {
            let mut storage = RetryDriver::new(storage_settings.clone());
            loop {
                match checkpointer.advance(sequence_id).await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(
                            stream = %stream_id,
                            error = %e,
                            "checkpoint persist failed, retrying"
                        );
                        let delay = storage.next_backoff().unwrap_or(storage_settings.max_delay);
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            _ = exit.wait_for(|stopping| *stopping) => break 'main,
                        }
                    }
                }
            }
        }

        if delivered {
            debug!(
                stream = %stream_id,
                batch_id = %batch.batch_id,
                events = batch.len(),
                checkpoint = batch.last_sequence_id().unwrap_or_default(),
                "batch delivered"
            );
        }
    }
}
