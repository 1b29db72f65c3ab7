//! Shared test doubles: a scripted source runtime and a programmable
//! sink.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use weir_core::{
    Batch, Deliverer, Error, Event, EventStreamSpec, RetryPolicy, SourceInstruction,
    SourceRuntime, TransportDescriptor,
};
use weir_engine::{EventStreamManager, ManagerConfig, StreamDefaults};
use weir_core::RetrySettings;
use weir_persistence::{MemoryPersistence, Persistence};
use weir_transport::{SendOutcome, SinkTransport};

pub type Json = serde_json::Value;

/// Replays a scripted sequence of events from the requested resume
/// position, then blocks until the stream is cancelled. A positive
/// `fail_first` makes that many `run` calls return immediately without
/// an exit instruction (an abnormal exit).
pub struct ScriptedRuntime {
    script: Vec<(String, Json)>,
    chunk: usize,
    pub fail_first: AtomicUsize,
    pub delivered_chunks: AtomicUsize,
    runs: Mutex<Vec<Option<String>>>,
    ids: AtomicUsize,
}

impl ScriptedRuntime {
    pub fn new(sequences: &[&str]) -> Arc<Self> {
        Self::with_chunk(sequences, 0)
    }

    /// `chunk` = events per deliver call; 0 delivers the whole script in
    /// one call.
    pub fn with_chunk(sequences: &[&str], chunk: usize) -> Arc<Self> {
        let script = sequences
            .iter()
            .enumerate()
            .map(|(i, seq)| ((*seq).to_string(), serde_json::json!({ "n": i })))
            .collect();
        Arc::new(Self {
            script,
            chunk,
            fail_first: AtomicUsize::new(0),
            delivered_chunks: AtomicUsize::new(0),
            runs: Mutex::new(Vec::new()),
            ids: AtomicUsize::new(0),
        })
    }

    /// The `from_sequence_id` each `run` invocation received.
    pub fn runs(&self) -> Vec<Option<String>> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceRuntime<Json, Json> for ScriptedRuntime {
    fn new_id(&self) -> String {
        format!("es-{}", self.ids.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn validate(&self, _config: &Json) -> Result<(), Error> {
        Ok(())
    }

    async fn run(
        &self,
        _spec: &EventStreamSpec<Json>,
        from_sequence_id: Option<String>,
        deliverer: &Deliverer<Json>,
    ) -> Result<(), Error> {
        self.runs.lock().unwrap().push(from_sequence_id.clone());

        if self.fail_first.load(Ordering::SeqCst) > 0 {
            self.fail_first.fetch_sub(1, Ordering::SeqCst);
            return Ok(()); // abnormal: no exit instruction was given
        }

        let events: Vec<Event<Json>> = self
            .script
            .iter()
            .filter(|(seq, _)| {
                from_sequence_id
                    .as_deref()
                    .is_none_or(|from| seq.as_str() > from)
            })
            .map(|(seq, data)| Event::new(seq.clone(), data.clone()))
            .collect();

        let chunk = if self.chunk == 0 {
            events.len().max(1)
        } else {
            self.chunk
        };
        for chunk_events in events.chunks(chunk) {
            if deliverer.deliver(chunk_events.to_vec()).await == SourceInstruction::Exit {
                return Ok(());
            }
            self.delivered_chunks.fetch_add(1, Ordering::SeqCst);
        }

        deliverer.cancelled().await;
        Ok(())
    }
}

/// What the mock sink should answer for one send attempt.
#[derive(Debug, Clone, Copy)]
pub enum Planned {
    Deliver,
    Retryable,
    Fatal,
}

/// A sink whose responses follow a plan; once the plan is exhausted
/// every batch is accepted. `blocking` makes every send hang until the
/// engine cancels it.
pub struct MockSink {
    plan: Mutex<VecDeque<Planned>>,
    delivered: Mutex<Vec<Vec<String>>>,
    attempts: AtomicUsize,
    blocking: bool,
}

impl MockSink {
    pub fn accepting() -> Arc<Self> {
        Self::with_plan(vec![])
    }

    pub fn with_plan(plan: Vec<Planned>) -> Arc<Self> {
        Arc::new(Self {
            plan: Mutex::new(plan.into()),
            delivered: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            blocking: false,
        })
    }

    pub fn blocking() -> Arc<Self> {
        Arc::new(Self {
            plan: Mutex::new(VecDeque::new()),
            delivered: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            blocking: true,
        })
    }

    /// Sequence IDs of each delivered batch, in delivery order.
    pub fn delivered_batches(&self) -> Vec<Vec<String>> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SinkTransport<Json> for MockSink {
    async fn send(&self, batch: &Batch<Json>) -> SendOutcome {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.blocking {
            std::future::pending::<()>().await;
        }
        let planned = self
            .plan
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Planned::Deliver);
        match planned {
            Planned::Deliver => {
                self.delivered.lock().unwrap().push(
                    batch
                        .events
                        .iter()
                        .map(|e| e.sequence_id.clone())
                        .collect(),
                );
                SendOutcome::Delivered
            }
            Planned::Retryable => {
                SendOutcome::Retryable(Error::transport_retryable("scripted transient failure"))
            }
            Planned::Fatal => {
                SendOutcome::Fatal(Error::transport_fatal("scripted permanent failure"))
            }
        }
    }
}

/// Manager config with fast retries and a short drain grace, so failure
/// paths complete inside test timeouts.
pub fn fast_config() -> ManagerConfig {
    ManagerConfig {
        defaults: StreamDefaults {
            retry: RetrySettings {
                initial_delay: Duration::from_millis(10),
                factor: 2.0,
                max_delay: Duration::from_millis(50),
                max_attempts: None,
            },
            ..StreamDefaults::default()
        },
        shutdown_timeout: Duration::from_secs(2),
        ..ManagerConfig::default()
    }
}

/// A websocket-transport spec with a fast per-stream retry policy.
pub fn spec(
    name: &str,
    batch_size: Option<usize>,
    batch_timeout_ms: Option<u64>,
) -> EventStreamSpec<Json> {
    EventStreamSpec {
        name: Some(name.to_string()),
        transport: Some(TransportDescriptor::WebSocket {
            channel: "test".into(),
        }),
        batch_size,
        batch_timeout_ms,
        retry: Some(RetryPolicy {
            initial_delay_ms: Some(10),
            factor: Some(2.0),
            max_delay_ms: Some(50),
            max_attempts: None,
        }),
        ..EventStreamSpec::default()
    }
}

/// Builds a manager whose sinks all resolve to `sink`.
pub async fn manager_with(
    persistence: &Arc<MemoryPersistence<Json>>,
    runtime: &Arc<ScriptedRuntime>,
    sink: &Arc<MockSink>,
) -> EventStreamManager<Json, Json> {
    let sink = Arc::clone(sink);
    EventStreamManager::with_sink_factory(
        fast_config(),
        Arc::clone(persistence) as Arc<dyn Persistence<Json>>,
        Arc::clone(runtime) as Arc<dyn SourceRuntime<Json, Json>>,
        Arc::new(move |_| Ok(Arc::clone(&sink) as Arc<dyn SinkTransport<Json>>)),
    )
    .await
    .unwrap()
}

/// Current checkpoint sequence of a stream, if any.
pub async fn checkpoint(persistence: &MemoryPersistence<Json>, id: &str) -> Option<String> {
    persistence
        .checkpoints()
        .get(id)
        .await
        .unwrap()
        .map(|cp| cp.sequence_id)
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
