//! Integration tests for the per-stream delivery pipeline: batching,
//! retry, cancellation, backpressure, and the poison-pill policies.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{
    checkpoint, eventually, manager_with, spec, Json, MockSink, Planned, ScriptedRuntime,
};
use weir_core::spec::FatalPolicy;
use weir_core::{Checkpoint, StreamStatus};
use weir_persistence::{MemoryPersistence, Persistence};

/// S1: four events against `batchSize=3, batchTimeout=50ms` produce
/// exactly two batches — `[a,b,c]` on size, `[d]` on timeout — and the
/// checkpoint finishes at `d`.
#[tokio::test]
async fn test_size_and_timeout_batching() {
    let persistence = Arc::new(MemoryPersistence::<Json>::new());
    let runtime = ScriptedRuntime::new(&["a", "b", "c", "d"]);
    let sink = MockSink::accepting();
    let manager = manager_with(&persistence, &runtime, &sink).await;

    let mut s1 = spec("s1", Some(3), Some(50));
    manager.upsert_stream(&mut s1).await.unwrap();
    let id = s1.id().to_string();

    eventually(Duration::from_secs(2), || async {
        sink.delivered_batches().len() == 2
    })
    .await;
    assert_eq!(
        sink.delivered_batches(),
        vec![vec!["a", "b", "c"], vec!["d"]]
    );

    eventually(Duration::from_secs(2), || async {
        checkpoint(&persistence, &id).await.as_deref() == Some("d")
    })
    .await;

    manager.close().await;
}

/// The checkpoint lands on the last sequence of the delivered batch.
#[tokio::test]
async fn test_checkpoint_advances_to_batch_end() {
    let persistence = Arc::new(MemoryPersistence::<Json>::new());
    let runtime = ScriptedRuntime::new(&["a", "b", "c"]);
    let sink = MockSink::accepting();
    let manager = manager_with(&persistence, &runtime, &sink).await;

    let mut s = spec("cp", Some(3), Some(50));
    manager.upsert_stream(&mut s).await.unwrap();
    let id = s.id().to_string();

    eventually(Duration::from_secs(2), || async {
        checkpoint(&persistence, &id).await.as_deref() == Some("c")
    })
    .await;
    assert_eq!(sink.delivered_batches(), vec![vec!["a", "b", "c"]]);

    manager.close().await;
}

/// S2: a sink that fails three times then accepts sees the *same* batch
/// `[d,e]` redelivered, and the checkpoint lands at `e`.
#[tokio::test]
async fn test_retryable_sink_redelivers_same_batch() {
    let persistence = Arc::new(MemoryPersistence::<Json>::new());
    persistence
        .checkpoints()
        .upsert(&Checkpoint {
            stream_id: "es-s2".into(),
            sequence_id: "c".into(),
        })
        .await
        .unwrap();

    let runtime = ScriptedRuntime::new(&["a", "b", "c", "d", "e"]);
    let sink = MockSink::with_plan(vec![
        Planned::Retryable,
        Planned::Retryable,
        Planned::Retryable,
    ]);
    let manager = manager_with(&persistence, &runtime, &sink).await;

    let mut s = spec("s2", Some(2), Some(50));
    s.id = Some("es-s2".into());
    manager.upsert_stream(&mut s).await.unwrap();

    eventually(Duration::from_secs(2), || async {
        checkpoint(&persistence, "es-s2").await.as_deref() == Some("e")
    })
    .await;
    assert_eq!(sink.delivered_batches(), vec![vec!["d", "e"]]);
    assert!(sink.attempts() >= 4, "attempts = {}", sink.attempts());
    assert_eq!(runtime.runs(), vec![Some("c".to_string())]);

    manager.close().await;
}

/// S3: stopping a stream while the dispatcher is blocked inside `send`
/// cancels the in-flight call, drains the tasks, and persists `stopped`.
#[tokio::test]
async fn test_stop_cancels_inflight_send() {
    let persistence = Arc::new(MemoryPersistence::<Json>::new());
    let runtime = ScriptedRuntime::new(&["a", "b", "c"]);
    let sink = MockSink::blocking();
    let manager = manager_with(&persistence, &runtime, &sink).await;

    let mut s = spec("s3", Some(3), Some(50));
    manager.upsert_stream(&mut s).await.unwrap();
    let id = s.id().to_string();

    // Wait until the dispatcher is parked inside the sink call.
    eventually(Duration::from_secs(2), || async { sink.attempts() >= 1 }).await;

    manager.stop_stream(&id).await.unwrap();

    let fetched = manager.get_stream(&id).await.unwrap();
    assert_eq!(fetched.status, StreamStatus::Stopped);

    let stored = persistence
        .event_streams()
        .get_by_id(&id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, Some(StreamStatus::Stopped));

    // The blocked send never completed, so nothing was delivered and no
    // checkpoint was written.
    assert!(sink.delivered_batches().is_empty());
    assert_eq!(checkpoint(&persistence, &id).await, None);

    manager.close().await;
}

/// A slow sink propagates all the way back to the source: the bounded
/// queue fills and `deliver` blocks.
#[tokio::test]
async fn test_backpressure_blocks_source() {
    let persistence = Arc::new(MemoryPersistence::<Json>::new());
    let sequences: Vec<String> = (0..20).map(|i| format!("a{i:02}")).collect();
    let refs: Vec<&str> = sequences.iter().map(String::as_str).collect();
    let runtime = ScriptedRuntime::with_chunk(&refs, 1);
    let sink = MockSink::blocking();
    let manager = manager_with(&persistence, &runtime, &sink).await;

    let mut s = spec("slow", Some(2), Some(20));
    manager.upsert_stream(&mut s).await.unwrap();

    // Dispatcher holds one batch (2 events) and the queue holds at most
    // batch_size more, so the source cannot get further than that.
    eventually(Duration::from_secs(2), || async {
        runtime.delivered_chunks.load(Ordering::SeqCst) >= 3
    })
    .await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    let stalled = runtime.delivered_chunks.load(Ordering::SeqCst);
    assert!(stalled <= 5, "source should be blocked, delivered {stalled}");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        runtime.delivered_chunks.load(Ordering::SeqCst),
        stalled,
        "source must make no progress while the sink is wedged"
    );

    manager.close().await;
}

/// `FatalPolicy::Drop` drops the poisoned batch immediately, advances
/// the checkpoint past it, and keeps the stream moving.
#[tokio::test]
async fn test_fatal_drop_policy_advances_checkpoint() {
    let persistence = Arc::new(MemoryPersistence::<Json>::new());
    let runtime = ScriptedRuntime::new(&["a", "b", "c"]);
    let sink = MockSink::with_plan(vec![Planned::Fatal]);
    let manager = manager_with(&persistence, &runtime, &sink).await;

    let mut s = spec("poison", Some(2), Some(50));
    s.fatal_policy = Some(FatalPolicy::Drop);
    manager.upsert_stream(&mut s).await.unwrap();
    let id = s.id().to_string();

    eventually(Duration::from_secs(2), || async {
        checkpoint(&persistence, &id).await.as_deref() == Some("c")
    })
    .await;
    // [a,b] was dropped on the fatal outcome; only [c] got through.
    assert_eq!(sink.delivered_batches(), vec![vec!["c"]]);
    assert_eq!(sink.attempts(), 2);

    manager.close().await;
}

/// The default fatal policy retries a bounded number of times before
/// dropping.
#[tokio::test]
async fn test_fatal_retry_then_drop_is_bounded() {
    let persistence = Arc::new(MemoryPersistence::<Json>::new());
    let runtime = ScriptedRuntime::new(&["a"]);
    let sink = MockSink::with_plan(vec![Planned::Fatal, Planned::Fatal, Planned::Fatal]);
    let manager = manager_with(&persistence, &runtime, &sink).await;

    let mut s = spec("fatal-retry", Some(1), Some(50));
    s.retry.as_mut().unwrap().max_attempts = Some(2);
    manager.upsert_stream(&mut s).await.unwrap();
    let id = s.id().to_string();

    eventually(Duration::from_secs(2), || async {
        checkpoint(&persistence, &id).await.as_deref() == Some("a")
    })
    .await;
    assert_eq!(sink.attempts(), 2, "two attempts, then the batch drops");
    assert!(sink.delivered_batches().is_empty());

    manager.close().await;
}

/// Exhausting `max_attempts` on retryable outcomes takes the same
/// poison-pill path, and delivery resumes with the next batch.
#[tokio::test]
async fn test_retryable_exhaustion_drops_batch() {
    let persistence = Arc::new(MemoryPersistence::<Json>::new());
    let runtime = ScriptedRuntime::with_chunk(&["a", "b"], 1);
    let sink = MockSink::with_plan(vec![
        Planned::Retryable,
        Planned::Retryable,
        Planned::Retryable,
    ]);
    let manager = manager_with(&persistence, &runtime, &sink).await;

    let mut s = spec("exhaust", Some(1), Some(50));
    s.retry.as_mut().unwrap().max_attempts = Some(2);
    manager.upsert_stream(&mut s).await.unwrap();
    let id = s.id().to_string();

    eventually(Duration::from_secs(2), || async {
        checkpoint(&persistence, &id).await.as_deref() == Some("b")
    })
    .await;
    // [a]: two retryable sends, a third refused by the driver, dropped.
    // [b]: plan exhausted, delivered.
    assert_eq!(sink.delivered_batches(), vec![vec!["b"]]);

    manager.close().await;
}

/// A runtime that returns without an exit instruction is restarted from
/// the last persisted position after backoff.
#[tokio::test]
async fn test_abnormal_runtime_exit_restarts_from_checkpoint() {
    let persistence = Arc::new(MemoryPersistence::<Json>::new());
    let runtime = ScriptedRuntime::new(&["x", "y"]);
    runtime.fail_first.store(1, Ordering::SeqCst);
    let sink = MockSink::accepting();
    let manager = manager_with(&persistence, &runtime, &sink).await;

    let mut s = spec("flaky", Some(2), Some(50));
    s.initial_sequence_id = Some("m".into());
    manager.upsert_stream(&mut s).await.unwrap();

    eventually(Duration::from_secs(2), || async {
        sink.delivered_batches() == vec![vec!["x", "y"]]
    })
    .await;

    let runs = runtime.runs();
    assert!(runs.len() >= 2, "expected a restart, got {runs:?}");
    assert!(
        runs.iter().all(|from| from.as_deref() == Some("m")),
        "every run resumes from the initial sequence: {runs:?}"
    );

    manager.close().await;
}
