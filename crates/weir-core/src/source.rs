//! Contract between the stream engine and a pluggable source runtime.
//!
//! The runtime owns everything source-specific: connections, polling,
//! sequence ID semantics. The engine hands it a [`Deliverer`] whose
//! `deliver` call pushes events into the stream's bounded queue —
//! blocking while the queue is full is the entire backpressure story.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::Error;
use crate::spec::{Event, EventStreamSpec};

/// What the runtime should do after a `deliver` call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceInstruction {
    /// Keep detecting and delivering events.
    Continue,
    /// Return from `run` promptly; the stream is stopping.
    Exit,
}

/// A pluggable producer that knows how to talk to one kind of event
/// source.
///
/// `run` must execute in a loop detecting events until instructed to
/// stop:
/// - it must block internally while no events are available, waking on
///   [`Deliverer::cancelled`];
/// - `deliver` blocks while the stream's queue is full — that is the
///   backpressure signal, not an error;
/// - when `deliver` returns [`SourceInstruction::Exit`], `run` must
///   return;
/// - if `run` returns without having been told `Exit`, the engine treats
///   it as an abnormal exit and restarts it from the last persisted
///   checkpoint after the current backoff delay.
#[async_trait]
pub trait SourceRuntime<CT, DT>: Send + Sync + 'static
where
    CT: Send + Sync,
    DT: Send,
{
    /// Generates a new unique resource ID (such as a UUID).
    fn new_id(&self) -> String;

    /// Validates the type-specific stream configuration.
    async fn validate(&self, config: &CT) -> Result<(), Error>;

    /// Detects events from `from_sequence_id` (exclusive) onward and
    /// hands them to `deliverer` in source order, one batch at a time.
    async fn run(
        &self,
        spec: &EventStreamSpec<CT>,
        from_sequence_id: Option<String>,
        deliverer: &Deliverer<DT>,
    ) -> Result<(), Error>;
}

/// Handle the engine gives a running source for delivering events and
/// observing cancellation.
///
/// One deliverer exists per `run` invocation; the engine observes its
/// first `deliver` call to mark the stream as running.
pub struct Deliverer<DT> {
    queue: mpsc::Sender<Event<DT>>,
    exit: watch::Receiver<bool>,
    on_first_deliver: Box<dyn Fn() + Send + Sync>,
    delivered: Arc<AtomicBool>,
}

impl<DT: Send> Deliverer<DT> {
    /// Builds a deliverer over the stream's bounded event queue.
    ///
    /// `exit` flips to `true` when the stream is stopping;
    /// `on_first_deliver` fires once, on the first `deliver` call.
    pub fn new(
        queue: mpsc::Sender<Event<DT>>,
        exit: watch::Receiver<bool>,
        on_first_deliver: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            queue,
            exit,
            on_first_deliver: Box::new(on_first_deliver),
            delivered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Delivers one batch of events in source order.
    ///
    /// Blocks while the stream's queue is full. Returns
    /// [`SourceInstruction::Exit`] when the stream is stopping, in which
    /// case any undelivered remainder of `events` is abandoned (the
    /// checkpoint has not advanced past it, so it is redelivered on
    /// restart).
    pub async fn deliver(&self, events: Vec<Event<DT>>) -> SourceInstruction {
        if *self.exit.borrow() {
            return SourceInstruction::Exit;
        }
        if !self.delivered.swap(true, Ordering::AcqRel) {
            (self.on_first_deliver)();
        }
        let mut exit = self.exit.clone();
        for event in events {
            tokio::select! {
                sent = self.queue.send(event) => {
                    if sent.is_err() {
                        // Dispatcher gone; the stream is shutting down.
                        return SourceInstruction::Exit;
                    }
                }
                _ = exit.wait_for(|stopping| *stopping) => {
                    return SourceInstruction::Exit;
                }
            }
        }
        if *self.exit.borrow() {
            SourceInstruction::Exit
        } else {
            SourceInstruction::Continue
        }
    }

    /// Resolves when the stream is stopping.
    ///
    /// Runtimes must select on this in any blocking wait so cancellation
    /// is honoured promptly.
    pub async fn cancelled(&self) {
        let mut exit = self.exit.clone();
        // An error means the engine dropped the sender, which also means stop.
        let _ = exit.wait_for(|stopping| *stopping).await;
    }

    /// Returns whether the stream is already stopping.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.exit.borrow()
    }

    /// Returns whether any `deliver` call has been made on this handle.
    #[must_use]
    pub fn has_delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn deliverer(
        capacity: usize,
    ) -> (
        Deliverer<u64>,
        mpsc::Receiver<Event<u64>>,
        watch::Sender<bool>,
        Arc<AtomicUsize>,
    ) {
        let (tx, rx) = mpsc::channel(capacity);
        let (exit_tx, exit_rx) = watch::channel(false);
        let first = Arc::new(AtomicUsize::new(0));
        let first_clone = Arc::clone(&first);
        let d = Deliverer::new(tx, exit_rx, move || {
            first_clone.fetch_add(1, Ordering::SeqCst);
        });
        (d, rx, exit_tx, first)
    }

    #[tokio::test]
    async fn test_deliver_continue_and_first_callback_once() {
        let (d, mut rx, _exit, first) = deliverer(4);

        let instruction = d
            .deliver(vec![Event::new("a", 1), Event::new("b", 2)])
            .await;
        assert_eq!(instruction, SourceInstruction::Continue);
        assert_eq!(d.deliver(vec![Event::new("c", 3)]).await, SourceInstruction::Continue);

        assert_eq!(first.load(Ordering::SeqCst), 1, "callback fires once");
        assert_eq!(rx.recv().await.unwrap().sequence_id, "a");
        assert_eq!(rx.recv().await.unwrap().sequence_id, "b");
        assert_eq!(rx.recv().await.unwrap().sequence_id, "c");
    }

    #[tokio::test]
    async fn test_deliver_exit_when_stopping() {
        let (d, _rx, exit, _first) = deliverer(4);
        exit.send(true).unwrap();
        assert_eq!(d.deliver(vec![Event::new("a", 1)]).await, SourceInstruction::Exit);
        assert!(d.is_cancelled());
    }

    #[tokio::test]
    async fn test_deliver_blocks_on_full_queue_until_exit() {
        let (d, _rx, exit, _first) = deliverer(1);

        // First event fills the queue; the second blocks until exit.
        let handle = tokio::spawn(async move {
            d.deliver(vec![Event::new("a", 1), Event::new("b", 2)]).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished(), "deliver must block while the queue is full");

        exit.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), SourceInstruction::Exit);
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_exit() {
        let (d, _rx, exit, _first) = deliverer(1);
        let handle = tokio::spawn(async move {
            d.cancelled().await;
        });
        exit.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_has_delivered_tracks_progress() {
        let (d, mut _rx, _exit, _first) = deliverer(4);
        assert!(!d.has_delivered());
        d.deliver(vec![Event::new("a", 1)]).await;
        assert!(d.has_delivered());
    }
}
