//! # Weir Engine
//!
//! The per-stream delivery engine and the manager that owns it.
//!
//! Each live stream runs two cooperating tasks linked by a bounded
//! queue: a producer driving the pluggable source runtime, and a
//! dispatcher batching events and delivering them to the sink transport
//! with checkpointed at-least-once semantics. The manager is the
//! registry of live streams and the only component mediating external
//! mutations — create, reconfigure, start, stop, reset, delete — while
//! the process is running.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod checkpointer;
pub mod config;
pub mod manager;
pub(crate) mod stream;
pub mod validate;

pub use checkpointer::Checkpointer;
pub use config::{ManagerConfig, StreamDefaults};
pub use manager::{EventStreamManager, SinkFactory};
