//! # Weir Core
//!
//! Shared building blocks for the Weir event-stream manager: the persisted
//! and in-memory data model, the product-wide error taxonomy with stable
//! `FF00xxx` codes, the exponential-backoff retry driver, and the contract
//! a pluggable source runtime implements to feed events into a stream.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod error;
pub mod error_codes;
pub mod retry;
pub mod source;
pub mod spec;

pub use error::{Error, ErrorKind};
pub use retry::{RetryDriver, RetryPolicy, RetrySettings};
pub use source::{Deliverer, SourceInstruction, SourceRuntime};
pub use spec::{
    Batch, Checkpoint, Event, EventStreamSpec, EventStreamWithStatus, StreamStatus,
    TransportDescriptor,
};
