//! # gridtail
//!
//! Streams the records of a long-running simulation run to a subscriber as
//! they are produced, on top of a passive append-only store, and signals
//! when the run is over.
//!
//! ## Core Concepts
//!
//! - **Runs**: one execution of the producer, with a monotonic status and a
//!   set-once "producer finished" flag
//! - **Records**: append-only producer output, ordered by insertion per run
//! - **Streamers**: per-subscriber cursors that poll past their offset,
//!   push to a sink, and end with a single terminal marker
//! - **Wakes**: write notifications that cut a streamer's idle wait short
//!
//! ## Example
//!
//! ```ignore
//! use gridtail::{ChannelSink, GridStreamer, SinkConfig, Store, StoreConfig, StreamConfig};
//!
//! let store = Arc::new(Store::open_or_create(StoreConfig {
//!     path: "./runs".into(),
//!     ..Default::default()
//! })?);
//!
//! // Producer side
//! let run = store.create_run(None)?;
//! store.append_record(run.id, RecordInput::json(&json!({"x": 1, "y": 2}))?)?;
//! store.mark_producer_finished(run.id)?;
//!
//! // Subscriber side
//! let (sink, subscriber) = ChannelSink::pair(SinkConfig::default());
//! let streamer = GridStreamer::new(run.id, store.clone(), store.clone());
//! let handle = spawn_stream(streamer, Arc::new(sink), StreamConfig::default())?;
//! ```

pub mod error;
pub mod jobs;
pub mod records;
pub mod runs;
pub mod store;
pub mod streamer;
pub mod types;
pub mod wake;

// Re-exports
pub use error::{GridError, Result};
pub use jobs::{ChannelTaskQueue, JobReceipt, JobRequest, JobSubmitter, TaskQueue, WorkRequest};
pub use records::{MemoryRecordStore, RecordIter, RecordLog, RecordStore, RunIndex};
pub use runs::{RunRegistry, RunTable};
pub use store::{Store, StoreConfig, StoreStats};
pub use streamer::{
    spawn_stream, ChannelSink, CycleOutcome, DisconnectCallback, DisconnectReason, EndReason,
    GridEvent, GridStreamer, Sink, SinkConfig, StreamConfig, StreamCursor, StreamDriver,
    StreamHandle, StreamOutcome, StreamPhase, Subscriber,
};
pub use types::*;
pub use wake::{AppendNotifier, WakeHandle, WakeId};
