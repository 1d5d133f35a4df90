//! Tailing a run's records to a subscriber.
//!
//! A [`GridStreamer`] follows one run. Each cycle it fetches the records past
//! its cursor, pushes them to a [`Sink`], then checks the run: if the
//! producer has finished or the run failed, it pushes a single
//! [`GridEvent::StreamEnded`] marker and stops. Otherwise a
//! [`StreamDriver`] schedules the next cycle after a write notification or
//! the poll interval.
//!
//! # Example
//!
//! ```ignore
//! let (sink, subscriber) = ChannelSink::pair(SinkConfig::default());
//! let streamer = GridStreamer::follow_latest(store.clone(), store.clone())?;
//! let handle = spawn_stream(streamer, Arc::new(sink), StreamConfig::default())?;
//!
//! loop {
//!     match subscriber.recv() {
//!         Ok(GridEvent::Record { record }) => render(&record),
//!         Ok(GridEvent::StreamEnded { .. }) => break,
//!         Ok(GridEvent::Aborted { message }) => return Err(message),
//!         Err(_) => break,
//!     }
//! }
//! ```

mod cursor;
mod driver;
mod event;
mod grid;
mod sink;

pub use cursor::StreamCursor;
pub use driver::{spawn_stream, StreamConfig, StreamDriver, StreamHandle, StreamOutcome};
pub use event::{EndReason, GridEvent};
pub use grid::{CycleOutcome, GridStreamer, StreamPhase};
pub use sink::{ChannelSink, DisconnectCallback, DisconnectReason, Sink, SinkConfig, Subscriber};
