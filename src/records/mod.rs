//! Record storage.
//!
//! [`RecordStore`] is the read contract tailed by the streamer. Records are
//! kept in memory by [`MemoryRecordStore`], or on disk in an append-only
//! [`RecordLog`] with a [`RunIndex`] for O(1) access by run position.

mod index;
mod log;
mod memory;
mod reader;

pub use index::RunIndex;
pub use log::{LogIterator, RecordLog};
pub use memory::MemoryRecordStore;
pub use reader::{RecordIter, RecordStore};
