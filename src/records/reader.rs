//! The read contract the streamer tails.

use crate::error::Result;
use crate::types::{Record, RunId};
use crate::wake::WakeHandle;

/// Lazy, finite sequence of records produced by one fetch.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

/// Append-only, insertion-ordered record collection keyed by run.
///
/// Implementors must never delete or reorder the records of a run: the
/// offset passed to [`fetch_after`](RecordStore::fetch_after) is a count of
/// records to skip, and is only meaningful while that holds.
///
/// Reads may run concurrently with appends. A fetch sees the records that
/// existed when it was issued; later appends show up on the next fetch.
pub trait RecordStore: Send + Sync {
    /// Records of `run_id` in insertion order, skipping the first `offset`.
    fn fetch_after(&self, run_id: RunId, offset: u64) -> Result<RecordIter<'_>>;

    /// Number of records stored for `run_id`.
    fn record_count(&self, run_id: RunId) -> Result<u64>;

    /// Subscribe to write notifications for `run_id`, if supported.
    fn watch(&self, _run_id: RunId) -> Option<WakeHandle> {
        None
    }
}
