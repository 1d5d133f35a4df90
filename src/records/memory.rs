//! In-memory record store.

use crate::error::Result;
use crate::types::{Record, RecordId, RecordInput, RunId, Timestamp};
use crate::wake::{AppendNotifier, WakeHandle};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::reader::{RecordIter, RecordStore};

/// Record store keeping every run's records in a vector.
pub struct MemoryRecordStore {
    runs: RwLock<HashMap<RunId, Vec<Record>>>,
    next_id: AtomicU64,
    notifier: Option<Arc<AppendNotifier>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            notifier: None,
        }
    }

    /// Wake waiters through `notifier` on every append.
    pub fn with_notifier(mut self, notifier: Arc<AppendNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Append a record to a run.
    pub fn append(&self, run_id: RunId, input: RecordInput) -> Result<Record> {
        let record = {
            let mut runs = self.runs.write();
            let records = runs.entry(run_id).or_default();
            let record = Record {
                id: RecordId(self.next_id.fetch_add(1, Ordering::SeqCst)),
                run_id,
                position: records.len() as u64,
                timestamp: Timestamp::now(),
                payload: input.payload,
            };
            records.push(record.clone());
            record
        };

        if let Some(notifier) = &self.notifier {
            notifier.notify(run_id);
        }

        Ok(record)
    }

    fn get(&self, run_id: RunId, position: u64) -> Option<Record> {
        self.runs
            .read()
            .get(&run_id)
            .and_then(|records| records.get(position as usize))
            .cloned()
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryRecordStore {
    fn fetch_after(&self, run_id: RunId, offset: u64) -> Result<RecordIter<'_>> {
        let end = self.record_count(run_id)?;
        Ok(Box::new(MemoryRecordIter {
            store: self,
            run_id,
            next: offset,
            end,
        }))
    }

    fn record_count(&self, run_id: RunId) -> Result<u64> {
        Ok(self
            .runs
            .read()
            .get(&run_id)
            .map(|records| records.len() as u64)
            .unwrap_or(0))
    }

    fn watch(&self, run_id: RunId) -> Option<WakeHandle> {
        self.notifier.as_ref().map(|n| n.register(run_id))
    }
}

/// Iterator over a snapshot range `[next, end)`.
///
/// The read lock is taken per item so producers are never blocked for the
/// duration of a delivery.
struct MemoryRecordIter<'a> {
    store: &'a MemoryRecordStore,
    run_id: RunId,
    next: u64,
    end: u64,
}

impl<'a> Iterator for MemoryRecordIter<'a> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let record = self.store.get(self.run_id, self.next)?;
        self.next += 1;
        Some(Ok(record))
    }
}
