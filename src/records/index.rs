//! Per-run position index over the record log.

use crate::types::RunId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Maps `(run, position)` to the file offset of the record.
///
/// Not persisted: it is rebuilt by scanning the log when the store opens.
pub struct RunIndex {
    /// Offsets by run, indexed by position.
    offsets: RwLock<HashMap<RunId, Vec<u64>>>,
}

impl RunIndex {
    pub fn new() -> Self {
        Self {
            offsets: RwLock::new(HashMap::new()),
        }
    }

    /// Record the offset of the next position of `run_id`.
    ///
    /// Returns the position assigned.
    pub fn push(&self, run_id: RunId, offset: u64) -> u64 {
        let mut offsets = self.offsets.write();
        let run = offsets.entry(run_id).or_default();
        run.push(offset);
        (run.len() - 1) as u64
    }

    /// Position the next record of `run_id` will get.
    pub fn next_position(&self, run_id: RunId) -> u64 {
        self.count(run_id)
    }

    /// Offset of a record by position.
    pub fn offset_of(&self, run_id: RunId, position: u64) -> Option<u64> {
        self.offsets
            .read()
            .get(&run_id)
            .and_then(|run| run.get(position as usize))
            .copied()
    }

    /// Number of records indexed for a run.
    pub fn count(&self, run_id: RunId) -> u64 {
        self.offsets
            .read()
            .get(&run_id)
            .map(|run| run.len() as u64)
            .unwrap_or(0)
    }

    /// Number of records across all runs.
    pub fn total(&self) -> u64 {
        self.offsets.read().values().map(|run| run.len() as u64).sum()
    }

    /// Number of runs with at least one record.
    pub fn run_count(&self) -> usize {
        self.offsets.read().len()
    }
}

impl Default for RunIndex {
    fn default() -> Self {
        Self::new()
    }
}
