//! Run table: the concrete run registry and its write API.

use crate::error::{GridError, Result};
use crate::types::{JobId, Run, RunId, RunState, RunStatus, Timestamp};
use crate::wake::{AppendNotifier, WakeHandle};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::registry::RunRegistry;

/// Magic bytes for the run table file.
const RUN_TABLE_MAGIC: &[u8; 4] = b"RUN\0";

/// Current run table format version.
const RUN_TABLE_VERSION: u8 = 1;

/// Run documents as stored on disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct RunDocs {
    runs: BTreeMap<RunId, Run>,
    next_run_id: u64,
    next_job_id: u64,
}

impl Default for RunDocs {
    fn default() -> Self {
        Self {
            runs: BTreeMap::new(),
            next_run_id: 1,
            next_job_id: 1,
        }
    }
}

/// Registry of runs, optionally persisted to a snapshot file.
///
/// A persisted table rewrites its snapshot after every change, before the
/// change is announced to watchers.
pub struct RunTable {
    /// Snapshot path (None = in-memory only).
    path: Option<PathBuf>,

    docs: RwLock<RunDocs>,

    /// Serializes snapshot writes.
    save_lock: Mutex<()>,

    /// Woken on every status or flag change.
    notifier: Option<Arc<AppendNotifier>>,
}

impl RunTable {
    /// An empty table that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            docs: RwLock::new(RunDocs::default()),
            save_lock: Mutex::new(()),
            notifier: None,
        }
    }

    /// An empty table persisted to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            docs: RwLock::new(RunDocs::default()),
            save_lock: Mutex::new(()),
            notifier: None,
        }
    }

    /// Load a table from `path`, or start empty if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let table = Self::new(path);
        if let Some(path) = &table.path {
            if path.exists() {
                *table.docs.write() = Self::read_file(path)?;
            }
        }
        Ok(table)
    }

    /// Wake waiters through `notifier` on every change.
    pub fn with_notifier(mut self, notifier: Arc<AppendNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Create a run in status `InQueue`.
    pub fn create_run(&self, job_id: Option<JobId>) -> Result<Run> {
        let run = {
            let mut docs = self.docs.write();
            let id = RunId(docs.next_run_id);
            docs.next_run_id += 1;

            let run = Run {
                id,
                status: RunStatus::InQueue,
                producer_finished: false,
                job_id,
                created: Timestamp::now(),
            };
            docs.runs.insert(id, run.clone());
            run
        };

        self.persist()?;
        debug!(run_id = %run.id, job_id = ?job_id, "run created");
        Ok(run)
    }

    /// Reserve a job id for a batch of runs.
    pub fn allocate_job_id(&self) -> Result<JobId> {
        let id = {
            let mut docs = self.docs.write();
            let id = JobId(docs.next_job_id);
            docs.next_job_id += 1;
            id
        };

        self.persist()?;
        Ok(id)
    }

    /// Make sure new runs get ids above `run_id`.
    ///
    /// Used on open when the record log mentions runs the snapshot does not
    /// know about, so their records never get attributed to a new run.
    pub(crate) fn reserve_ids_through(&self, run_id: RunId) -> Result<()> {
        let bumped = {
            let mut docs = self.docs.write();
            if docs.next_run_id <= run_id.0 {
                docs.next_run_id = run_id.0 + 1;
                true
            } else {
                false
            }
        };

        if bumped {
            warn!(run_id = %run_id, "run table behind record log, skipping used run ids");
            self.persist()?;
        }
        Ok(())
    }

    /// Get a run by id.
    pub fn get(&self, run_id: RunId) -> Option<Run> {
        self.docs.read().runs.get(&run_id).cloned()
    }

    /// All runs, oldest first.
    pub fn list(&self) -> Vec<Run> {
        self.docs.read().runs.values().cloned().collect()
    }

    /// Runs created for a job, oldest first.
    pub fn runs_for_job(&self, job_id: JobId) -> Vec<Run> {
        self.docs
            .read()
            .runs
            .values()
            .filter(|run| run.job_id == Some(job_id))
            .cloned()
            .collect()
    }

    pub fn run_count(&self) -> usize {
        self.docs.read().runs.len()
    }

    /// The producer picked the run up.
    pub fn mark_running(&self, run_id: RunId) -> Result<Run> {
        self.set_status(run_id, RunStatus::Running)
    }

    /// The run completed. Does not by itself end a stream; see
    /// [`mark_producer_finished`](Self::mark_producer_finished).
    pub fn mark_finished(&self, run_id: RunId) -> Result<Run> {
        self.set_status(run_id, RunStatus::Finished)
    }

    /// The run failed. Streams following it end after their next poll.
    pub fn mark_failed(&self, run_id: RunId) -> Result<Run> {
        self.set_status(run_id, RunStatus::Failed)
    }

    /// The producer wrote its last record.
    ///
    /// Returns false if the flag was already set.
    pub fn mark_producer_finished(&self, run_id: RunId) -> Result<bool> {
        let changed = {
            let mut docs = self.docs.write();
            let run = docs
                .runs
                .get_mut(&run_id)
                .ok_or(GridError::RunNotFound(run_id))?;
            let changed = !run.producer_finished;
            run.producer_finished = true;
            changed
        };

        if changed {
            self.persist()?;
            debug!(run_id = %run_id, "producer finished");
            self.notify(run_id);
        }
        Ok(changed)
    }

    fn set_status(&self, run_id: RunId, status: RunStatus) -> Result<Run> {
        let run = {
            let mut docs = self.docs.write();
            let run = docs
                .runs
                .get_mut(&run_id)
                .ok_or(GridError::RunNotFound(run_id))?;

            if !run.status.can_transition_to(status) {
                return Err(GridError::InvalidTransition {
                    run_id,
                    from: run.status,
                    to: status,
                });
            }
            run.status = status;
            run.clone()
        };

        self.persist()?;
        debug!(run_id = %run_id, status = ?status, "run status changed");
        self.notify(run_id);
        Ok(run)
    }

    fn notify(&self, run_id: RunId) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(run_id);
        }
    }

    /// Write the table to its snapshot file. No-op for in-memory tables.
    ///
    /// The snapshot is written to a temporary file and renamed into place,
    /// so a crash leaves either the old or the new snapshot.
    pub fn save(&self) -> Result<()> {
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.save_lock.lock();
        // Serialize docs with MessagePack
        let encoded = rmp_serde::to_vec(&*self.docs.read())?;

        let tmp_path = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        file.write_all(RUN_TABLE_MAGIC)?;
        file.write_all(&[RUN_TABLE_VERSION])?;
        file.write_all(&(encoded.len() as u64).to_le_bytes())?;
        file.write_all(&encoded)?;
        file.sync_all()?;

        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn read_file(path: &Path) -> Result<RunDocs> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != RUN_TABLE_MAGIC {
            return Err(GridError::InvalidFormat("Invalid run table magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != RUN_TABLE_VERSION {
            return Err(GridError::InvalidFormat(format!(
                "Unsupported run table version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut encoded = vec![0u8; len];
        file.read_exact(&mut encoded)?;
        Ok(rmp_serde::from_slice(&encoded)?)
    }
}

impl RunRegistry for RunTable {
    fn latest_run(&self) -> Result<RunId> {
        self.docs
            .read()
            .runs
            .keys()
            .next_back()
            .copied()
            .ok_or(GridError::NoActiveRun)
    }

    fn status_of(&self, run_id: RunId) -> Result<RunState> {
        self.docs
            .read()
            .runs
            .get(&run_id)
            .map(Run::state)
            .ok_or(GridError::RunNotFound(run_id))
    }

    fn watch(&self, run_id: RunId) -> Option<WakeHandle> {
        self.notifier.as_ref().map(|n| n.register(run_id))
    }
}
