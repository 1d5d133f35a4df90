//! On-disk store tying the record log and run table together.

use crate::error::{GridError, Result};
use crate::records::{RecordIter, RecordLog, RecordStore, RunIndex};
use crate::runs::{RunRegistry, RunTable};
use crate::types::{JobId, Record, RecordInput, Run, RunId, RunState};
use crate::wake::{AppendNotifier, WakeHandle};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Sync the record log every N appends.
    pub sync_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./gridtail"),
            create_if_missing: true,
            sync_interval: RecordLog::DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub run_count: u64,
    pub record_count: u64,
    pub log_size_bytes: u64,
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"GTS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Record log plus run table in one locked directory.
///
/// Producers write through [`append_record`](Store::append_record) and the
/// status methods; streamers read through the [`RecordStore`] and
/// [`RunRegistry`] impls. Every write wakes streamers following the run.
pub struct Store {
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    log: RecordLog,

    index: RunIndex,

    runs: RunTable,

    notifier: Arc<AppendNotifier>,

    /// Serializes appends so positions match log order.
    write_lock: Mutex<()>,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(GridError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;
        Self::write_manifest(&config.path)?;

        let notifier = Arc::new(AppendNotifier::new());
        let log = RecordLog::open_with_sync_interval(
            config.path.join("records.log"),
            config.sync_interval,
        )?;
        let runs = RunTable::new(config.path.join("runs.bin")).with_notifier(Arc::clone(&notifier));

        info!(path = %config.path.display(), "store created");

        Ok(Self {
            config,
            _lock_file: lock_file,
            log,
            index: RunIndex::new(),
            runs,
            notifier,
            write_lock: Mutex::new(()),
        })
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let notifier = Arc::new(AppendNotifier::new());
        let log = RecordLog::open_with_sync_interval(
            config.path.join("records.log"),
            config.sync_interval,
        )?;
        let runs = RunTable::load(config.path.join("runs.bin"))?.with_notifier(Arc::clone(&notifier));

        let index = RunIndex::new();
        if let Some(max_run) = Self::rebuild_index(&log, &index)? {
            runs.reserve_ids_through(max_run)?;
        }

        info!(
            path = %config.path.display(),
            runs = runs.run_count(),
            records = index.total(),
            "store opened"
        );

        Ok(Self {
            config,
            _lock_file: lock_file,
            log,
            index,
            runs,
            notifier,
            write_lock: Mutex::new(()),
        })
    }

    /// Rebuild the position index from the log. Returns the largest run id
    /// with records.
    fn rebuild_index(log: &RecordLog, index: &RunIndex) -> Result<Option<RunId>> {
        let mut max_run = None;
        for result in log.iter_from(0) {
            let (offset, record) = result?;
            max_run = max_run.max(Some(record.run_id));
            let position = index.push(record.run_id, offset);
            if position != record.position {
                return Err(GridError::InvalidFormat(format!(
                    "record {:?} of run {} stored at position {} but found at {}",
                    record.id, record.run_id, record.position, position
                )));
            }
        }
        Ok(max_run)
    }

    // --- Run Operations ---

    /// Run table, for job pipelines. Every change to it is written to
    /// `runs.bin` before it returns.
    pub fn runs(&self) -> &RunTable {
        &self.runs
    }

    pub fn create_run(&self, job_id: Option<JobId>) -> Result<Run> {
        self.runs.create_run(job_id)
    }

    pub fn get_run(&self, run_id: RunId) -> Option<Run> {
        self.runs.get(run_id)
    }

    pub fn mark_running(&self, run_id: RunId) -> Result<Run> {
        self.runs.mark_running(run_id)
    }

    pub fn mark_finished(&self, run_id: RunId) -> Result<Run> {
        self.runs.mark_finished(run_id)
    }

    /// Mark the run failed. Appends racing with this call either land
    /// before it or are rejected.
    pub fn mark_failed(&self, run_id: RunId) -> Result<Run> {
        let _lock = self.write_lock.lock();
        self.runs.mark_failed(run_id)
    }

    /// Flag that the producer wrote its last record. The record log is
    /// synced before the flag is persisted, so the flag never gets ahead of
    /// the data on disk.
    pub fn mark_producer_finished(&self, run_id: RunId) -> Result<bool> {
        let _lock = self.write_lock.lock();
        self.log.sync()?;
        self.runs.mark_producer_finished(run_id)
    }

    // --- Record Operations ---

    /// Append a record to a run.
    ///
    /// Fails with `RunNotFound` for unknown runs and `RunClosed` once the
    /// producer has finished or the run has failed.
    pub fn append_record(&self, run_id: RunId, input: RecordInput) -> Result<Record> {
        let record = {
            let _lock = self.write_lock.lock();
            let run = self.runs.get(run_id).ok_or(GridError::RunNotFound(run_id))?;
            if run.state().is_stream_over() {
                return Err(GridError::RunClosed(run_id));
            }

            let position = self.index.next_position(run_id);
            let (record, offset) = self.log.append(input, run_id, position)?;
            self.index.push(run_id, offset);
            record
        };

        debug!(run_id = %run_id, position = record.position, "record appended");
        self.notifier.notify(run_id);
        Ok(record)
    }

    /// Get a record by run position.
    pub fn get_record(&self, run_id: RunId, position: u64) -> Result<Option<Record>> {
        match self.index.offset_of(run_id, position) {
            Some(offset) => Ok(Some(self.log.read_at(offset)?)),
            None => Ok(None),
        }
    }

    // --- Store Operations ---

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            run_count: self.runs.run_count() as u64,
            record_count: self.index.total(),
            log_size_bytes: self.log.size(),
        }
    }

    /// Sync all data to disk.
    pub fn sync(&self) -> Result<()> {
        self.log.sync()?;
        self.runs.save()?;
        Ok(())
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let mut file = File::open(path.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(GridError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(GridError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| GridError::Locked)?;
        Ok(lock_file)
    }
}

impl RecordStore for Store {
    fn fetch_after(&self, run_id: RunId, offset: u64) -> Result<RecordIter<'_>> {
        let end = self.index.count(run_id);
        Ok(Box::new(StoreRecordIter {
            store: self,
            run_id,
            next: offset,
            end,
        }))
    }

    fn record_count(&self, run_id: RunId) -> Result<u64> {
        Ok(self.index.count(run_id))
    }

    fn watch(&self, run_id: RunId) -> Option<WakeHandle> {
        Some(self.notifier.register(run_id))
    }
}

impl RunRegistry for Store {
    fn latest_run(&self) -> Result<RunId> {
        self.runs.latest_run()
    }

    fn status_of(&self, run_id: RunId) -> Result<RunState> {
        self.runs.status_of(run_id)
    }

    // Record and status writes share one notifier, so the record-store
    // watch already covers status changes.
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

/// Reads records `[next, end)` of one run through the position index.
struct StoreRecordIter<'a> {
    store: &'a Store,
    run_id: RunId,
    next: u64,
    end: u64,
}

impl<'a> Iterator for StoreRecordIter<'a> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let position = self.next;
        self.next += 1;

        match self.store.index.offset_of(self.run_id, position) {
            Some(offset) => Some(self.store.log.read_at(offset)),
            None => {
                self.next = self.end;
                Some(Err(GridError::Corruption(format!(
                    "run {} has no record at position {}",
                    self.run_id, position
                ))))
            }
        }
    }
}
