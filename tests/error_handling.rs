//! Error handling and edge case tests.

mod common;

use common::{hour, memory_setup, RecordingSink};
use gridtail::{
    ChannelSink, CycleOutcome, GridError, GridEvent, GridStreamer, MemoryRecordStore, Record,
    RecordIter, RecordStore, Result, RunId, RunRegistry, RunState, RunStatus, RunTable,
    SinkConfig, Store, StoreConfig, StreamConfig, StreamDriver, StreamPhase,
};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn store_config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        path: dir.path().join("store"),
        create_if_missing: true,
        sync_interval: 1,
    }
}

/// Copy a store directory as it would be found after a crash: data files
/// only, no held lock.
fn copy_store_files(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for name in ["MANIFEST", "records.log", "runs.bin"] {
        let source = from.join(name);
        if source.exists() {
            fs::copy(&source, to.join(name)).unwrap();
        }
    }
}

/// Store whose iterator fails after yielding `good` records of the wrapped
/// store.
struct BreaksMidFetch {
    inner: Arc<MemoryRecordStore>,
    good: usize,
}

impl RecordStore for BreaksMidFetch {
    fn fetch_after(&self, run_id: RunId, offset: u64) -> Result<RecordIter<'_>> {
        let head: Vec<Result<Record>> = self.inner.fetch_after(run_id, offset)?.take(self.good).collect();
        let tail = std::iter::once(Err(GridError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ))));
        Ok(Box::new(head.into_iter().chain(tail)))
    }

    fn record_count(&self, run_id: RunId) -> Result<u64> {
        self.inner.record_count(run_id)
    }
}

/// Registry that can resolve runs but never read their status.
struct StatusDown {
    inner: Arc<RunTable>,
}

impl RunRegistry for StatusDown {
    fn latest_run(&self) -> Result<RunId> {
        self.inner.latest_run()
    }

    fn status_of(&self, _run_id: RunId) -> Result<RunState> {
        Err(GridError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "status query timed out",
        )))
    }
}

// --- Collaborator Failures ---

#[test]
fn test_store_failure_mid_batch_keeps_delivered_records() {
    let (records, runs, run_id) = memory_setup();
    for h in 0..4 {
        records.append(run_id, hour(h)).unwrap();
    }
    runs.mark_producer_finished(run_id).unwrap();

    let store = Arc::new(BreaksMidFetch {
        inner: records,
        good: 2,
    });
    let mut streamer = GridStreamer::new(run_id, store, runs);
    let sink = RecordingSink::new();

    let err = streamer.run_cycle(&sink).unwrap_err();
    assert!(matches!(err, GridError::StoreUnavailable(_)));
    assert!(err.is_transient());
    assert_eq!(streamer.phase(), StreamPhase::Aborted);
    assert_eq!(streamer.delivered(), 2);

    // Delivered records stand; no marker is ever sent
    assert_eq!(sink.hours(), vec![0, 1]);
    assert_eq!(sink.terminal_count(), 0);
    assert!(matches!(
        streamer.run_cycle(&sink),
        Err(GridError::StreamClosed)
    ));
}

#[test]
fn test_registry_failure_is_not_termination() {
    let (records, runs, run_id) = memory_setup();
    records.append(run_id, hour(0)).unwrap();

    let mut streamer = GridStreamer::new(run_id, records, Arc::new(StatusDown { inner: runs }));
    let sink = RecordingSink::new();

    let err = streamer.run_cycle(&sink).unwrap_err();
    assert!(matches!(err, GridError::RegistryUnavailable(_)));
    assert_eq!(sink.hours(), vec![0]);
    assert_eq!(sink.terminal_count(), 0);
}

#[test]
fn test_driver_reports_abort_to_subscriber() {
    let (records, runs, run_id) = memory_setup();
    records.append(run_id, hour(0)).unwrap();

    let (sink, subscriber) = ChannelSink::pair(SinkConfig::default());
    let streamer = GridStreamer::new(run_id, records, Arc::new(StatusDown { inner: runs }));
    let result = StreamDriver::new(streamer, Arc::new(sink), StreamConfig::default()).run();
    assert!(matches!(result, Err(GridError::RegistryUnavailable(_))));

    let first = subscriber.recv_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(first.record().unwrap().position, 0);

    let second = subscriber.recv_timeout(Duration::from_millis(100)).unwrap();
    match &second {
        GridEvent::Aborted { message } => assert!(message.contains("timed out")),
        other => panic!("expected Aborted, got {:?}", other),
    }
    assert!(!second.is_terminal());
    assert_eq!(second.to_json()["type"], "aborted");
    assert!(subscriber.try_recv().is_err());
}

#[test]
fn test_unknown_run_aborts() {
    let records = Arc::new(MemoryRecordStore::new());
    let runs = Arc::new(RunTable::in_memory());
    let mut streamer = GridStreamer::new(RunId(9), records, runs);
    let sink = RecordingSink::new();

    assert!(matches!(
        streamer.run_cycle(&sink),
        Err(GridError::RunNotFound(RunId(9)))
    ));
    assert!(sink.events().is_empty());
}

#[test]
fn test_no_active_run() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::create(store_config(&dir)).unwrap());

    let result = GridStreamer::follow_latest(store.clone(), store);
    assert!(matches!(result, Err(GridError::NoActiveRun)));
}

// --- Sink Edge Cases ---

#[test]
fn test_disconnect_before_first_cycle() {
    let (records, runs, run_id) = memory_setup();
    records.append(run_id, hour(0)).unwrap();

    let sink = RecordingSink::new();
    sink.disconnect();

    let mut streamer = GridStreamer::new(run_id, records, runs);
    assert_eq!(
        streamer.run_cycle(&sink).unwrap(),
        CycleOutcome::Disconnected { delivered: 0 }
    );
    assert_eq!(streamer.delivered(), 0);
}

#[test]
fn test_disconnect_instead_of_marker() {
    let (records, runs, run_id) = memory_setup();
    records.append(run_id, hour(0)).unwrap();
    runs.mark_producer_finished(run_id).unwrap();

    // Room for the record but not the marker
    let sink = RecordingSink::disconnecting_after(1);
    let mut streamer = GridStreamer::new(run_id, records, runs);

    assert_eq!(
        streamer.run_cycle(&sink).unwrap(),
        CycleOutcome::Disconnected { delivered: 1 }
    );
    assert_eq!(sink.terminal_count(), 0);
}

// --- Run Status Edge Cases ---

#[test]
fn test_status_never_moves_backwards() {
    let runs = RunTable::in_memory();
    let run = runs.create_run(None).unwrap();
    runs.mark_running(run.id).unwrap();
    runs.mark_finished(run.id).unwrap();

    assert!(matches!(
        runs.mark_running(run.id),
        Err(GridError::InvalidTransition {
            from: RunStatus::Finished,
            to: RunStatus::Running,
            ..
        })
    ));
    assert!(matches!(
        runs.mark_failed(run.id),
        Err(GridError::InvalidTransition { .. })
    ));
}

#[test]
fn test_producer_flag_is_set_once() {
    let runs = RunTable::in_memory();
    let run = runs.create_run(None).unwrap();

    assert!(runs.mark_producer_finished(run.id).unwrap());
    assert!(!runs.mark_producer_finished(run.id).unwrap());
    assert!(runs.status_of(run.id).unwrap().producer_finished);
    assert!(matches!(
        runs.mark_producer_finished(RunId(55)),
        Err(GridError::RunNotFound(_))
    ));
}

// --- Store Errors ---

#[test]
fn test_second_open_is_locked() {
    let dir = TempDir::new().unwrap();
    let _store = Store::open_or_create(store_config(&dir)).unwrap();

    assert!(matches!(
        Store::open_or_create(store_config(&dir)),
        Err(GridError::Locked)
    ));
}

#[test]
fn test_corrupt_manifest() {
    let dir = TempDir::new().unwrap();
    drop(Store::create(store_config(&dir)).unwrap());

    std::fs::write(dir.path().join("store").join("MANIFEST"), b"NOPE\x01").unwrap();
    assert!(matches!(
        Store::open(store_config(&dir)),
        Err(GridError::InvalidFormat(_))
    ));
}

#[test]
fn test_corrupt_run_table() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::create(store_config(&dir)).unwrap();
        store.create_run(None).unwrap();
    }

    std::fs::write(dir.path().join("store").join("runs.bin"), b"garbage").unwrap();
    assert!(matches!(
        Store::open(store_config(&dir)),
        Err(GridError::InvalidFormat(_))
    ));
}

#[test]
fn test_torn_log_tail_is_dropped_on_open() {
    let dir = TempDir::new().unwrap();
    let run_id = {
        let store = Store::create(store_config(&dir)).unwrap();
        let run = store.create_run(None).unwrap();
        for h in 0..3 {
            store.append_record(run.id, hour(h)).unwrap();
        }
        run.id
    };

    // Half-written entry from a crash mid-append
    let mut log = OpenOptions::new()
        .append(true)
        .open(dir.path().join("store").join("records.log"))
        .unwrap();
    log.write_all(b"GRD\0\x01\x00\x07").unwrap();
    drop(log);

    let store = Store::open(store_config(&dir)).unwrap();
    assert_eq!(store.record_count(run_id).unwrap(), 3);

    let record = store.append_record(run_id, hour(3)).unwrap();
    assert_eq!(record.position, 3);
    let hours: Vec<u64> = store
        .fetch_after(run_id, 0)
        .unwrap()
        .map(|r| r.unwrap().payload_json().unwrap()["hour"].as_u64().unwrap())
        .collect();
    assert_eq!(hours, vec![0, 1, 2, 3]);
}

#[test]
fn test_append_to_closed_run_rejected() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(store_config(&dir)).unwrap();
    let run = store.create_run(None).unwrap();
    store.mark_running(run.id).unwrap();
    store.mark_failed(run.id).unwrap();

    assert!(matches!(
        store.append_record(run.id, hour(0)),
        Err(GridError::RunClosed(_))
    ));
    assert_eq!(store.record_count(run.id).unwrap(), 0);
}

#[test]
fn test_no_append_lands_after_failure() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::create(store_config(&dir)).unwrap());
    let run = store.create_run(None).unwrap();
    store.mark_running(run.id).unwrap();

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            let mut written = 0;
            loop {
                match store.append_record(run.id, hour(written)) {
                    Ok(_) => written += 1,
                    Err(GridError::RunClosed(_)) => return written,
                    Err(e) => panic!("unexpected append error: {}", e),
                }
            }
        })
    };

    while store.record_count(run.id).unwrap() < 20 {
        thread::yield_now();
    }
    store.mark_failed(run.id).unwrap();
    let at_failure = store.record_count(run.id).unwrap();

    let written = writer.join().unwrap();
    assert_eq!(written, at_failure);
    assert_eq!(store.record_count(run.id).unwrap(), at_failure);
}

// --- Crash Recovery ---

#[test]
fn test_run_table_survives_unclean_shutdown() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(store_config(&dir)).unwrap();
    let old = store.create_run(None).unwrap();
    store.mark_running(old.id).unwrap();
    for h in 0..3 {
        store.append_record(old.id, hour(h)).unwrap();
    }
    store.mark_producer_finished(old.id).unwrap();
    // No sync and no Drop, as after a crash
    std::mem::forget(store);

    let recovered = dir.path().join("recovered");
    copy_store_files(&dir.path().join("store"), &recovered);
    let store = Store::open(StoreConfig {
        path: recovered,
        ..store_config(&dir)
    })
    .unwrap();

    let state = store.status_of(old.id).unwrap();
    assert_eq!(state.status, RunStatus::Running);
    assert!(state.producer_finished);

    let fresh = store.create_run(None).unwrap();
    assert_ne!(fresh.id, old.id);
    assert_eq!(store.record_count(fresh.id).unwrap(), 0);
    assert_eq!(store.record_count(old.id).unwrap(), 3);
}

#[test]
fn test_lost_run_table_does_not_reuse_run_ids() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(store_config(&dir)).unwrap();
    let first = store.create_run(None).unwrap();
    let second = store.create_run(None).unwrap();
    store.append_record(second.id, hour(0)).unwrap();
    std::mem::forget(store);

    let recovered = dir.path().join("recovered");
    copy_store_files(&dir.path().join("store"), &recovered);
    fs::remove_file(recovered.join("runs.bin")).unwrap();
    let store = Store::open(StoreConfig {
        path: recovered,
        ..store_config(&dir)
    })
    .unwrap();

    let fresh = store.create_run(None).unwrap();
    assert!(fresh.id > second.id);
    assert!(fresh.id > first.id);
    assert_eq!(store.record_count(fresh.id).unwrap(), 0);
}

#[test]
fn test_locked_create_leaves_manifest_alone() {
    let dir = TempDir::new().unwrap();
    let _store = Store::create(store_config(&dir)).unwrap();

    let manifest = dir.path().join("store").join("MANIFEST");
    let mut file = OpenOptions::new().append(true).open(&manifest).unwrap();
    file.write_all(b"#").unwrap();
    drop(file);
    let before = fs::read(&manifest).unwrap();

    assert!(matches!(
        Store::create(store_config(&dir)),
        Err(GridError::Locked)
    ));
    assert_eq!(fs::read(&manifest).unwrap(), before);
}

#[test]
fn test_damaged_log_fails_open() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::create(store_config(&dir)).unwrap();
        let run = store.create_run(None).unwrap();
        for h in 0..50 {
            store.append_record(run.id, hour(h)).unwrap();
        }
    }

    // Overwrite the start of the first record
    let log_path = dir.path().join("store").join("records.log");
    let len = fs::metadata(&log_path).unwrap().len();
    let mut bytes = fs::read(&log_path).unwrap();
    bytes[0] = b'X';
    fs::write(&log_path, &bytes).unwrap();

    assert!(matches!(
        Store::open(store_config(&dir)),
        Err(GridError::Corruption(_))
    ));
    assert_eq!(fs::metadata(&log_path).unwrap().len(), len);
}
