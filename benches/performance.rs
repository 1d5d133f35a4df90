//! Performance benchmarks for the store and the streamer.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gridtail::{
    ChannelSink, GridStreamer, MemoryRecordStore, RecordInput, RecordStore, RunId, RunTable,
    SinkConfig, Store, StoreConfig,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn create_store(dir: &TempDir) -> Arc<Store> {
    Arc::new(
        Store::create(StoreConfig {
            path: dir.path().join("store"),
            create_if_missing: true,
            sync_interval: 1000,
        })
        .unwrap(),
    )
}

fn cell(i: u64) -> RecordInput {
    RecordInput::json(&json!({"hour": i, "citizen_id": i % 97, "x": i % 250, "y": i / 250}))
        .unwrap()
}

/// Benchmark record append
fn bench_record_append(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = create_store(&dir);
    let run = store.create_run(None).unwrap();

    let mut i = 0;
    c.bench_function("record_append", |b| {
        b.iter(|| {
            i += 1;
            black_box(store.append_record(run.id, cell(i)).unwrap());
        });
    });
}

/// Benchmark fetching the tail of a run at varying cursor depths
fn bench_fetch_after(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch_after");

    let dir = TempDir::new().unwrap();
    let store = create_store(&dir);
    let run = store.create_run(None).unwrap();
    for i in 0..10_000 {
        store.append_record(run.id, cell(i)).unwrap();
    }

    // Always the last 100 records; the offset must not cost a scan
    for offset in [0u64, 5_000, 9_900] {
        group.bench_with_input(BenchmarkId::new("offset", offset), &offset, |b, &offset| {
            b.iter(|| {
                let count = store.fetch_after(run.id, offset).unwrap().take(100).count();
                black_box(count);
            });
        });
    }

    group.finish();
}

/// Benchmark one full stream over an already-finished run
fn bench_stream_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_cycle");

    for records in [100u64, 1_000, 10_000] {
        group.bench_with_input(
            BenchmarkId::new("memory_records", records),
            &records,
            |b, &n| {
                let store = Arc::new(MemoryRecordStore::new());
                let runs = Arc::new(RunTable::in_memory());
                let run = runs.create_run(None).unwrap();
                for i in 0..n {
                    store.append(run.id, cell(i)).unwrap();
                }
                runs.mark_producer_finished(run.id).unwrap();

                b.iter(|| stream_all(run.id, store.clone(), runs.clone(), n));
            },
        );
    }

    group.finish();
}

fn stream_all(run_id: RunId, store: Arc<MemoryRecordStore>, runs: Arc<RunTable>, n: u64) {
    let (sink, subscriber) = ChannelSink::pair(SinkConfig {
        buffer_size: n as usize + 1,
        ..Default::default()
    });
    let mut streamer = GridStreamer::new(run_id, store, runs);
    black_box(streamer.run_cycle(&sink).unwrap());
    black_box(subscriber.try_recv().unwrap());
}

criterion_group!(
    benches,
    bench_record_append,
    bench_fetch_after,
    bench_stream_cycle,
);

criterion_main!(benches);
