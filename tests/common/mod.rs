//! Shared test helpers.

#![allow(dead_code)]

use gridtail::{
    DisconnectCallback, DisconnectReason, GridError, GridEvent, MemoryRecordStore, RecordInput,
    Result, RunId, RunTable, Sink,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

/// Sink that keeps every pushed event and can hang up after N pushes.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<GridEvent>>,
    accept_limit: Option<usize>,
    disconnected: Mutex<bool>,
    callbacks: Mutex<Vec<DisconnectCallback>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `limit` events, then behave as a closed connection.
    pub fn disconnecting_after(limit: usize) -> Self {
        Self {
            accept_limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<GridEvent> {
        self.events.lock().clone()
    }

    /// Payload `hour` fields of the data events, in delivery order.
    pub fn hours(&self) -> Vec<u64> {
        self.events
            .lock()
            .iter()
            .filter_map(GridEvent::record)
            .map(|r| r.payload_json().unwrap()["hour"].as_u64().unwrap())
            .collect()
    }

    pub fn positions(&self) -> Vec<u64> {
        self.events
            .lock()
            .iter()
            .filter_map(GridEvent::record)
            .map(|r| r.position)
            .collect()
    }

    pub fn terminal_count(&self) -> usize {
        self.events.lock().iter().filter(|e| e.is_terminal()).count()
    }

    pub fn disconnect(&self) {
        let callbacks = {
            let mut disconnected = self.disconnected.lock();
            if *disconnected {
                return;
            }
            *disconnected = true;
            std::mem::take(&mut *self.callbacks.lock())
        };
        for callback in callbacks {
            callback(DisconnectReason::Closed);
        }
    }
}

impl Sink for RecordingSink {
    fn push(&self, event: GridEvent) -> Result<()> {
        if *self.disconnected.lock() {
            return Err(GridError::SinkDisconnected);
        }
        if let Some(limit) = self.accept_limit {
            if self.events.lock().len() >= limit {
                self.disconnect();
                return Err(GridError::SinkDisconnected);
            }
        }
        self.events.lock().push(event);
        Ok(())
    }

    fn on_disconnect(&self, callback: DisconnectCallback) {
        if *self.disconnected.lock() {
            callback(DisconnectReason::Closed);
        } else {
            self.callbacks.lock().push(callback);
        }
    }

    fn is_disconnected(&self) -> bool {
        *self.disconnected.lock()
    }
}

/// In-memory record store and run table with one running run.
pub fn memory_setup() -> (Arc<MemoryRecordStore>, Arc<RunTable>, RunId) {
    let records = Arc::new(MemoryRecordStore::new());
    let runs = Arc::new(RunTable::in_memory());
    let run = runs.create_run(None).unwrap();
    runs.mark_running(run.id).unwrap();
    (records, runs, run.id)
}

pub fn hour(h: u64) -> RecordInput {
    RecordInput::json(&json!({ "hour": h, "citizen_id": h % 7, "x": h, "y": h * 2 })).unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
