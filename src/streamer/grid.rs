//! The tailing state machine.

use crate::error::{GridError, Result};
use crate::records::RecordStore;
use crate::runs::RunRegistry;
use crate::types::RunId;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cursor::StreamCursor;
use super::event::{EndReason, GridEvent};
use super::sink::Sink;

/// Where a streamer is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamPhase {
    /// Run bound, waiting for the next cycle. Initial phase after the run is
    /// resolved, and the phase a continuing cycle reschedules into.
    Scheduled,
    Fetching,
    Delivering,
    Deciding,
    /// Terminal marker pushed.
    Terminated(EndReason),
    /// Sink went away.
    Disconnected,
    /// A store or registry read failed.
    Aborted,
}

impl StreamPhase {
    /// No further cycles may run.
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            StreamPhase::Terminated(_) | StreamPhase::Disconnected | StreamPhase::Aborted
        )
    }
}

/// Result of one cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Run still producing; schedule another cycle.
    Continue { delivered: u64 },
    /// Terminal marker pushed.
    Terminated { delivered: u64, reason: EndReason },
    /// Sink disconnected; schedule nothing more.
    Disconnected { delivered: u64 },
}

impl CycleOutcome {
    /// Records pushed during this cycle.
    pub fn delivered(&self) -> u64 {
        match *self {
            CycleOutcome::Continue { delivered }
            | CycleOutcome::Terminated { delivered, .. }
            | CycleOutcome::Disconnected { delivered } => delivered,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, CycleOutcome::Continue { .. })
    }
}

/// Follows one run and pushes its records to a sink, once each, in store
/// order, then pushes a single terminal marker.
///
/// The run is fixed at construction. A streamer never switches runs, so its
/// cursor always counts records of the run it follows.
pub struct GridStreamer {
    run_id: RunId,
    records: Arc<dyn RecordStore>,
    registry: Arc<dyn RunRegistry>,
    cursor: StreamCursor,
    phase: StreamPhase,
    cycles: u64,
}

impl GridStreamer {
    /// Follow `run_id`.
    pub fn new(
        run_id: RunId,
        records: Arc<dyn RecordStore>,
        registry: Arc<dyn RunRegistry>,
    ) -> Self {
        Self {
            run_id,
            records,
            registry,
            cursor: StreamCursor::new(),
            phase: StreamPhase::Scheduled,
            cycles: 0,
        }
    }

    /// Follow the most recently created run.
    ///
    /// Resolution happens once, here. Fails with `NoActiveRun` if the
    /// registry is empty; retrying is up to the caller.
    pub fn follow_latest(
        records: Arc<dyn RecordStore>,
        registry: Arc<dyn RunRegistry>,
    ) -> Result<Self> {
        let run_id = registry.latest_run()?;
        debug!(run_id = %run_id, "resolved latest run");
        Ok(Self::new(run_id, records, registry))
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn cursor(&self) -> StreamCursor {
        self.cursor
    }

    /// Records delivered over the streamer's lifetime.
    pub fn delivered(&self) -> u64 {
        self.cursor.delivered()
    }

    /// Cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn is_closed(&self) -> bool {
        self.phase.is_closed()
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn registry(&self) -> &Arc<dyn RunRegistry> {
        &self.registry
    }

    /// Run one fetch, deliver, decide cycle against `sink`.
    ///
    /// Store and registry failures abort the streamer and are returned as
    /// `StoreUnavailable` / `RegistryUnavailable` (or `RunNotFound`); they are
    /// never reported as the end of the stream. Records pushed before a
    /// failure stay delivered.
    pub fn run_cycle(&mut self, sink: &dyn Sink) -> Result<CycleOutcome> {
        if self.phase.is_closed() {
            return Err(GridError::StreamClosed);
        }
        self.cycles += 1;
        let start = self.cursor.delivered();

        if !self.deliver_pending(sink)? {
            return Ok(self.disconnected(start));
        }

        self.phase = StreamPhase::Deciding;
        let state = match self.registry.status_of(self.run_id) {
            Ok(state) => state,
            Err(e) => return Err(self.abort(registry_failure(e))),
        };

        let Some(reason) = EndReason::from_state(&state) else {
            self.phase = StreamPhase::Scheduled;
            let delivered = self.cursor.delivered() - start;
            debug!(
                run_id = %self.run_id,
                cycle = self.cycles,
                delivered,
                total = self.cursor.delivered(),
                "cycle complete, rescheduling"
            );
            return Ok(CycleOutcome::Continue { delivered });
        };

        // The producer may have appended between our fetch and the status
        // read. Everything it wrote precedes the flag, so one more fetch
        // after observing it picks up the rest.
        if !self.deliver_pending(sink)? {
            return Ok(self.disconnected(start));
        }

        match sink.push(GridEvent::StreamEnded { reason }) {
            Ok(()) => {}
            Err(GridError::SinkDisconnected) => return Ok(self.disconnected(start)),
            Err(e) => return Err(self.abort(e)),
        }

        self.phase = StreamPhase::Terminated(reason);
        let delivered = self.cursor.delivered() - start;
        info!(
            run_id = %self.run_id,
            reason = ?reason,
            total = self.cursor.delivered(),
            cycles = self.cycles,
            "stream ended"
        );
        Ok(CycleOutcome::Terminated { delivered, reason })
    }

    /// Fetch everything after the cursor and push it. Returns false if the
    /// sink disconnected part way.
    fn deliver_pending(&mut self, sink: &dyn Sink) -> Result<bool> {
        self.phase = StreamPhase::Fetching;
        let records = Arc::clone(&self.records);
        let batch = match records.fetch_after(self.run_id, self.cursor.next_offset()) {
            Ok(batch) => batch,
            Err(e) => return Err(self.abort(store_failure(e))),
        };

        self.phase = StreamPhase::Delivering;
        for item in batch {
            let record = match item {
                Ok(record) => record,
                Err(e) => return Err(self.abort(store_failure(e))),
            };

            match sink.push(GridEvent::Record { record }) {
                Ok(()) => self.cursor.advance(),
                Err(GridError::SinkDisconnected) => return Ok(false),
                Err(e) => return Err(self.abort(e)),
            }
        }
        Ok(true)
    }

    fn disconnected(&mut self, start: u64) -> CycleOutcome {
        self.phase = StreamPhase::Disconnected;
        warn!(
            run_id = %self.run_id,
            total = self.cursor.delivered(),
            "sink disconnected, stopping stream"
        );
        CycleOutcome::Disconnected {
            delivered: self.cursor.delivered() - start,
        }
    }

    fn abort(&mut self, error: GridError) -> GridError {
        self.phase = StreamPhase::Aborted;
        error
    }
}

fn store_failure(error: GridError) -> GridError {
    match error {
        GridError::StoreUnavailable(_) | GridError::RunNotFound(_) => error,
        other => GridError::StoreUnavailable(other.to_string()),
    }
}

fn registry_failure(error: GridError) -> GridError {
    match error {
        GridError::RegistryUnavailable(_) | GridError::RunNotFound(_) => error,
        other => GridError::RegistryUnavailable(other.to_string()),
    }
}
