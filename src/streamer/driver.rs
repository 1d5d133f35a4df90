//! Scheduling of streamer cycles.

use crate::error::Result;
use crate::types::RunId;
use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info};

use super::event::{EndReason, GridEvent};
use super::grid::{CycleOutcome, GridStreamer};
use super::sink::Sink;

/// Stream scheduling configuration.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Longest idle wait between cycles when no wake arrives.
    /// Default: 250ms
    pub poll_interval: Duration,

    /// Name of the thread used by [`StreamDriver::spawn`].
    pub thread_name: String,
}

impl StreamConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Poll interval clamped to a non-zero value so idle streams never spin.
    fn idle_wait(&self) -> Duration {
        self.poll_interval.max(Duration::from_millis(1))
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            thread_name: "gridtail-stream".to_string(),
        }
    }
}

/// How a stream ended without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Terminal marker delivered.
    Completed(EndReason),
    /// The sink disconnected.
    Disconnected,
    /// Stopped through [`StreamHandle::cancel`].
    Cancelled,
}

/// Runs a streamer's cycles until the stream ends.
///
/// Cycles never overlap: the next one starts only after the previous one has
/// pushed all its events and made its decision. Between cycles the driver
/// waits for a write notification on the followed run, a cancellation, or
/// the poll interval, whichever comes first.
pub struct StreamDriver {
    streamer: GridStreamer,
    sink: Arc<dyn Sink>,
    config: StreamConfig,
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
}

impl StreamDriver {
    pub fn new(streamer: GridStreamer, sink: Arc<dyn Sink>, config: StreamConfig) -> Self {
        let (cancel_tx, cancel_rx) = bounded(1);
        Self {
            streamer,
            sink,
            config,
            cancel_tx,
            cancel_rx,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.streamer.run_id()
    }

    /// Drive the stream on the current thread until it ends.
    ///
    /// A collaborator failure is pushed to the sink as `Aborted` and returned.
    pub fn run(mut self) -> Result<StreamOutcome> {
        let run_id = self.streamer.run_id();

        let cancel = self.cancel_tx.clone();
        self.sink.on_disconnect(Box::new(move |_| {
            let _ = cancel.try_send(());
        }));

        // Registered before the first cycle so writes during it leave a wake
        // pending.
        let record_wake = self.streamer.records().watch(run_id);
        let registry_wake = self.streamer.registry().watch(run_id);
        let record_rx: Receiver<()> = record_wake
            .as_ref()
            .map(|h| h.receiver.clone())
            .unwrap_or_else(never);
        let registry_rx: Receiver<()> = registry_wake
            .as_ref()
            .map(|h| h.receiver.clone())
            .unwrap_or_else(never);

        info!(
            run_id = %run_id,
            poll_ms = self.config.idle_wait().as_millis() as u64,
            event_wake = record_wake.is_some() || registry_wake.is_some(),
            "stream started"
        );

        loop {
            if self.cancel_rx.try_recv().is_ok() {
                return Ok(self.stopped());
            }

            match self.streamer.run_cycle(&*self.sink) {
                Ok(CycleOutcome::Continue { .. }) => {}
                Ok(CycleOutcome::Terminated { reason, .. }) => {
                    return Ok(StreamOutcome::Completed(reason))
                }
                Ok(CycleOutcome::Disconnected { .. }) => return Ok(StreamOutcome::Disconnected),
                Err(e) => {
                    error!(
                        run_id = %run_id,
                        delivered = self.streamer.delivered(),
                        error = %e,
                        "stream aborted"
                    );
                    let _ = self.sink.push(GridEvent::Aborted {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }

            select! {
                recv(self.cancel_rx) -> _ => return Ok(self.stopped()),
                recv(record_rx) -> _ => {},
                recv(registry_rx) -> _ => {},
                default(self.config.idle_wait()) => {},
            }
        }
    }

    /// Drive the stream on a new named thread.
    pub fn spawn(self) -> Result<StreamHandle> {
        let run_id = self.run_id();
        let cancel = self.cancel_tx.clone();
        let thread = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || self.run())?;

        Ok(StreamHandle {
            run_id,
            cancel,
            thread,
        })
    }

    fn stopped(&self) -> StreamOutcome {
        let outcome = if self.sink.is_disconnected() {
            StreamOutcome::Disconnected
        } else {
            StreamOutcome::Cancelled
        };
        info!(
            run_id = %self.streamer.run_id(),
            delivered = self.streamer.delivered(),
            outcome = ?outcome,
            "stream stopped"
        );
        outcome
    }
}

/// Handle to a stream running on its own thread.
pub struct StreamHandle {
    run_id: RunId,
    cancel: Sender<()>,
    thread: JoinHandle<Result<StreamOutcome>>,
}

impl StreamHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Stop scheduling cycles. A cycle in progress finishes first.
    pub fn cancel(&self) {
        let _ = self.cancel.try_send(());
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the stream to end.
    pub fn join(self) -> Result<StreamOutcome> {
        match self.thread.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Follow `run_id` on a new thread, pushing to `sink`.
pub fn spawn_stream(
    streamer: GridStreamer,
    sink: Arc<dyn Sink>,
    config: StreamConfig,
) -> Result<StreamHandle> {
    StreamDriver::new(streamer, sink, config).spawn()
}
