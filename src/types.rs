//! Core types for runs and their records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of one producer run.
///
/// Allocated monotonically, so a larger id always means a more recently
/// created run.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub u64);

impl fmt::Debug for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RunId({})", self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a submitted job (a batch of runs).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-global record identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Lifecycle status of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InQueue,
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    /// Finished and Failed never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Finished | RunStatus::Failed)
    }

    /// Whether moving from `self` to `next` keeps the status monotonic.
    ///
    /// Re-applying the current status is allowed.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        self == next
            || matches!(
                (self, next),
                (InQueue, Running) | (InQueue, Failed) | (Running, Finished) | (Running, Failed)
            )
    }
}

/// The part of a run the streamer consults when deciding to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub status: RunStatus,
    pub producer_finished: bool,
}

impl RunState {
    /// No more records will ever arrive for this run.
    pub fn is_stream_over(&self) -> bool {
        self.producer_finished || self.status == RunStatus::Failed
    }
}

/// Run metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub status: RunStatus,
    /// Set once, after the producer emitted its last record.
    pub producer_finished: bool,
    pub job_id: Option<JobId>,
    pub created: Timestamp,
}

impl Run {
    pub fn state(&self) -> RunState {
        RunState {
            status: self.status,
            producer_finished: self.producer_finished,
        }
    }
}

/// One unit of producer output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Store-global id (assigned by store).
    pub id: RecordId,

    /// Run this record belongs to.
    pub run_id: RunId,

    /// Insertion order within the run, starting at 0 (assigned by store).
    pub position: u64,

    /// When the record was stored.
    pub timestamp: Timestamp,

    /// JSON-encoded payload.
    pub payload: Vec<u8>,
}

impl Record {
    /// Decode the payload as JSON.
    pub fn payload_json(&self) -> std::result::Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// Input for a new record, before id and position are assigned.
#[derive(Clone, Debug)]
pub struct RecordInput {
    pub payload: Vec<u8>,
}

impl RecordInput {
    /// Create a record input with a JSON payload.
    pub fn json(payload: &impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            payload: serde_json::to_vec(payload)?,
        })
    }

    /// Create a record input from already-encoded bytes.
    pub fn raw(payload: Vec<u8>) -> Self {
        Self { payload }
    }
}
