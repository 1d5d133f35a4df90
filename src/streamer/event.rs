//! Events pushed to a sink.

use crate::types::{Record, RunId, RunState};
use serde::{Deserialize, Serialize};

/// Why a stream ended normally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The producer wrote its last record.
    ProducerFinished,
    /// The run failed; no more records will arrive.
    RunFailed,
}

impl EndReason {
    /// The reason a stream over `state` ends, or None if it must continue.
    pub fn from_state(state: &RunState) -> Option<Self> {
        if state.producer_finished {
            Some(EndReason::ProducerFinished)
        } else if state.is_stream_over() {
            Some(EndReason::RunFailed)
        } else {
            None
        }
    }
}

/// One event delivered to a subscriber.
#[derive(Clone, Debug, PartialEq)]
pub enum GridEvent {
    /// A data record, in store order.
    Record { record: Record },

    /// Terminal marker: the run is over and nothing follows.
    StreamEnded { reason: EndReason },

    /// The stream broke on a store or registry failure. Never followed by
    /// `StreamEnded`.
    Aborted { message: String },
}

impl GridEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GridEvent::StreamEnded { .. })
    }

    /// The record carried by a data event.
    pub fn record(&self) -> Option<&Record> {
        match self {
            GridEvent::Record { record } => Some(record),
            _ => None,
        }
    }

    /// JSON form sent over a remote connection.
    ///
    /// Record payloads are inlined as JSON (or `null` if they do not parse).
    /// The terminal marker carries `"simulation_ended": true`.
    pub fn to_json(&self) -> serde_json::Value {
        let wire = match self {
            GridEvent::Record { record } => WireEvent::GridData {
                run_id: record.run_id,
                position: record.position,
                data: record.payload_json().unwrap_or(serde_json::Value::Null),
            },
            GridEvent::StreamEnded { reason } => WireEvent::StreamEnded {
                reason: *reason,
                simulation_ended: true,
            },
            GridEvent::Aborted { message } => WireEvent::Aborted {
                message: message.as_str(),
            },
        };
        serde_json::to_value(wire).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent<'a> {
    GridData {
        run_id: RunId,
        position: u64,
        data: serde_json::Value,
    },
    StreamEnded {
        reason: EndReason,
        simulation_ended: bool,
    },
    Aborted {
        message: &'a str,
    },
}
