//! Error types for run tailing.

use crate::types::{RunId, RunStatus};
use thiserror::Error;

/// Main error type for store, registry and streaming operations.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No active run to follow")]
    NoActiveRun,

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Run {0} no longer accepts records")]
    RunClosed(RunId),

    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Run registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Sink disconnected")]
    SinkDisconnected,

    #[error("Stream is closed")]
    StreamClosed,

    #[error("Failed to publish work request for run {run_id}: {message}")]
    PublishFailure { run_id: RunId, message: String },

    #[error("Invalid status transition for run {run_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        run_id: RunId,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,
}

impl GridError {
    /// True for collaborator failures that a stream owner may retry by
    /// starting a fresh streamer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GridError::StoreUnavailable(_) | GridError::RegistryUnavailable(_)
        )
    }
}

impl From<serde_json::Error> for GridError {
    fn from(e: serde_json::Error) -> Self {
        GridError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for GridError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        GridError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for GridError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        GridError::Deserialization(e.to_string())
    }
}

/// Result type for gridtail operations.
pub type Result<T> = std::result::Result<T, GridError>;
