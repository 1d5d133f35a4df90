//! The run metadata contract consulted by the streamer.

use crate::error::Result;
use crate::types::{RunId, RunState};
use crate::wake::WakeHandle;

/// Read-only view over run metadata.
///
/// Writes (status changes, the producer-finished flag) belong to producers
/// and the job pipeline, never to a streamer.
pub trait RunRegistry: Send + Sync {
    /// The most recently created run, or `NoActiveRun` if there is none.
    fn latest_run(&self) -> Result<RunId>;

    /// Status and producer-finished flag of a run, or `RunNotFound`.
    fn status_of(&self, run_id: RunId) -> Result<RunState>;

    /// Subscribe to metadata change notifications for `run_id`, if supported.
    fn watch(&self, _run_id: RunId) -> Option<WakeHandle> {
        None
    }
}
