//! Wake handle types.

use crate::types::RunId;
use std::sync::Weak;
use std::time::Duration;

use super::manager::AppendNotifier;

/// Unique identifier for a wake registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WakeId(pub u64);

/// Handle held by a waiting streamer.
///
/// Each event on `receiver` means "the run may have new writes". Events
/// coalesce: many writes between two waits produce a single wake.
///
/// Dropping the handle removes its registration.
pub struct WakeHandle {
    pub id: WakeId,
    pub run_id: RunId,
    /// Channel signalled on writes for `run_id`.
    pub receiver: crossbeam_channel::Receiver<()>,
    pub(super) notifier: Weak<AppendNotifier>,
}

impl WakeHandle {
    /// Block until woken or the timeout elapses. Returns true if woken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.receiver.recv_timeout(timeout).is_ok()
    }

    /// Consume a pending wake without blocking.
    pub fn try_take(&self) -> bool {
        self.receiver.try_recv().is_ok()
    }
}

impl Drop for WakeHandle {
    fn drop(&mut self) {
        if let Some(notifier) = self.notifier.upgrade() {
            notifier.unregister(self.id);
        }
    }
}
