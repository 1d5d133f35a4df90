//! Notifier fanning write events out to waiting streamers.

use crate::types::RunId;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{WakeHandle, WakeId};

/// Internal registration state.
struct Waiter {
    run_id: RunId,
    sender: Sender<()>,
}

impl Waiter {
    /// Signal the waiter. Returns false if the handle was dropped.
    fn wake(&self) -> bool {
        match self.sender.try_send(()) {
            Ok(()) => true,
            // A wake is already pending; it covers this write too.
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Registers waiters per run and wakes them when the run is written to.
pub struct AppendNotifier {
    waiters: RwLock<HashMap<WakeId, Waiter>>,
    next_id: AtomicU64,
}

impl AppendNotifier {
    pub fn new() -> Self {
        Self {
            waiters: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register interest in writes to `run_id`. The registration lasts until
    /// the handle is dropped.
    pub fn register(self: &Arc<Self>, run_id: RunId) -> WakeHandle {
        let id = WakeId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(1);

        self.waiters.write().insert(id, Waiter { run_id, sender });

        WakeHandle {
            id,
            run_id,
            receiver,
            notifier: Arc::downgrade(self),
        }
    }

    /// Remove a registration.
    pub fn unregister(&self, id: WakeId) {
        self.waiters.write().remove(&id);
    }

    /// Number of live registrations.
    pub fn waiter_count(&self) -> usize {
        self.waiters.read().len()
    }

    /// Wake every waiter of `run_id`. Drops registrations whose receiver is
    /// gone.
    pub fn notify(&self, run_id: RunId) {
        let mut to_remove = Vec::new();

        {
            let waiters = self.waiters.read();
            for (id, waiter) in waiters.iter() {
                if waiter.run_id == run_id && !waiter.wake() {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut waiters = self.waiters.write();
            for id in to_remove {
                waiters.remove(&id);
            }
        }
    }
}

impl Default for AppendNotifier {
    fn default() -> Self {
        Self::new()
    }
}
