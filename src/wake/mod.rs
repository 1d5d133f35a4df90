//! Write notifications for waiting streamers.
//!
//! The record store is passive: it cannot push records anywhere. Instead,
//! writers call [`AppendNotifier::notify`] after every append or status
//! change and waiting streamers wake up early rather than sleeping through
//! their whole poll interval. Wakes are hints only; a streamer that misses
//! one still catches up on its next timed poll.

mod manager;
mod types;

pub use manager::AppendNotifier;
pub use types::{WakeHandle, WakeId};
