//! Per-subscriber delivery cursor.

/// Count of records already pushed to one sink for one run.
///
/// The next fetch skips exactly this many records. Owned by a single
/// streamer; never shared between subscribers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamCursor {
    delivered_count: u64,
}

impl StreamCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records delivered so far.
    pub fn delivered(&self) -> u64 {
        self.delivered_count
    }

    /// Skip count for the next fetch.
    pub fn next_offset(&self) -> u64 {
        self.delivered_count
    }

    /// Count one successful push.
    pub(crate) fn advance(&mut self) {
        self.delivered_count += 1;
    }
}
