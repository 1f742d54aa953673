//! Status - キューの観測用カウント

use serde::{Deserialize, Serialize};

/// Snapshot of one queue's structures.
///
/// `ready + delayed` is what `QueueBackend::size` reports. `dead` counts the
/// shared dead-letter list, so it is the same for every queue name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub ready: u64,
    pub delayed: u64,
    pub reserved: u64,
    pub dead: u64,
}

impl QueueCounts {
    /// Visible backlog (in-flight and dead-lettered jobs excluded).
    pub fn backlog(&self) -> u64 {
        self.ready.saturating_add(self.delayed)
    }

    /// Nothing waiting and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.backlog() == 0 && self.reserved == 0
    }
}
