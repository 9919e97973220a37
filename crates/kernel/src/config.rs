//! Kernel configuration.

use std::time::Duration;

/// Tunables consumed by the kernel.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// Minimum duration between the start of one round and the first
    /// snapshot of the next on the same validator. Also gates how often a
    /// snapshot is re-sent to the same peer.
    pub snapshot_round_gap: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            snapshot_round_gap: Duration::from_secs(3),
        }
    }
}

impl KernelConfig {
    /// The round gap in the nanosecond domain snapshot timestamps use.
    pub fn gap_ns(&self) -> u64 {
        self.snapshot_round_gap.as_nanos() as u64
    }
}
