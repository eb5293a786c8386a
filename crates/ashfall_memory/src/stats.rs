//! # Allocation Statistics
//!
//! Cumulative counters shared by every allocator and the tracker.
//!
//! The totals are monotone. `current_usage` is always derived as
//! `total_allocated - total_freed`, and `peak_usage` is the running
//! maximum of `current_usage`. Allocators count the bytes a request
//! actually consumed from its arena (block size including alignment
//! padding) on both the allocate and the free side, so the derivation
//! holds exactly over any sequence of operations.

use std::fmt;

/// Cumulative allocation statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Total bytes ever allocated.
    pub total_allocated: u64,
    /// Total bytes ever freed.
    pub total_freed: u64,
    /// Highest value `current_usage` ever reached.
    pub peak_usage: u64,
    /// Bytes currently live (`total_allocated - total_freed`).
    pub current_usage: u64,
    /// Number of successful allocations.
    pub allocation_count: u64,
    /// Number of deallocations (bulk rollbacks count once).
    pub deallocation_count: u64,
    /// Free-space fragmentation percentage at snapshot time, 0-100.
    pub fragmentation_pct: u32,
}

impl MemoryStats {
    /// Records a successful allocation of `bytes` consumed bytes.
    #[inline]
    pub fn record_allocation(&mut self, bytes: u64) {
        self.total_allocated += bytes;
        self.allocation_count += 1;
        self.current_usage = self.total_allocated - self.total_freed;
        if self.current_usage > self.peak_usage {
            self.peak_usage = self.current_usage;
        }
    }

    /// Records a deallocation returning `bytes` consumed bytes.
    #[inline]
    pub fn record_deallocation(&mut self, bytes: u64) {
        self.total_freed += bytes;
        self.deallocation_count += 1;
        self.current_usage = self.total_allocated - self.total_freed;
    }

    /// Zeroes every counter.
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "allocs: {} ({} B), frees: {} ({} B), current: {} B, peak: {} B, fragmentation: {}%",
            self.allocation_count,
            self.total_allocated,
            self.deallocation_count,
            self.total_freed,
            self.current_usage,
            self.peak_usage,
            self.fragmentation_pct
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_derivation() {
        let mut stats = MemoryStats::default();
        stats.record_allocation(1024);
        stats.record_allocation(2048);
        assert_eq!(stats.current_usage, 3072);
        assert_eq!(stats.allocation_count, 2);

        stats.record_deallocation(1024);
        assert_eq!(stats.current_usage, 2048);
        assert_eq!(stats.total_allocated - stats.total_freed, stats.current_usage);
    }

    #[test]
    fn test_peak_tracks_running_max() {
        let mut stats = MemoryStats::default();
        stats.record_allocation(100);
        stats.record_allocation(400);
        stats.record_deallocation(400);
        stats.record_allocation(50);

        assert_eq!(stats.peak_usage, 500);
        assert_eq!(stats.current_usage, 150);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let mut stats = MemoryStats::default();
        stats.record_allocation(64);
        stats.reset();
        assert_eq!(stats, MemoryStats::default());
    }
}
