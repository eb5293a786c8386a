//! # Allocation Tracker
//!
//! Process-wide ledger of live allocations and cumulative statistics.
//!
//! Tracking is purely observational: it never influences whether an
//! allocation succeeds, and every entry point is a no-op while the
//! tracker is disabled. Pools report under their configured name; the
//! manager reports under the caller's tag, with the call site captured
//! by the allocation macros. Whatever is still in the ledger at shutdown
//! is, by definition, a leak.
//!
//! ## Thread Safety
//!
//! The enable flag is a lock-free atomic so disabled tracking costs one
//! relaxed load. The ledger and its stats live behind a single exclusive
//! lock, always acquired after any allocator lock, never before.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::stats::MemoryStats;

/// Source location captured by the allocation macros.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallSite {
    /// Source file, as produced by `file!()`.
    pub file: &'static str,
    /// Line number, as produced by `line!()`.
    pub line: u32,
}

impl CallSite {
    /// Creates a call site from `file!()` / `line!()` values.
    #[must_use]
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One live allocation, from creation until the matching deallocation.
#[derive(Clone, Debug)]
pub struct AllocationRecord {
    /// Address the caller received.
    pub address: usize,
    /// Requested size in bytes.
    pub size: usize,
    /// Requested alignment in bytes.
    pub alignment: usize,
    /// Free-form diagnostic label (caller tag or pool name).
    pub tag: String,
    /// Allocation site, when captured by a macro.
    pub call_site: Option<CallSite>,
    /// When the allocation happened.
    pub allocated_at: Instant,
    /// Whether this was an array allocation.
    pub is_array: bool,
}

/// Ledger state guarded by the tracker's lock.
struct Ledger {
    /// Live records keyed by address.
    records: HashMap<usize, AllocationRecord>,
    /// Global statistics, in requested-bytes units.
    stats: MemoryStats,
}

/// Process-wide allocation ledger and leak detector.
pub struct AllocationTracker {
    /// Global toggle; all tracking calls no-op while false.
    enabled: AtomicBool,
    /// Records and stats, one lock for both.
    ledger: Mutex<Ledger>,
}

impl AllocationTracker {
    /// Creates a tracker with tracking enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            ledger: Mutex::new(Ledger {
                records: HashMap::new(),
                stats: MemoryStats::default(),
            }),
        }
    }

    /// Toggles tracking process-wide.
    ///
    /// Disabling freezes the ledger: existing records stay until a
    /// matching deallocation arrives while tracking is enabled again.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::Relaxed);
        if was != enabled {
            tracing::debug!("allocation tracking {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    /// Returns whether tracking is currently enabled.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Registers a new allocation.
    ///
    /// # Arguments
    ///
    /// * `address` - Address the caller received
    /// * `size` - Requested size in bytes
    /// * `alignment` - Requested alignment in bytes
    /// * `tag` - Diagnostic label for leak attribution
    /// * `call_site` - Allocation site, when known
    /// * `is_array` - Whether this was an array allocation
    pub fn track_allocation(
        &self,
        address: usize,
        size: usize,
        alignment: usize,
        tag: &str,
        call_site: Option<CallSite>,
        is_array: bool,
    ) {
        if !self.is_enabled() {
            return;
        }

        let record = AllocationRecord {
            address,
            size,
            alignment,
            tag: tag.to_string(),
            call_site,
            allocated_at: Instant::now(),
            is_array,
        };

        let mut ledger = self.ledger.lock();
        if let Some(prev) = ledger.records.insert(address, record) {
            // A collision means the matching deallocation was never seen.
            tracing::warn!(
                "tracking collision at {:#x}: replacing '{}' ({} bytes)",
                address,
                prev.tag,
                prev.size
            );
        }
        ledger.stats.record_allocation(size as u64);
    }

    /// Registers a deallocation. Unknown addresses are silently ignored.
    pub fn track_deallocation(&self, address: usize) {
        if !self.is_enabled() {
            return;
        }

        let mut ledger = self.ledger.lock();
        if let Some(record) = ledger.records.remove(&address) {
            ledger.stats.record_deallocation(record.size as u64);
        }
    }

    /// Moves a record from `old_address` to `new_address` with `new_size`.
    ///
    /// The tag, call site, array flag, and creation time carry over, so a
    /// leak report points at the original allocation site. In-place
    /// reallocations (`old_address == new_address`) just update the size.
    pub fn track_reallocation(&self, old_address: usize, new_address: usize, new_size: usize) {
        if !self.is_enabled() {
            return;
        }

        let mut ledger = self.ledger.lock();
        let record = match ledger.records.remove(&old_address) {
            Some(old) => {
                ledger.stats.record_deallocation(old.size as u64);
                AllocationRecord {
                    address: new_address,
                    size: new_size,
                    ..old
                }
            }
            // The original predates tracking; record what we know.
            None => AllocationRecord {
                address: new_address,
                size: new_size,
                alignment: 1,
                tag: "reallocated".to_string(),
                call_site: None,
                allocated_at: Instant::now(),
                is_array: false,
            },
        };
        ledger.records.insert(new_address, record);
        ledger.stats.record_allocation(new_size as u64);
    }

    /// Snapshot of all live records, sorted by address.
    #[must_use]
    pub fn active_allocations(&self) -> Vec<AllocationRecord> {
        let ledger = self.ledger.lock();
        let mut records: Vec<_> = ledger.records.values().cloned().collect();
        records.sort_by_key(|r| r.address);
        records
    }

    /// Snapshot of all live records at shutdown time - the leaks.
    #[must_use]
    pub fn leaked_allocations(&self) -> Vec<AllocationRecord> {
        self.active_allocations()
    }

    /// Snapshot of the global statistics.
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.ledger.lock().stats
    }

    /// Logs the global statistics at info level.
    pub fn dump_stats(&self) {
        let stats = self.stats();
        tracing::info!("allocation stats: {}", stats);
    }

    /// Logs every live record as a leak and returns how many there were.
    ///
    /// Biggest leaks first, so the report leads with what matters.
    pub fn dump_leaks(&self) -> usize {
        let mut leaks = self.leaked_allocations();
        if leaks.is_empty() {
            tracing::info!("no memory leaks detected");
            return 0;
        }

        leaks.sort_by(|a, b| b.size.cmp(&a.size).then(a.address.cmp(&b.address)));
        let total_bytes: usize = leaks.iter().map(|r| r.size).sum();
        tracing::warn!("{} leaked allocations, {} bytes total", leaks.len(), total_bytes);

        for leak in &leaks {
            let origin = leak
                .call_site
                .map_or_else(String::new, |site| format!(", from {site}"));
            tracing::warn!(
                "leak: {} bytes at {:#x}, tag '{}'{}, age {:?}",
                leak.size,
                leak.address,
                leak.tag,
                origin,
                leak.allocated_at.elapsed()
            );
        }
        leaks.len()
    }

    /// Clears the ledger and zeroes the statistics.
    ///
    /// A testing aid: production code lets the records stand so shutdown
    /// can report them.
    pub fn reset(&self) {
        let mut ledger = self.ledger.lock();
        ledger.records.clear();
        ledger.stats.reset();
    }
}

impl Default for AllocationTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_and_release_counts() {
        let tracker = AllocationTracker::new();
        tracker.track_allocation(0x1000, 1024, 16, "meshes", None, false);
        tracker.track_allocation(0x2000, 2048, 16, "textures", None, false);
        tracker.track_allocation(0x3000, 512, 8, "audio", None, true);
        assert_eq!(tracker.active_allocations().len(), 3);

        tracker.track_deallocation(0x1000);
        tracker.track_deallocation(0x3000);
        assert_eq!(tracker.active_allocations().len(), 1);
        assert_eq!(tracker.active_allocations()[0].tag, "textures");

        tracker.track_deallocation(0x2000);
        assert_eq!(tracker.dump_leaks(), 0);
    }

    #[test]
    fn test_stats_usage_invariant() {
        let tracker = AllocationTracker::new();
        tracker.track_allocation(0x1000, 100, 8, "a", None, false);
        tracker.track_allocation(0x2000, 300, 8, "b", None, false);
        tracker.track_deallocation(0x1000);

        let stats = tracker.stats();
        assert_eq!(stats.total_allocated, 400);
        assert_eq!(stats.total_freed, 100);
        assert_eq!(stats.current_usage, 300);
        assert_eq!(stats.current_usage, stats.total_allocated - stats.total_freed);
    }

    #[test]
    fn test_unknown_address_ignored() {
        let tracker = AllocationTracker::new();
        tracker.track_deallocation(0xdead_0000);
        assert_eq!(tracker.stats(), MemoryStats::default());
    }

    #[test]
    fn test_disabled_tracker_is_noop() {
        let tracker = AllocationTracker::new();
        tracker.set_enabled(false);
        assert!(!tracker.is_enabled());

        tracker.track_allocation(0x1000, 64, 8, "ignored", None, false);
        assert!(tracker.active_allocations().is_empty());
        assert_eq!(tracker.stats(), MemoryStats::default());
    }

    #[test]
    fn test_realloc_carries_provenance() {
        let tracker = AllocationTracker::new();
        let site = CallSite::new("world_gen.rs", 42);
        tracker.track_allocation(0x1000, 256, 16, "chunks", Some(site), false);

        tracker.track_reallocation(0x1000, 0x5000, 1024);
        let records = tracker.active_allocations();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, 0x5000);
        assert_eq!(records[0].size, 1024);
        assert_eq!(records[0].tag, "chunks");
        assert_eq!(records[0].call_site, Some(site));

        let stats = tracker.stats();
        assert_eq!(stats.total_allocated, 256 + 1024);
        assert_eq!(stats.total_freed, 256);
        assert_eq!(stats.current_usage, 1024);
    }

    #[test]
    fn test_realloc_in_place_updates_size() {
        let tracker = AllocationTracker::new();
        tracker.track_allocation(0x1000, 128, 8, "scratch", None, false);
        tracker.track_reallocation(0x1000, 0x1000, 64);

        let records = tracker.active_allocations();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].size, 64);
        assert_eq!(tracker.stats().current_usage, 64);
    }

    #[test]
    fn test_collision_replaces_record() {
        let tracker = AllocationTracker::new();
        tracker.track_allocation(0x1000, 100, 8, "first", None, false);
        tracker.track_allocation(0x1000, 200, 8, "second", None, false);

        let records = tracker.active_allocations();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tag, "second");
    }

    #[test]
    fn test_dump_leaks_counts_live_records() {
        let tracker = AllocationTracker::new();
        tracker.track_allocation(0x1000, 64, 8, "a", None, false);
        tracker.track_allocation(0x2000, 32, 8, "b", None, false);
        assert_eq!(tracker.dump_leaks(), 2);

        tracker.track_deallocation(0x1000);
        tracker.track_deallocation(0x2000);
        assert_eq!(tracker.dump_leaks(), 0);
    }

    #[test]
    fn test_reset_clears_ledger() {
        let tracker = AllocationTracker::new();
        tracker.track_allocation(0x1000, 64, 8, "a", None, false);
        tracker.reset();
        assert!(tracker.active_allocations().is_empty());
        assert_eq!(tracker.stats(), MemoryStats::default());
    }
}
