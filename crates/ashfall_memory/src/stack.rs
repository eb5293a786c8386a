//! # Stack Allocator
//!
//! LIFO scratch memory over one fixed arena.
//!
//! Allocation bumps a monotonic offset; there is no per-allocation free.
//! Callers capture a [`StackMarker`] before a burst of temporary work and
//! roll the whole burst back in one call. This is the frame-scratch
//! pattern: capture at frame start, allocate freely, roll back at frame
//! end.
//!
//! ## Thread Safety
//!
//! The offset and stats sit behind one exclusive lock. Markers are plain
//! values and may be captured and replayed from any thread, but they are
//! only meaningful for the allocator that produced them.

use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::align::align_padding;
use crate::allocator::Allocator;
use crate::arena::Arena;
use crate::config::DEFAULT_ALIGNMENT;
use crate::error::{MemoryError, MemoryResult};
use crate::stats::MemoryStats;

/// Opaque snapshot of a stack allocator's offset.
///
/// Obtained from [`StackAllocator::marker`] and consumed by
/// [`StackAllocator::free_to_marker`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct StackMarker(usize);

/// Mutable state guarded by the stack's lock.
struct StackState {
    /// Current bump offset from the arena base.
    offset: usize,
    /// This allocator's statistics.
    stats: MemoryStats,
}

/// Bump allocator with marker-based bulk rollback.
pub struct StackAllocator {
    /// The one backing segment, committed at construction.
    arena: Arena,
    /// Diagnostic name.
    name: String,
    /// Offset and stats.
    state: Mutex<StackState>,
}

impl StackAllocator {
    /// Creates a stack allocator with a `size`-byte arena.
    ///
    /// # Arguments
    ///
    /// * `size` - Arena size in bytes, must be nonzero
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] for a zero size, and
    /// [`MemoryError::ArenaCommitFailed`] when the system refuses the
    /// arena. Commit failure is fatal here: a stack allocator with no
    /// memory has no degraded mode, unlike a pool.
    pub fn new(size: usize) -> MemoryResult<Self> {
        Self::named(size, "StackAllocator")
    }

    /// Creates a stack allocator with a custom diagnostic name.
    ///
    /// # Errors
    ///
    /// Same as [`StackAllocator::new`].
    pub fn named(size: usize, name: &str) -> MemoryResult<Self> {
        if size == 0 {
            return Err(MemoryError::InvalidConfig(
                "stack allocator size must be nonzero".to_string(),
            ));
        }
        let arena = Arena::commit(size, DEFAULT_ALIGNMENT)?;
        tracing::debug!("stack allocator '{}' created: {} bytes", name, size);

        Ok(Self {
            arena,
            name: name.to_string(),
            state: Mutex::new(StackState {
                offset: 0,
                stats: MemoryStats::default(),
            }),
        })
    }

    /// Allocates `size` bytes aligned to `alignment` by bumping the
    /// offset.
    ///
    /// # Arguments
    ///
    /// * `size` - Request size in bytes; zero yields None
    /// * `alignment` - Power of two; anything else yields None
    ///
    /// # Returns
    ///
    /// The aligned pointer, or None when the arena would overflow.
    pub fn allocate(&self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if size == 0 || !alignment.is_power_of_two() {
            return None;
        }

        let mut state = self.state.lock();
        // Alignment is computed on the absolute address, so requests
        // larger than the arena's base alignment still come out right.
        let padding = align_padding(self.arena.base_addr() + state.offset, alignment);
        let aligned = state.offset.checked_add(padding)?;
        let new_offset = aligned.checked_add(size)?;
        if new_offset > self.arena.len() {
            return None;
        }

        let ptr = self.arena.ptr_at(aligned);
        state.stats.record_allocation((padding + size) as u64);
        state.offset = new_offset;
        Some(ptr)
    }

    /// Captures the current offset.
    #[must_use]
    pub fn marker(&self) -> StackMarker {
        StackMarker(self.state.lock().offset)
    }

    /// Rolls the offset back to `marker`, releasing everything allocated
    /// since it was captured.
    ///
    /// A marker ahead of the current offset (stale, or from another
    /// allocator) is ignored.
    pub fn free_to_marker(&self, marker: StackMarker) {
        let mut state = self.state.lock();
        if marker.0 > state.offset {
            tracing::debug!(
                "stack '{}': marker at {} is ahead of offset {}, ignored",
                self.name,
                marker.0,
                state.offset
            );
            return;
        }

        let freed = state.offset - marker.0;
        if freed > 0 {
            state.stats.record_deallocation(freed as u64);
        }
        state.offset = marker.0;
    }

    /// Rolls back to the initial marker and zeroes the stats.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.offset = 0;
        state.stats.reset();
    }

    /// Current bump offset in bytes from the arena base.
    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.state.lock().offset
    }

    /// Total arena size in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    /// Bytes left before the arena overflows (ignoring padding).
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.current_offset()
    }

    /// Returns true if `ptr` points into the currently allocated region.
    #[must_use]
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        let base = self.arena.base_addr();
        addr >= base && addr < base + self.current_offset()
    }

    /// Snapshot of this allocator's statistics.
    ///
    /// Fragmentation is always zero: the free region of a stack is one
    /// contiguous tail.
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.state.lock().stats
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Allocator for StackAllocator {
    fn allocate(&self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        Self::allocate(self, size, alignment)
    }

    /// Individual free is not supported; use markers. No-op.
    fn deallocate(&self, _ptr: NonNull<u8>) {}

    /// Reallocation is not supported. Always None.
    fn reallocate(&self, _ptr: NonNull<u8>, _new_size: usize) -> Option<NonNull<u8>> {
        None
    }

    /// Per-allocation sizes are not recorded. Always None.
    fn allocation_size(&self, _ptr: NonNull<u8>) -> Option<usize> {
        None
    }

    fn owns(&self, ptr: NonNull<u8>) -> bool {
        Self::owns(self, ptr)
    }

    fn stats(&self) -> MemoryStats {
        Self::stats(self)
    }

    fn reset(&self) {
        Self::reset(self);
    }

    fn name(&self) -> &str {
        Self::name(self)
    }
}
