//! # Arena Commitment
//!
//! Committed system-memory segments and the raw system-heap fallback.
//!
//! ## Safety Note
//!
//! This is the only module in the crate that touches raw memory. All
//! unsafe blocks are carefully reviewed and documented. Everything above
//! this layer works with integer offsets and `NonNull` values it received
//! from here; no other module needs `unsafe`.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::collections::HashMap;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::error::{MemoryError, MemoryResult};

/// One committed system-memory segment.
///
/// An arena is committed zeroed at construction and released when
/// dropped. It never moves and never changes size, so addresses derived
/// from it stay valid for its whole lifetime. Owners (pools and stack
/// allocators) carve it into logical ranges; the arena itself knows
/// nothing about blocks.
pub struct Arena {
    /// Base of the committed segment.
    base: NonNull<u8>,
    /// Layout used at commit time, needed again at release.
    layout: Layout,
}

impl Arena {
    /// Commits a zeroed segment of `size` bytes aligned to `align`.
    ///
    /// # Arguments
    ///
    /// * `size` - Segment length in bytes, must be nonzero
    /// * `align` - Base alignment in bytes, must be a power of two
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidLayout`] for a zero size or an invalid
    /// size/alignment pair, [`MemoryError::ArenaCommitFailed`] when the
    /// system allocator returns null.
    pub fn commit(size: usize, align: usize) -> MemoryResult<Self> {
        if size == 0 {
            return Err(MemoryError::InvalidLayout { size, align });
        }
        let layout = Layout::from_size_align(size, align)
            .map_err(|_| MemoryError::InvalidLayout { size, align })?;

        // SAFETY: layout has nonzero size, checked above.
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };

        let Some(base) = NonNull::new(raw) else {
            return Err(MemoryError::ArenaCommitFailed { requested: size });
        };

        tracing::debug!("arena committed: {} bytes at {:p}", size, base);
        Ok(Self { base, layout })
    }

    /// Returns the segment length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Returns the base address as an integer, for offset arithmetic.
    #[inline]
    #[must_use]
    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Returns true if `addr` falls inside this segment.
    #[inline]
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base_addr() && addr < self.base_addr() + self.len()
    }

    /// Derives a pointer to `offset` bytes past the base.
    ///
    /// The pointer is derived from the base pointer, not reconstructed
    /// from an integer address, so it carries the segment's provenance.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is outside the segment. Callers compute offsets
    /// from block bookkeeping that never exceeds the segment length.
    #[inline]
    #[must_use]
    pub fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset < self.len(), "offset past end of arena");
        // SAFETY: base is valid for len() bytes and offset < len(), so
        // the derived pointer stays inside the committed segment.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    /// Copies `len` bytes between two arena regions (memmove semantics).
    ///
    /// Callers must serialize access to both arenas through their own
    /// lock; this function only checks bounds.
    ///
    /// # Panics
    ///
    /// Panics if either region runs past its segment.
    pub fn copy_between(
        src: &Self,
        src_offset: usize,
        dst: &Self,
        dst_offset: usize,
        len: usize,
    ) {
        assert!(
            src_offset + len <= src.len() && dst_offset + len <= dst.len(),
            "copy region past end of arena"
        );
        // SAFETY: both regions are in bounds of committed segments, and
        // std::ptr::copy permits overlap. The caller holds the lock that
        // makes it the sole accessor of both arenas.
        unsafe {
            std::ptr::copy(
                src.base.as_ptr().add(src_offset),
                dst.base.as_ptr().add(dst_offset),
                len,
            );
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        tracing::trace!("arena released: {} bytes at {:p}", self.len(), self.base);
        // SAFETY: base came from alloc_zeroed with exactly this layout
        // and is released exactly once, here.
        unsafe { std::alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

// SAFETY: Arena exclusively owns its segment; the struct itself only
// exposes address arithmetic and bounds-checked copies. Concurrent access
// to the bytes goes through pointers whose aliasing is managed by the
// owning allocator's lock.
unsafe impl Send for Arena {}
// SAFETY: see Send above; &Arena exposes no interior mutation of the
// segment besides copy_between, which owners serialize.
unsafe impl Sync for Arena {}

/// Raw system-heap fallback with a layout ledger.
///
/// Every pointer handed out is remembered together with its `Layout`, so
/// it can be freed or reallocated later without the caller supplying the
/// layout, and so unknown pointers can be told apart from our own.
pub struct SystemHeap {
    /// Live system allocations, keyed by address.
    ledger: Mutex<HashMap<usize, Layout>>,
}

impl SystemHeap {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates `size` bytes at `align` straight from the system heap.
    ///
    /// # Returns
    ///
    /// The new pointer, or None for a zero size, an invalid layout, or
    /// system-allocator failure.
    pub fn allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, align).ok()?;

        // SAFETY: layout has nonzero size, checked above.
        let raw = unsafe { std::alloc::alloc(layout) };
        let ptr = NonNull::new(raw)?;

        self.ledger.lock().insert(ptr.as_ptr() as usize, layout);
        Some(ptr)
    }

    /// Resizes a ledgered allocation, preserving its contents.
    ///
    /// # Returns
    ///
    /// The new pointer, or None if `ptr` is not in the ledger or the
    /// system allocator fails; the original allocation is left untouched
    /// on failure.
    pub fn reallocate(&self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        if new_size == 0 {
            return None;
        }
        let addr = ptr.as_ptr() as usize;
        let mut ledger = self.ledger.lock();
        let old_layout = *ledger.get(&addr)?;
        let new_layout = Layout::from_size_align(new_size, old_layout.align()).ok()?;

        // SAFETY: addr is in the ledger, so ptr denotes a live block we
        // allocated with old_layout; new_size forms a valid layout at the
        // same alignment, checked above.
        let raw = unsafe { std::alloc::realloc(ptr.as_ptr(), old_layout, new_size) };
        let new_ptr = NonNull::new(raw)?;

        ledger.remove(&addr);
        ledger.insert(new_ptr.as_ptr() as usize, new_layout);
        Some(new_ptr)
    }

    /// Frees a ledgered allocation.
    ///
    /// # Returns
    ///
    /// True if the pointer was ours and has been freed, false if it is
    /// unknown (in which case nothing happens).
    pub fn deallocate(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        let Some(layout) = self.ledger.lock().remove(&addr) else {
            return false;
        };
        // SAFETY: the ledger entry proves ptr is a live block we
        // allocated with exactly this layout, freed exactly once because
        // the entry was just removed.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        true
    }

    /// Returns true if `addr` is a live ledgered allocation.
    #[must_use]
    pub fn owns(&self, addr: usize) -> bool {
        self.ledger.lock().contains_key(&addr)
    }

    /// Number of live ledgered allocations.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.ledger.lock().len()
    }
}

impl Default for SystemHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_and_bounds() {
        let arena = Arena::commit(4096, 16).unwrap();
        assert_eq!(arena.len(), 4096);
        assert!(arena.contains(arena.base_addr()));
        assert!(arena.contains(arena.base_addr() + 4095));
        assert!(!arena.contains(arena.base_addr() + 4096));
    }

    #[test]
    fn test_commit_zero_size_rejected() {
        assert!(matches!(
            Arena::commit(0, 16),
            Err(MemoryError::InvalidLayout { .. })
        ));
    }

    #[test]
    fn test_commit_is_zeroed() {
        let arena = Arena::commit(256, 16).unwrap();
        let ptr = arena.ptr_at(0);
        // SAFETY: reading within the committed segment we exclusively own.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 256) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_ptr_at_matches_base_math() {
        let arena = Arena::commit(1024, 16).unwrap();
        let ptr = arena.ptr_at(100);
        assert_eq!(ptr.as_ptr() as usize, arena.base_addr() + 100);
    }

    #[test]
    #[should_panic(expected = "offset past end of arena")]
    fn test_ptr_at_out_of_bounds_panics() {
        let arena = Arena::commit(64, 16).unwrap();
        let _ = arena.ptr_at(64);
    }

    #[test]
    fn test_copy_between_arenas() {
        let src = Arena::commit(128, 16).unwrap();
        let dst = Arena::commit(128, 16).unwrap();

        // SAFETY: writing within a committed segment we exclusively own.
        unsafe {
            for i in 0..32 {
                src.ptr_at(i).as_ptr().write(i as u8);
            }
        }
        Arena::copy_between(&src, 0, &dst, 64, 32);

        // SAFETY: reading within the committed segment.
        let copied = unsafe { std::slice::from_raw_parts(dst.ptr_at(64).as_ptr(), 32) };
        for (i, &b) in copied.iter().enumerate() {
            assert_eq!(b, i as u8);
        }
    }

    #[test]
    fn test_system_heap_round_trip() {
        let heap = SystemHeap::new();
        let ptr = heap.allocate(512, 16).unwrap();
        assert!(heap.owns(ptr.as_ptr() as usize));
        assert_eq!(heap.live_count(), 1);

        assert!(heap.deallocate(ptr));
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn test_system_heap_rejects_unknown_pointer() {
        let heap = SystemHeap::new();
        let mut local = 0u8;
        let foreign = NonNull::new(std::ptr::addr_of_mut!(local)).unwrap();
        assert!(!heap.deallocate(foreign));
        assert!(heap.reallocate(foreign, 64).is_none());
    }

    #[test]
    fn test_system_heap_realloc_preserves_contents() {
        let heap = SystemHeap::new();
        let ptr = heap.allocate(64, 8).unwrap();
        // SAFETY: writing within the 64-byte block just allocated.
        unsafe {
            for i in 0..64 {
                ptr.as_ptr().add(i).write(i as u8);
            }
        }

        let grown = heap.reallocate(ptr, 256).unwrap();
        assert!(heap.owns(grown.as_ptr() as usize));
        // SAFETY: the first 64 bytes of the grown block are initialized.
        let bytes = unsafe { std::slice::from_raw_parts(grown.as_ptr(), 64) };
        for (i, &b) in bytes.iter().enumerate() {
            assert_eq!(b, i as u8);
        }

        assert!(heap.deallocate(grown));
    }
}
