//! # Allocator Contract
//!
//! The trait every engine allocator implements, so the manager (and
//! diagnostics) can route requests through one seam regardless of the
//! allocation strategy behind it.

use std::ptr::NonNull;

use crate::stats::MemoryStats;

/// Common contract for pool and stack allocators.
///
/// All methods take `&self`: implementations guard their internal state
/// with their own lock and are safe to share behind an `Arc`. Allocation
/// failure is a `None`, never a panic.
pub trait Allocator: Send + Sync {
    /// Allocates `size` bytes aligned to `alignment`.
    ///
    /// # Arguments
    ///
    /// * `size` - Request size in bytes; zero yields None
    /// * `alignment` - Power of two; anything else yields None
    fn allocate(&self, size: usize, alignment: usize) -> Option<NonNull<u8>>;

    /// Returns an allocation to the allocator.
    ///
    /// No-op when the pointer is not owned by this allocator, and for
    /// allocators without per-allocation free (stacks).
    fn deallocate(&self, ptr: NonNull<u8>);

    /// Resizes an allocation, preserving contents up to the smaller size.
    ///
    /// # Returns
    ///
    /// The (possibly moved) pointer, or None when the allocator does not
    /// support reallocation, does not own `ptr`, or cannot satisfy the
    /// new size - in which case the original allocation is untouched.
    fn reallocate(&self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>>;

    /// Usable bytes from `ptr` to the end of its allocation, if known.
    fn allocation_size(&self, ptr: NonNull<u8>) -> Option<usize>;

    /// Returns true if `ptr` points into a live allocation of this
    /// allocator.
    fn owns(&self, ptr: NonNull<u8>) -> bool;

    /// Snapshot of this allocator's statistics.
    fn stats(&self) -> MemoryStats;

    /// Releases every allocation at once, invalidating all outstanding
    /// pointers from this allocator.
    fn reset(&self);

    /// Diagnostic name.
    fn name(&self) -> &str;
}
