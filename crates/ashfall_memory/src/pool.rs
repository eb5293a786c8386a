//! # Block Pool Allocator
//!
//! General-purpose allocator over one or more committed arenas.
//!
//! ## Design Principles
//!
//! 1. **First fit in address order** - free blocks are scanned through an
//!    ordered index, lowest address first
//! 2. **Eager merge** - no two adjacent free blocks survive any operation
//! 3. **Bounded growth** - new arenas are committed on demand, never past
//!    the configured maximum
//! 4. **Failure is a value** - an impossible request returns None and
//!    leaves every structure untouched
//!
//! ## Architecture
//!
//! ```text
//!   MemoryPool
//!   ├── arenas:  [Arena 0]  [Arena 1]  ...     committed segments
//!   ├── blocks:  slab of Block records, linked per arena by index:
//!   │
//!   │     Arena 0:  [used 1024][free 2048][used 512][free ...]
//!   │                 ^prev/next links form the address-ordered chain
//!   │
//!   └── index:   BTreeMap<absolute start address, block id>
//!                  one entry per live block, every arena interleaved
//! ```
//!
//! A pointer is mapped back to its block with a ranged lookup on the
//! index: the nearest start address at or below the pointer either
//! contains it or proves no block does.
//!
//! ## Thread Safety
//!
//! All mutable state sits behind one exclusive lock. The tracker, when
//! attached, is notified after that lock is released, so the allocator
//! lock and the tracker lock are never held together in this module.

use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::align::align_padding;
use crate::allocator::Allocator;
use crate::arena::Arena;
use crate::config::PoolConfig;
use crate::error::MemoryResult;
use crate::stats::MemoryStats;
use crate::tracker::AllocationTracker;

/// Nil slab link.
const NIL: u32 = u32::MAX;

/// One logical run of bytes inside an arena.
#[derive(Clone, Copy, Debug)]
struct Block {
    /// Offset of the block's first byte from its arena base.
    offset: usize,
    /// Block length in bytes.
    size: usize,
    /// Whether the block currently backs an allocation.
    used: bool,
    /// Slab index of the address-previous block in the same arena.
    prev: u32,
    /// Slab index of the address-next block in the same arena.
    next: u32,
    /// Index of the owning arena.
    arena: u32,
}

/// Mutable pool state guarded by the pool's lock.
struct PoolState {
    /// Committed segments, in commit order.
    arenas: Vec<Arena>,
    /// Block slab; retired entries are recycled through `free_slots`.
    blocks: Vec<Block>,
    /// Retired slab indices available for reuse.
    free_slots: Vec<u32>,
    /// Live blocks keyed by absolute start address.
    index: BTreeMap<usize, u32>,
    /// Total bytes committed across all arenas.
    committed: usize,
    /// This pool's statistics, in consumed-bytes units.
    stats: MemoryStats,
}

/// Block allocator with splitting, merging, and bounded growth.
pub struct MemoryPool {
    /// Immutable configuration.
    config: PoolConfig,
    /// All mutable state.
    state: Mutex<PoolState>,
    /// Tracker handle for self-reporting pools.
    tracker: Option<Arc<AllocationTracker>>,
}

impl MemoryPool {
    /// Creates a pool from `config` without tracker reporting.
    ///
    /// # Errors
    ///
    /// [`MemoryError`](crate::error::MemoryError::InvalidConfig) when the
    /// config violates an invariant. A refused initial arena is NOT an
    /// error: the pool starts empty, logs a warning, and the first
    /// allocation retries through growth.
    pub fn new(config: PoolConfig) -> MemoryResult<Self> {
        Self::with_tracker(config, None)
    }

    /// Creates a pool that reports its allocations to `tracker` under
    /// the pool's name.
    ///
    /// # Errors
    ///
    /// Same as [`MemoryPool::new`].
    pub fn with_tracker(
        config: PoolConfig,
        tracker: Option<Arc<AllocationTracker>>,
    ) -> MemoryResult<Self> {
        config.validate()?;

        let mut state = PoolState {
            arenas: Vec::new(),
            blocks: Vec::new(),
            free_slots: Vec::new(),
            index: BTreeMap::new(),
            committed: 0,
            stats: MemoryStats::default(),
        };

        if config.initial_size > 0 {
            match Arena::commit(config.initial_size, config.alignment) {
                Ok(arena) => Self::install_arena(&mut state, arena),
                Err(e) => tracing::warn!(
                    "pool '{}': initial arena commit failed ({} bytes): {}; pool starts empty",
                    config.name,
                    config.initial_size,
                    e
                ),
            }
        }

        tracing::debug!(
            "pool '{}' created: {} bytes committed, max {}",
            config.name,
            state.committed,
            config.max_size
        );

        Ok(Self {
            config,
            state: Mutex::new(state),
            tracker,
        })
    }

    /// Allocates `size` bytes aligned to `alignment`.
    ///
    /// Scans free blocks first fit; when nothing fits, commits one new
    /// arena within the configured maximum and retries. The chosen block
    /// is split when the leftover tail is at least the configured
    /// granularity.
    ///
    /// # Arguments
    ///
    /// * `size` - Request size in bytes; zero yields None
    /// * `alignment` - Power of two; anything else yields None
    ///
    /// # Returns
    ///
    /// The aligned pointer, or None when the pool cannot satisfy the
    /// request even after growth.
    pub fn allocate(&self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if size == 0 || !alignment.is_power_of_two() {
            return None;
        }

        let ptr = {
            let mut state = self.state.lock();
            Self::allocate_locked(&mut state, &self.config, size, alignment)?
        };

        if let Some(tracker) = &self.tracker {
            tracker.track_allocation(
                ptr.as_ptr() as usize,
                size,
                alignment,
                &self.config.name,
                None,
                false,
            );
        }
        Some(ptr)
    }

    /// Returns an allocation to the pool and merges free neighbors.
    ///
    /// A pointer this pool does not own is a silent no-op.
    pub fn deallocate(&self, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        let freed = {
            let mut state = self.state.lock();
            Self::free_locked(&mut state, addr)
        };

        if freed.is_some() {
            if let Some(tracker) = &self.tracker {
                tracker.track_deallocation(addr);
            }
        }
    }

    /// Resizes an allocation.
    ///
    /// When `new_size` still fits the existing block the same pointer is
    /// returned unchanged. Otherwise a new block is allocated at the
    /// pool's default alignment, contents are copied, and the old block
    /// is freed.
    ///
    /// # Returns
    ///
    /// The (possibly moved) pointer. None when `new_size` is zero (the
    /// allocation is freed), the pointer is not owned by this pool, or
    /// the new block cannot be allocated - in which case the original
    /// allocation is left untouched.
    pub fn reallocate(&self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        if new_size == 0 {
            self.deallocate(ptr);
            return None;
        }

        let addr = ptr.as_ptr() as usize;
        let new_ptr = {
            let mut state = self.state.lock();
            Self::reallocate_locked(&mut state, &self.config, addr, new_size)?
        };

        if let Some(tracker) = &self.tracker {
            tracker.track_reallocation(addr, new_ptr.as_ptr() as usize, new_size);
        }
        Some(new_ptr)
    }

    /// Returns true if `ptr` points into a live allocation of this pool.
    #[must_use]
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        let state = self.state.lock();
        Self::find_block_containing(&state, ptr.as_ptr() as usize)
            .is_some_and(|id| state.blocks[id as usize].used)
    }

    /// Usable bytes from `ptr` to the end of its block.
    #[must_use]
    pub fn allocation_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        let addr = ptr.as_ptr() as usize;
        let state = self.state.lock();
        let id = Self::find_block_containing(&state, addr)?;
        let block = &state.blocks[id as usize];
        if !block.used {
            return None;
        }
        let start = state.arenas[block.arena as usize].base_addr() + block.offset;
        Some(block.size - (addr - start))
    }

    /// Percentage of free space outside the largest free block, 0-100.
    ///
    /// Zero both when the pool is unfragmented and when it has no free
    /// space at all.
    #[must_use]
    pub fn fragmentation_pct(&self) -> u32 {
        let state = self.state.lock();
        Self::fragmentation_locked(&state)
    }

    /// Snapshot of this pool's statistics, fragmentation included.
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        let state = self.state.lock();
        let mut stats = state.stats;
        stats.fragmentation_pct = Self::fragmentation_locked(&state);
        stats
    }

    /// Releases every arena beyond the first, frees all blocks, and
    /// zeroes the stats.
    ///
    /// Every outstanding pointer from this pool is invalidated. Tracker
    /// records are not retracted; a reset between logical phases with
    /// live tracked allocations will surface them in the leak report.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.arenas.truncate(1);
        let first = state.arenas.pop();

        state.blocks.clear();
        state.free_slots.clear();
        state.index.clear();
        state.committed = 0;
        state.stats.reset();

        if let Some(arena) = first {
            Self::install_arena(&mut state, arena);
        }
        tracing::debug!("pool '{}' reset", self.config.name);
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The configuration this pool was built from.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    // =========================================================================
    // Locked internals. Everything below expects the state lock to be
    // held by the caller and must not call the public methods above.
    // =========================================================================

    /// Adds a committed arena and its spanning free block to the state.
    fn install_arena(state: &mut PoolState, arena: Arena) {
        let arena_idx = state.arenas.len() as u32;
        let base = arena.base_addr();
        let block = Block {
            offset: 0,
            size: arena.len(),
            used: false,
            prev: NIL,
            next: NIL,
            arena: arena_idx,
        };
        state.committed += arena.len();
        state.arenas.push(arena);

        let id = Self::insert_block(state, block);
        state.index.insert(base, id);
    }

    /// Stores a block record, recycling a retired slab slot when one
    /// exists.
    fn insert_block(state: &mut PoolState, block: Block) -> u32 {
        if let Some(id) = state.free_slots.pop() {
            state.blocks[id as usize] = block;
            id
        } else {
            let id = state.blocks.len() as u32;
            state.blocks.push(block);
            id
        }
    }

    /// First-fit scan: lowest-addressed free block where the aligned
    /// request fits. Returns the block id and the alignment padding.
    fn find_fit(state: &PoolState, size: usize, alignment: usize) -> Option<(u32, usize)> {
        for (&addr, &id) in &state.index {
            let block = &state.blocks[id as usize];
            if block.used {
                continue;
            }
            let padding = align_padding(addr, alignment);
            if let Some(needed) = size.checked_add(padding) {
                if needed <= block.size {
                    return Some((id, padding));
                }
            }
        }
        None
    }

    /// Commits one growth arena big enough for the request, bounded by
    /// the configured maximum total size.
    fn grow(
        state: &mut PoolState,
        config: &PoolConfig,
        size: usize,
        alignment: usize,
    ) -> Option<()> {
        // Worst-case padding bound: the request fits anywhere in the new
        // arena if the arena holds size + alignment bytes.
        let need = size.checked_add(alignment)?;
        let headroom = config.max_size.saturating_sub(state.committed);
        if need > headroom {
            tracing::debug!(
                "pool '{}': growth refused, need {} bytes but headroom is {}",
                config.name,
                need,
                headroom
            );
            return None;
        }

        let want = need.max(config.block_granularity).min(headroom);
        match Arena::commit(want, config.alignment) {
            Ok(arena) => {
                tracing::debug!("pool '{}': grew by {} bytes", config.name, want);
                Self::install_arena(state, arena);
                Some(())
            }
            Err(e) => {
                tracing::warn!("pool '{}': arena growth failed: {}", config.name, e);
                None
            }
        }
    }

    /// Allocation with the lock held: find fit, grow once if needed,
    /// split, mark used, count.
    fn allocate_locked(
        state: &mut PoolState,
        config: &PoolConfig,
        size: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>> {
        let (id, padding) = match Self::find_fit(state, size, alignment) {
            Some(fit) => fit,
            None => {
                Self::grow(state, config, size, alignment)?;
                Self::find_fit(state, size, alignment)?
            }
        };
        Some(Self::consume(state, config, id, padding, size))
    }

    /// Marks the fitted block used, splitting off the tail when it is
    /// worth a block of its own.
    fn consume(
        state: &mut PoolState,
        config: &PoolConfig,
        id: u32,
        padding: usize,
        size: usize,
    ) -> NonNull<u8> {
        let (offset, total, arena_idx, next_id) = {
            let block = &state.blocks[id as usize];
            (block.offset, block.size, block.arena, block.next)
        };
        let needed = padding + size;
        let slack = total - needed;

        if slack >= config.block_granularity {
            let tail = Block {
                offset: offset + needed,
                size: slack,
                used: false,
                prev: id,
                next: next_id,
                arena: arena_idx,
            };
            let tail_id = Self::insert_block(state, tail);
            if next_id != NIL {
                state.blocks[next_id as usize].prev = tail_id;
            }
            {
                let block = &mut state.blocks[id as usize];
                block.size = needed;
                block.next = tail_id;
            }
            let tail_addr = state.arenas[arena_idx as usize].base_addr() + offset + needed;
            state.index.insert(tail_addr, tail_id);
        }

        let consumed = state.blocks[id as usize].size;
        state.blocks[id as usize].used = true;
        state.stats.record_allocation(consumed as u64);

        state.arenas[arena_idx as usize].ptr_at(offset + padding)
    }

    /// Maps an address to the live block containing it, if any.
    fn find_block_containing(state: &PoolState, addr: usize) -> Option<u32> {
        let (&start, &id) = state.index.range(..=addr).next_back()?;
        let block = &state.blocks[id as usize];
        if addr < start + block.size {
            Some(id)
        } else {
            None
        }
    }

    /// Free with the lock held: mark free, merge neighbors, count.
    /// Returns the consumed bytes released, None for unowned addresses.
    fn free_locked(state: &mut PoolState, addr: usize) -> Option<u64> {
        let id = Self::find_block_containing(state, addr)?;
        if !state.blocks[id as usize].used {
            return None;
        }

        let freed = state.blocks[id as usize].size as u64;
        state.blocks[id as usize].used = false;

        let next_id = state.blocks[id as usize].next;
        if next_id != NIL && !state.blocks[next_id as usize].used {
            Self::merge_into(state, id, next_id);
        }
        let prev_id = state.blocks[id as usize].prev;
        if prev_id != NIL && !state.blocks[prev_id as usize].used {
            Self::merge_into(state, prev_id, id);
        }

        state.stats.record_deallocation(freed);
        Some(freed)
    }

    /// Merges `absorb` into its address-previous neighbor `keep`.
    fn merge_into(state: &mut PoolState, keep: u32, absorb: u32) {
        let (a_offset, a_size, a_next, a_arena) = {
            let block = &state.blocks[absorb as usize];
            (block.offset, block.size, block.next, block.arena)
        };
        let absorb_addr = state.arenas[a_arena as usize].base_addr() + a_offset;
        state.index.remove(&absorb_addr);

        {
            let block = &mut state.blocks[keep as usize];
            block.size += a_size;
            block.next = a_next;
        }
        if a_next != NIL {
            state.blocks[a_next as usize].prev = keep;
        }
        state.free_slots.push(absorb);
    }

    /// Reallocation with the lock held.
    fn reallocate_locked(
        state: &mut PoolState,
        config: &PoolConfig,
        addr: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let id = Self::find_block_containing(state, addr)?;
        let block = state.blocks[id as usize];
        if !block.used {
            return None;
        }

        let start = state.arenas[block.arena as usize].base_addr() + block.offset;
        let within = addr - start;
        let usable = block.size - within;

        if new_size <= usable {
            return Some(state.arenas[block.arena as usize].ptr_at(block.offset + within));
        }

        let new_ptr = Self::allocate_locked(state, config, new_size, config.alignment)?;
        let new_addr = new_ptr.as_ptr() as usize;
        let new_id = Self::find_block_containing(state, new_addr)?;
        let new_block = state.blocks[new_id as usize];

        let src_arena = &state.arenas[block.arena as usize];
        let dst_arena = &state.arenas[new_block.arena as usize];
        Arena::copy_between(
            src_arena,
            addr - src_arena.base_addr(),
            dst_arena,
            new_addr - dst_arena.base_addr(),
            usable.min(new_size),
        );

        let freed = Self::free_locked(state, addr);
        debug_assert!(freed.is_some(), "old block vanished during reallocate");
        Some(new_ptr)
    }

    /// Fragmentation with the lock held.
    fn fragmentation_locked(state: &PoolState) -> u32 {
        let mut total_free: u64 = 0;
        let mut largest_free: u64 = 0;
        for &id in state.index.values() {
            let block = &state.blocks[id as usize];
            if block.used {
                continue;
            }
            total_free += block.size as u64;
            largest_free = largest_free.max(block.size as u64);
        }

        if total_free == 0 {
            0
        } else {
            (((total_free - largest_free) * 100) / total_free) as u32
        }
    }
}

impl Allocator for MemoryPool {
    fn allocate(&self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        Self::allocate(self, size, alignment)
    }

    fn deallocate(&self, ptr: NonNull<u8>) {
        Self::deallocate(self, ptr);
    }

    fn reallocate(&self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        Self::reallocate(self, ptr, new_size)
    }

    fn allocation_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        Self::allocation_size(self, ptr)
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
