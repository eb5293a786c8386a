//! # Memory Manager
//!
//! Facade over the crate's allocators. One default pool serves tagged
//! general-purpose requests, named pools and stack allocators are
//! registered for subsystems that want their own budgets, and a system
//! heap ledger catches everything the pools cannot hold.
//!
//! ## Routing
//!
//! ```text
//!   allocate(size, align, tag)
//!     └── default pool ──(exhausted)──> system heap
//!
//!   deallocate(ptr)
//!     └── default pool -> named pools -> stacks -> system heap
//!           first owner wins; stack pointers are ignored (marker-only)
//! ```
//!
//! ## Lifecycle
//!
//! The manager is usable before [`MemoryManager::initialize`]: every
//! request lands on the system heap and is still tracked. `initialize`
//! commits the default pool; [`MemoryManager::shutdown`] drops every
//! registered allocator, dumps statistics and the leak report, and
//! returns the manager to fallback-only operation.
//!
//! ## Thread Safety
//!
//! The structural lock only guards registration and lookup. It is never
//! held while an allocator or the tracker does work, so allocator locks
//! and the tracker lock stay independent of it.

use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::arena::SystemHeap;
use crate::config::PoolConfig;
use crate::error::MemoryResult;
use crate::pool::MemoryPool;
use crate::stack::StackAllocator;
use crate::stats::MemoryStats;
use crate::tracker::{AllocationTracker, CallSite};

/// Registered allocators plus lifecycle state.
struct ManagerState {
    /// Pool serving untargeted requests, present after initialization.
    default_pool: Option<Arc<MemoryPool>>,
    /// Subsystem pools registered through
    /// [`MemoryManager::create_pool`].
    pools: Vec<Arc<MemoryPool>>,
    /// Registered stack allocators.
    stacks: Vec<Arc<StackAllocator>>,
    /// Whether `initialize` has run without a matching `shutdown`.
    initialized: bool,
}

/// Central entry point for allocation, routing, and diagnostics.
pub struct MemoryManager {
    /// Registration state; read-locked for routing, write-locked for
    /// structural changes only.
    state: RwLock<ManagerState>,
    /// Shared ledger of live allocations.
    tracker: Arc<AllocationTracker>,
    /// Fallback heap with its own pointer ledger.
    system: SystemHeap,
}

impl MemoryManager {
    /// Creates an uninitialized manager. Requests route to the system
    /// heap until [`MemoryManager::initialize`] commits a default pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ManagerState {
                default_pool: None,
                pools: Vec::new(),
                stacks: Vec::new(),
                initialized: false,
            }),
            tracker: Arc::new(AllocationTracker::new()),
            system: SystemHeap::new(),
        }
    }

    /// Commits the default pool from `config` and enables or disables
    /// tracking per `config.tracking_enabled`.
    ///
    /// Calling this on an already initialized manager logs a warning and
    /// changes nothing.
    ///
    /// # Errors
    ///
    /// [`MemoryError`](crate::error::MemoryError) when the config is
    /// invalid. A refused initial arena is not an error; see
    /// [`MemoryPool::new`].
    pub fn initialize(&self, config: PoolConfig) -> MemoryResult<()> {
        let mut state = self.state.write();
        if state.initialized {
            tracing::warn!("memory manager already initialized, ignoring");
            return Ok(());
        }

        self.tracker.set_enabled(config.tracking_enabled);
        let name = config.name.clone();
        let initial = config.initial_size;

        // The manager records its callers itself, so the default pool
        // gets no tracker handle. Reports would double otherwise.
        let pool = MemoryPool::new(config)?;
        state.default_pool = Some(Arc::new(pool));
        state.initialized = true;

        tracing::info!(
            "memory manager initialized: default pool '{}', {} bytes",
            name,
            initial
        );
        Ok(())
    }

    /// Drops every registered allocator, dumps statistics and the leak
    /// report, and returns to fallback-only operation.
    ///
    /// Allocations still live in dropped pools are invalidated; the leak
    /// report printed here is the place they show up.
    pub fn shutdown(&self) {
        let (default_pool, pools, stacks) = {
            let mut state = self.state.write();
            if !state.initialized {
                tracing::debug!("memory manager shutdown: nothing to do");
                return;
            }
            state.initialized = false;
            (
                state.default_pool.take(),
                std::mem::take(&mut state.pools),
                std::mem::take(&mut state.stacks),
            )
        };

        for pool in default_pool.iter().chain(pools.iter()) {
            tracing::info!("pool '{}' at shutdown: {}", pool.name(), pool.stats());
        }
        for stack in &stacks {
            tracing::info!("stack '{}' at shutdown: {}", stack.name(), stack.stats());
        }

        self.tracker.dump_stats();
        let leaks = self.tracker.dump_leaks();
        if leaks == 0 {
            tracing::info!("memory manager shut down clean");
        } else {
            tracing::warn!("memory manager shut down with {} leaked allocation(s)", leaks);
        }
    }

    /// Whether `initialize` has run without a matching `shutdown`.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    /// Allocates `size` bytes aligned to `alignment`, attributed to
    /// `tag` in the tracker.
    ///
    /// Routes to the default pool and falls back to the system heap when
    /// the pool is exhausted or absent.
    pub fn allocate(&self, size: usize, alignment: usize, tag: &str) -> Option<NonNull<u8>> {
        self.allocate_traced(size, alignment, tag, None)
    }

    /// [`MemoryManager::allocate`] with an explicit call site for the
    /// leak report. The [`alloc_tagged!`](crate::alloc_tagged) macro
    /// captures the site automatically.
    pub fn allocate_traced(
        &self,
        size: usize,
        alignment: usize,
        tag: &str,
        call_site: Option<CallSite>,
    ) -> Option<NonNull<u8>> {
        self.allocate_inner(size, alignment, tag, call_site, false)
    }

    /// Allocates `count * elem_size` bytes, recorded as an array
    /// allocation. The multiplication is overflow-checked.
    pub fn allocate_array(
        &self,
        count: usize,
        elem_size: usize,
        alignment: usize,
        tag: &str,
    ) -> Option<NonNull<u8>> {
        self.allocate_array_traced(count, elem_size, alignment, tag, None)
    }

    /// [`MemoryManager::allocate_array`] with an explicit call site.
    pub fn allocate_array_traced(
        &self,
        count: usize,
        elem_size: usize,
        alignment: usize,
        tag: &str,
        call_site: Option<CallSite>,
    ) -> Option<NonNull<u8>> {
        let total = count.checked_mul(elem_size)?;
        self.allocate_inner(total, alignment, tag, call_site, true)
    }

    fn allocate_inner(
        &self,
        size: usize,
        alignment: usize,
        tag: &str,
        call_site: Option<CallSite>,
        is_array: bool,
    ) -> Option<NonNull<u8>> {
        if size == 0 || !alignment.is_power_of_two() {
            return None;
        }

        let default_pool = self.state.read().default_pool.clone();
        let ptr = match &default_pool {
            Some(pool) => pool.allocate(size, alignment).or_else(|| {
                tracing::warn!(
                    "pool '{}' could not serve {} bytes, falling back to system heap",
                    pool.name(),
                    size
                );
                self.system.allocate(size, alignment)
            }),
            None => self.system.allocate(size, alignment),
        };

        match ptr {
            Some(ptr) => {
                self.tracker.track_allocation(
                    ptr.as_ptr() as usize,
                    size,
                    alignment,
                    tag,
                    call_site,
                    is_array,
                );
                Some(ptr)
            }
            None => {
                tracing::warn!(
                    "allocation failed: {} bytes, alignment {}, tag '{}'",
                    size,
                    alignment,
                    tag
                );
                None
            }
        }
    }

    /// Returns an allocation to whichever allocator owns it.
    ///
    /// Probe order is default pool, named pools, stacks, system heap.
    /// Stack pointers are claimed but not freed, individual frees are
    /// not part of the stack contract. A pointer nobody owns is logged
    /// and ignored.
    pub fn deallocate(&self, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        let (default_pool, pools, stacks) = self.snapshot();

        if let Some(pool) = &default_pool {
            if pool.owns(ptr) {
                pool.deallocate(ptr);
                self.tracker.track_deallocation(addr);
                return;
            }
        }
        for pool in &pools {
            // Self-reporting pools retract their own tracker records
            if pool.owns(ptr) {
                pool.deallocate(ptr);
                return;
            }
        }
        for stack in &stacks {
            if stack.owns(ptr) {
                tracing::debug!(
                    "deallocate of stack pointer {:#x} ignored; roll back with a marker",
                    addr
                );
                return;
            }
        }
        if self.system.deallocate(ptr) {
            self.tracker.track_deallocation(addr);
            return;
        }

        tracing::warn!("deallocate: unknown pointer {:#x} ignored", addr);
    }

    /// Resizes an allocation in whichever allocator owns it.
    ///
    /// `new_size` of zero frees the allocation and returns None. Stack
    /// pointers cannot be resized. On failure the original allocation is
    /// left untouched and None is returned.
    pub fn reallocate(&self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        if new_size == 0 {
            self.deallocate(ptr);
            return None;
        }

        let addr = ptr.as_ptr() as usize;
        let (default_pool, pools, stacks) = self.snapshot();

        if let Some(pool) = &default_pool {
            if pool.owns(ptr) {
                let new_ptr = pool.reallocate(ptr, new_size)?;
                self.tracker
                    .track_reallocation(addr, new_ptr.as_ptr() as usize, new_size);
                return Some(new_ptr);
            }
        }
        for pool in &pools {
            if pool.owns(ptr) {
                return pool.reallocate(ptr, new_size);
            }
        }
        for stack in &stacks {
            if stack.owns(ptr) {
                tracing::debug!("reallocate of stack pointer {:#x} unsupported", addr);
                return None;
            }
        }
        if self.system.owns(addr) {
            let new_ptr = self.system.reallocate(ptr, new_size)?;
            self.tracker
                .track_reallocation(addr, new_ptr.as_ptr() as usize, new_size);
            return Some(new_ptr);
        }

        tracing::warn!("reallocate: unknown pointer {:#x} ignored", addr);
        None
    }

    /// Builds and registers a subsystem pool.
    ///
    /// When `config.tracking_enabled` is set the pool reports to the
    /// manager's tracker under its own name.
    ///
    /// # Errors
    ///
    /// [`MemoryError`](crate::error::MemoryError) when the config is
    /// invalid.
    pub fn create_pool(&self, config: PoolConfig) -> MemoryResult<Arc<MemoryPool>> {
        let tracker = config.tracking_enabled.then(|| Arc::clone(&self.tracker));
        let pool = Arc::new(MemoryPool::with_tracker(config, tracker)?);
        self.state.write().pools.push(Arc::clone(&pool));
        tracing::info!("pool '{}' registered", pool.name());
        Ok(pool)
    }

    /// Unregisters a pool created with [`MemoryManager::create_pool`].
    ///
    /// Matching is by identity, not by name. Returns false when the pool
    /// was never registered here or was already destroyed.
    pub fn destroy_pool(&self, pool: &Arc<MemoryPool>) -> bool {
        let removed = {
            let mut state = self.state.write();
            let before = state.pools.len();
            state.pools.retain(|candidate| !Arc::ptr_eq(candidate, pool));
            state.pools.len() != before
        };

        if removed {
            tracing::info!("pool '{}' destroyed", pool.name());
        } else {
            tracing::warn!("destroy_pool: pool '{}' is not registered", pool.name());
        }
        removed
    }

    /// Builds and registers a stack allocator of `size` bytes.
    ///
    /// # Errors
    ///
    /// [`MemoryError`](crate::error::MemoryError) when `size` is zero or
    /// the arena cannot be committed. Stack construction does not fall
    /// back.
    pub fn create_stack_allocator(&self, size: usize) -> MemoryResult<Arc<StackAllocator>> {
        let stack = Arc::new(StackAllocator::new(size)?);
        self.state.write().stacks.push(Arc::clone(&stack));
        tracing::info!("stack allocator registered: {} bytes", size);
        Ok(stack)
    }

    /// Unregisters a stack allocator by identity. Returns false when it
    /// was never registered here.
    pub fn destroy_stack_allocator(&self, stack: &Arc<StackAllocator>) -> bool {
        let removed = {
            let mut state = self.state.write();
            let before = state.stacks.len();
            state
                .stacks
                .retain(|candidate| !Arc::ptr_eq(candidate, stack));
            state.stacks.len() != before
        };

        if removed {
            tracing::info!("stack '{}' destroyed", stack.name());
        } else {
            tracing::warn!("destroy_stack_allocator: stack is not registered");
        }
        removed
    }

    /// The tracker's aggregate view, for diagnostic consumers.
    ///
    /// Counters are in requested-byte units and cover tracked
    /// allocations only. Consumed-byte figures come from each pool's
    /// or stack's own `stats`.
    #[must_use]
    pub fn global_stats(&self) -> MemoryStats {
        self.tracker.stats()
    }

    /// The shared allocation tracker.
    #[must_use]
    pub fn tracker(&self) -> Arc<AllocationTracker> {
        Arc::clone(&self.tracker)
    }

    /// The default pool, present after initialization.
    #[must_use]
    pub fn default_pool(&self) -> Option<Arc<MemoryPool>> {
        self.state.read().default_pool.clone()
    }

    /// Clones the registered allocator lists so routing runs without the
    /// structural lock.
    #[allow(clippy::type_complexity)]
    fn snapshot(
        &self,
    ) -> (
        Option<Arc<MemoryPool>>,
        Vec<Arc<MemoryPool>>,
        Vec<Arc<StackAllocator>>,
    ) {
        let state = self.state.read();
        (
            state.default_pool.clone(),
            state.pools.clone(),
            state.stacks.clone(),
        )
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide manager instance.
static GLOBAL: OnceLock<MemoryManager> = OnceLock::new();

/// The process-wide [`MemoryManager`], created on first use.
pub fn global() -> &'static MemoryManager {
    GLOBAL.get_or_init(MemoryManager::new)
}

/// Initializes the process-wide manager. See
/// [`MemoryManager::initialize`].
///
/// # Errors
///
/// [`MemoryError`](crate::error::MemoryError) when the config is
/// invalid.
pub fn initialize(config: PoolConfig) -> MemoryResult<()> {
    global().initialize(config)
}

/// Shuts down the process-wide manager. See
/// [`MemoryManager::shutdown`].
pub fn shutdown() {
    global().shutdown();
}

/// Allocates from the process-wide manager. See
/// [`MemoryManager::allocate`].
pub fn allocate(size: usize, alignment: usize, tag: &str) -> Option<NonNull<u8>> {
    global().allocate(size, alignment, tag)
}

/// Array allocation from the process-wide manager. See
/// [`MemoryManager::allocate_array`].
pub fn allocate_array(
    count: usize,
    elem_size: usize,
    alignment: usize,
    tag: &str,
) -> Option<NonNull<u8>> {
    global().allocate_array(count, elem_size, alignment, tag)
}

/// Deallocates through the process-wide manager. See
/// [`MemoryManager::deallocate`].
pub fn deallocate(ptr: NonNull<u8>) {
    global().deallocate(ptr);
}

/// Reallocates through the process-wide manager. See
/// [`MemoryManager::reallocate`].
pub fn reallocate(ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
    global().reallocate(ptr, new_size)
}

/// Aggregate statistics of the process-wide manager. See
/// [`MemoryManager::global_stats`].
#[must_use]
pub fn global_stats() -> MemoryStats {
    global().global_stats()
}

/// Allocates from the process-wide manager with the calling file and
/// line recorded for the leak report.
///
/// # Examples
///
/// ```ignore
/// let ptr = alloc_tagged!(256, 16, "Renderer/Vertices");
/// ```
#[macro_export]
macro_rules! alloc_tagged {
    ($size:expr, $alignment:expr, $tag:expr) => {
        $crate::manager::global().allocate_traced(
            $size,
            $alignment,
            $tag,
            Some($crate::tracker::CallSite::new(file!(), line!())),
        )
    };
}

/// Array form of [`alloc_tagged!`]; the element count and size are
/// multiplied with overflow checking.
#[macro_export]
macro_rules! alloc_array_tagged {
    ($count:expr, $elem_size:expr, $alignment:expr, $tag:expr) => {
        $crate::manager::global().allocate_array_traced(
            $count,
            $elem_size,
            $alignment,
            $tag,
            Some($crate::tracker::CallSite::new(file!(), line!())),
        )
    };
}
