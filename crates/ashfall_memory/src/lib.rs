//! # ASHFALL Memory
//!
//! Custom allocation subsystem: block pools, stack allocators, a leak
//! tracker, and one manager that routes every request to its owner.
//!
//! ## Design Principles
//!
//! 1. **Failure is a value** - allocation returns `Option`, never
//!    panics, and leaves every structure consistent on the None path
//! 2. **One door for unsafe** - raw memory lives in one private module;
//!    everything above it works with offsets and `NonNull`
//! 3. **Every byte answers twice** - what is counted on allocate is
//!    counted again on free, so usage reads exactly zero when balanced
//! 4. **Diagnostics are first class** - allocations carry tags and call
//!    sites, and shutdown prints who never freed
//!
//! ## Architecture
//!
//! ```text
//!   manager ─── routes ───> pool ───> arena (unsafe core)
//!      │                    stack ──> arena
//!      │                    system heap (fallback + foreign-ptr ledger)
//!      └── tracker (shared allocation ledger, leak reports)
//! ```
//!
//! ## Example
//!
//! ```
//! use ashfall_memory::{MemoryManager, PoolConfig};
//!
//! let manager = MemoryManager::new();
//! manager.initialize(PoolConfig::default())?;
//!
//! let ptr = manager.allocate(256, 16, "Example/Buffer").expect("pool has room");
//! assert!(manager.default_pool().expect("initialized").owns(ptr));
//!
//! manager.deallocate(ptr);
//! assert_eq!(manager.global_stats().current_usage, 0);
//! # Ok::<(), ashfall_memory::MemoryError>(())
//! ```
//!
//! Long-lived programs use the process-wide instance through
//! [`initialize`], [`allocate`] / [`alloc_tagged!`], and [`shutdown`].

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod align;
pub mod allocator;
mod arena;
pub mod config;
pub mod error;
pub mod manager;
pub mod pool;
pub mod stack;
pub mod stats;
pub mod tracker;

pub use allocator::Allocator;
pub use config::PoolConfig;
pub use error::{MemoryError, MemoryResult};
pub use manager::{
    allocate, allocate_array, deallocate, global, global_stats, initialize, reallocate, shutdown,
    MemoryManager,
};
pub use pool::MemoryPool;
pub use stack::{StackAllocator, StackMarker};
pub use stats::MemoryStats;
pub use tracker::{AllocationRecord, AllocationTracker, CallSite};
