//! Stress tests for the block pool under churn and contention.

#![allow(unsafe_code)]

use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ashfall_memory::{MemoryPool, MemoryStats, PoolConfig};

/// Fixed-capacity pool: one arena, so a drained pool must read
/// fragmentation zero.
fn stress_config(name: &str) -> PoolConfig {
    PoolConfig {
        initial_size: 8 * 1024 * 1024,
        max_size: 8 * 1024 * 1024,
        block_granularity: 4096,
        alignment: 16,
        tracking_enabled: false,
        name: name.to_string(),
    }
}

#[test]
fn test_eight_threads_hammer_one_pool() {
    let pool = Arc::new(MemoryPool::new(stress_config("Hammer")).unwrap());
    let threads = 8u64;
    let rounds = 2_000;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let pool = Arc::clone(&pool);
            // Pointers stay inside the thread that allocated them
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(0xA5C3 + t);
                let mut live = Vec::new();
                for _ in 0..rounds {
                    let size = rng.gen_range(32..2048);
                    if let Some(ptr) = pool.allocate(size, 16) {
                        live.push(ptr);
                    }
                    if live.len() > 32 {
                        let idx = rng.gen_range(0..live.len());
                        pool.deallocate(live.swap_remove(idx));
                    }
                }
                for ptr in live {
                    pool.deallocate(ptr);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.current_usage, 0);
    assert_eq!(stats.allocation_count, stats.deallocation_count);
    assert_eq!(stats.fragmentation_pct, 0, "one free block at the end");
}

#[test]
fn test_reallocate_preserves_contents_across_moves() {
    let pool = MemoryPool::new(stress_config("Realloc")).unwrap();

    let mut ptr = pool.allocate(64, 16).unwrap();
    // SAFETY: writes stay within the 64 bytes just allocated.
    unsafe {
        for i in 0..64 {
            ptr.as_ptr().add(i).write(0x5A ^ i as u8);
        }
    }

    // Walls pin the block so every growth step has to move it
    let mut size = 64usize;
    for _ in 0..6 {
        let _wall = pool.allocate(128, 16).unwrap();
        size *= 4;
        ptr = pool.reallocate(ptr, size).unwrap();
    }
    assert_eq!(size, 262_144);
    assert!(pool.allocation_size(ptr).unwrap() >= size);

    // SAFETY: the first 64 bytes survive every move.
    let head = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 64) };
    for (i, &byte) in head.iter().enumerate() {
        assert_eq!(byte, 0x5A ^ i as u8, "byte {i} corrupted");
    }
}

#[test]
fn test_fragmentation_recovers_after_checkerboard_free() {
    let pool = MemoryPool::new(stress_config("Checkerboard")).unwrap();

    let ptrs: Vec<_> = (0..256)
        .map(|_| pool.allocate(8192, 16).unwrap())
        .collect();

    // Free the even half: 128 holes fenced by 128 live blocks
    for ptr in ptrs.iter().step_by(2) {
        pool.deallocate(*ptr);
    }
    assert!(pool.fragmentation_pct() > 0);

    // The holes still serve requests that fit them
    let refill: Vec<_> = (0..64)
        .map(|_| pool.allocate(4096, 16).unwrap())
        .collect();

    for ptr in refill {
        pool.deallocate(ptr);
    }
    for ptr in ptrs.iter().skip(1).step_by(2) {
        pool.deallocate(*ptr);
    }

    let stats = pool.stats();
    assert_eq!(stats.current_usage, 0);
    assert_eq!(stats.fragmentation_pct, 0);
}

#[test]
fn test_growth_then_reset_returns_to_initial_footprint() {
    let config = PoolConfig {
        initial_size: 64 * 1024,
        max_size: 1024 * 1024,
        block_granularity: 4096,
        alignment: 16,
        tracking_enabled: false,
        name: "Regrow".to_string(),
    };
    let pool = MemoryPool::new(config).unwrap();

    // Each request fills most of an arena, forcing repeated growth
    let big: Vec<_> = (0..12)
        .map(|_| pool.allocate(48 * 1024, 16).unwrap())
        .collect();
    assert!(pool.stats().current_usage > 64 * 1024);

    for ptr in big {
        pool.deallocate(ptr);
    }
    pool.reset();
    assert_eq!(pool.stats(), MemoryStats::default());

    // The surviving first arena still serves
    let ptr = pool.allocate(32 * 1024, 16).unwrap();
    pool.deallocate(ptr);
}
