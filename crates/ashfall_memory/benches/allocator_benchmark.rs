//! # Allocator Performance Benchmark
//!
//! ARCHITECT'S REQUIREMENTS:
//! - allocate/free pair through the pool: < 1µs
//! - ownership lookup: logarithmic in live blocks
//! - tracking overhead: visible, never dominant
//!
//! Run with: `cargo bench --package ashfall_memory`

// Benchmarks don't need docs and may have intentionally unused code
#![allow(missing_docs)]
#![allow(dead_code)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use ashfall_memory::{MemoryManager, MemoryPool, PoolConfig, StackAllocator};

/// Rounds per churn iteration, matching the soak binary's pattern.
const CHURN_ROUNDS: usize = 1_000;

/// Live allocations held during churn.
const CHURN_WINDOW: usize = 64;

/// A fixed-capacity pool so growth never skews an iteration.
fn bench_config(name: &str) -> PoolConfig {
    PoolConfig {
        initial_size: 4 * 1024 * 1024,
        max_size: 4 * 1024 * 1024,
        name: name.to_string(),
        ..PoolConfig::default()
    }
}

/// Benchmark: one allocate/free pair across request sizes.
fn bench_alloc_free_pair(c: &mut Criterion) {
    let pool = MemoryPool::new(bench_config("Bench/Pair")).expect("pool config");
    let mut group = c.benchmark_group("alloc_free_pair");

    for size in [64usize, 256, 1024, 4096, 65536] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let ptr = pool.allocate(black_box(size), 16).expect("pool has room");
                pool.deallocate(ptr);
            });
        });
    }
    group.finish();
}

/// Benchmark: windowed churn, pool against the system-heap fallback.
fn bench_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("churn_1k_rounds");

    group.bench_function("pool", |b| {
        let pool = MemoryPool::new(bench_config("Bench/Churn")).expect("pool config");
        let mut live = Vec::with_capacity(CHURN_WINDOW);
        b.iter(|| {
            for i in 0..CHURN_ROUNDS {
                let size = 64 + (i % 1000);
                if let Some(ptr) = pool.allocate(size, 16) {
                    live.push(ptr);
                }
                if live.len() >= CHURN_WINDOW {
                    pool.deallocate(live.remove(0));
                }
            }
            for ptr in live.drain(..) {
                pool.deallocate(ptr);
            }
            black_box(pool.stats().allocation_count)
        });
    });

    group.bench_function("system_heap", |b| {
        // An uninitialized manager routes everything to the fallback
        let fallback = MemoryManager::new();
        fallback.tracker().set_enabled(false);
        let mut live = Vec::with_capacity(CHURN_WINDOW);
        b.iter(|| {
            for i in 0..CHURN_ROUNDS {
                let size = 64 + (i % 1000);
                if let Some(ptr) = fallback.allocate(size, 16, "bench") {
                    live.push(ptr);
                }
                if live.len() >= CHURN_WINDOW {
                    fallback.deallocate(live.remove(0));
                }
            }
            for ptr in live.drain(..) {
                fallback.deallocate(ptr);
            }
            black_box(live.len())
        });
    });

    group.finish();
}

/// Benchmark: a frame of stack scratch rolled back by marker.
fn bench_stack_frame(c: &mut Criterion) {
    let stack = StackAllocator::new(1024 * 1024).expect("stack commit");

    c.bench_function("stack_frame_16_buffers", |b| {
        b.iter(|| {
            let mark = stack.marker();
            for i in 0..16 {
                black_box(stack.allocate(256 + i * 32, 16));
            }
            stack.free_to_marker(mark);
        });
    });
}

/// Benchmark: first-fit scan through a checkerboarded pool.
fn bench_fragmented_allocate(c: &mut Criterion) {
    let pool = MemoryPool::new(bench_config("Bench/Fragmented")).expect("pool config");

    // Allocate a long run, then free every other block
    let mut held = Vec::new();
    for _ in 0..512 {
        if let Some(ptr) = pool.allocate(2048, 16) {
            held.push(ptr);
        }
    }
    for ptr in held.iter().step_by(2) {
        pool.deallocate(*ptr);
    }

    c.bench_function("fragmented_alloc_free", |b| {
        b.iter(|| {
            let ptr = pool.allocate(black_box(1024), 16).expect("holes fit 1 KiB");
            pool.deallocate(ptr);
        });
    });
}

/// Benchmark: ownership lookup among many live blocks.
fn bench_owns_lookup(c: &mut Criterion) {
    let pool = MemoryPool::new(bench_config("Bench/Lookup")).expect("pool config");
    let mut ptrs = Vec::new();
    for _ in 0..1024 {
        if let Some(ptr) = pool.allocate(1024, 16) {
            ptrs.push(ptr);
        }
    }
    let probe = ptrs[ptrs.len() / 2];

    c.bench_function("owns_among_1024_blocks", |b| {
        b.iter(|| black_box(pool.owns(black_box(probe))));
    });
}

/// Benchmark: manager path with tracking on and off.
fn bench_tracking_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("manager_alloc_free");

    for tracking in [false, true] {
        let manager = MemoryManager::new();
        let mut config = bench_config("Bench/Manager");
        config.tracking_enabled = tracking;
        manager.initialize(config).expect("manager init");

        let label = if tracking { "tracked" } else { "untracked" };
        group.bench_function(label, |b| {
            b.iter(|| {
                let ptr = manager.allocate(512, 16, "bench").expect("pool has room");
                manager.deallocate(ptr);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_pair,
    bench_churn,
    bench_stack_frame,
    bench_fragmented_allocate,
    bench_owns_lookup,
    bench_tracking_overhead,
);

criterion_main!(benches);
