//! # Memory Soak Test
//!
//! THE ARCHITECT'S CHALLENGE:
//!
//! Allocate → Split → Merge → Roll Back → Report Every Leak
//!
//! WITH USAGE READING EXACTLY ZERO AT THE END.
//!
//! This binary drives the whole subsystem the way a long game session
//! would: pool churn, per-frame stack scratch, tracked subsystem
//! buffers, and the global facade with its system-heap fallback. Every
//! phase checks its own invariants; any failure fails the run.

use std::time::Instant;

use ashfall_memory::{
    alloc_array_tagged, alloc_tagged, manager, MemoryManager, MemoryPool, PoolConfig,
    StackAllocator,
};

/// Outcome of one soak phase.
#[derive(Debug)]
struct PhaseResult {
    /// Phase label for the report.
    name: &'static str,
    /// Whether every check in the phase held.
    passed: bool,
    /// One-line summary of what was measured.
    detail: String,
    /// Wall time for the phase in microseconds.
    elapsed_us: u64,
}

impl PhaseResult {
    fn new(name: &'static str, started: Instant, passed: bool, detail: String) -> Self {
        Self {
            name,
            passed,
            detail,
            elapsed_us: started.elapsed().as_micros() as u64,
        }
    }
}

/// Pool drill: split on allocate, merge on free, fragmentation rises
/// while the middle block is stranded and clears when its neighbors go.
fn phase_pool_split_merge() -> PhaseResult {
    let started = Instant::now();

    // One small fixed arena: the stranded 2 KiB block has to register
    // in whole-percent fragmentation, which it cannot on a 1 MiB arena
    let config = PoolConfig {
        initial_size: 64 * 1024,
        max_size: 64 * 1024,
        block_granularity: 256,
        name: "Soak/Pool".to_string(),
        ..PoolConfig::default()
    };
    let pool = match MemoryPool::new(config) {
        Ok(pool) => pool,
        Err(e) => {
            return PhaseResult::new("Pool split/merge", started, false, format!("config: {e}"))
        }
    };

    let a = pool.allocate(1024, 16);
    let b = pool.allocate(2048, 32);
    let c = pool.allocate(512, 8);
    let (Some(a), Some(b), Some(c)) = (a, b, c) else {
        return PhaseResult::new(
            "Pool split/merge",
            started,
            false,
            "initial allocations refused".to_string(),
        );
    };

    let stats = pool.stats();
    // 3584 bytes requested; alignment padding may add a little
    let usage_ok = stats.current_usage >= 3584 && stats.current_usage < 3584 + 64;
    let count_ok = stats.allocation_count == 3;

    pool.deallocate(b);
    let fragmented = pool.fragmentation_pct() > 0;

    pool.deallocate(a);
    pool.deallocate(c);
    let end = pool.stats();
    let drained = end.current_usage == 0 && end.fragmentation_pct == 0;

    let passed = usage_ok && count_ok && fragmented && drained;
    PhaseResult::new(
        "Pool split/merge",
        started,
        passed,
        format!(
            "usage {} after 3 allocs, fragmentation {}% mid-hole, {}% drained",
            stats.current_usage,
            if fragmented { ">0" } else { "0" },
            end.fragmentation_pct
        ),
    )
}

/// Stack drill: 600 simulated frames of scratch allocations rolled back
/// by marker, with the offset pinned to zero between frames.
fn phase_stack_frames() -> PhaseResult {
    let started = Instant::now();
    let stack = match StackAllocator::new(256 * 1024) {
        Ok(stack) => stack,
        Err(e) => return PhaseResult::new("Stack frames", started, false, format!("commit: {e}")),
    };

    let mut frames_ok = 0u32;
    for frame in 0..600u32 {
        let frame_mark = stack.marker();

        // A few transient buffers of varying size and alignment
        let sizes = [256, 1024, 64 + (frame as usize % 512), 4096];
        let mut all_served = true;
        for (slot, &size) in sizes.iter().enumerate() {
            let alignment = 1usize << (4 + slot % 3);
            if stack.allocate(size, alignment).is_none() {
                all_served = false;
            }
        }

        stack.free_to_marker(frame_mark);
        if all_served && stack.current_offset() == 0 {
            frames_ok += 1;
        }
    }

    let passed = frames_ok == 600 && stack.stats().current_usage == 0;
    PhaseResult::new(
        "Stack frames",
        started,
        passed,
        format!("{frames_ok}/600 frames rolled back to offset 0"),
    )
}

/// Tracker drill: three tracked buffers, two freed, the report must
/// name exactly the survivor, then zero once it goes too.
fn phase_leak_tracker() -> PhaseResult {
    let started = Instant::now();
    let manager = MemoryManager::new();
    if let Err(e) = manager.initialize(PoolConfig::named("Soak/Tracked")) {
        return PhaseResult::new("Leak tracker", started, false, format!("init: {e}"));
    }

    let first = manager.allocate(300, 16, "Soak/First");
    let second = manager.allocate(5000, 16, "Soak/Second");
    let third = manager.allocate(70, 16, "Soak/Third");
    let (Some(first), Some(second), Some(third)) = (first, second, third) else {
        return PhaseResult::new(
            "Leak tracker",
            started,
            false,
            "tracked allocations refused".to_string(),
        );
    };

    let tracker = manager.tracker();
    let three = tracker.active_allocations().len();

    manager.deallocate(first);
    manager.deallocate(third);
    let leaks = tracker.leaked_allocations();
    let one_left = leaks.len() == 1 && leaks[0].tag == "Soak/Second" && leaks[0].size == 5000;

    manager.deallocate(second);
    let remaining = tracker.active_allocations().len();

    let passed = three == 3 && one_left && remaining == 0;
    PhaseResult::new(
        "Leak tracker",
        started,
        passed,
        format!("{three} tracked, 1 survivor named, {remaining} at the end"),
    )
}

/// Global facade drill: initialize, tag through the macros, overflow
/// into the system heap, and shut down with nothing outstanding.
fn phase_global_facade() -> PhaseResult {
    let started = Instant::now();

    let config = PoolConfig {
        initial_size: 64 * 1024,
        max_size: 64 * 1024,
        block_granularity: 256,
        name: "Soak/Global".to_string(),
        ..PoolConfig::default()
    };
    if let Err(e) = manager::initialize(config) {
        return PhaseResult::new("Global facade", started, false, format!("init: {e}"));
    }

    let tagged = alloc_tagged!(512, 16, "Soak/Tagged");
    let grid = alloc_array_tagged!(16, 64, 16, "Soak/Grid");
    // Four times the pool maximum lands on the system heap
    let oversized = manager::allocate(256 * 1024, 16, "Soak/Oversized");

    let (Some(tagged), Some(grid), Some(oversized)) = (tagged, grid, oversized) else {
        return PhaseResult::new(
            "Global facade",
            started,
            false,
            "facade allocations refused".to_string(),
        );
    };

    let records = manager::global().tracker().active_allocations();
    let sites_known = records
        .iter()
        .filter(|r| r.tag.starts_with("Soak/"))
        .filter(|r| r.tag == "Soak/Oversized" || r.call_site.is_some())
        .count();
    let routed = manager::global()
        .default_pool()
        .map(|pool| pool.owns(tagged) && pool.owns(grid) && !pool.owns(oversized));

    manager::deallocate(tagged);
    manager::deallocate(grid);
    manager::deallocate(oversized);
    let drained = manager::global().tracker().stats().current_usage == 0;

    manager::shutdown();
    let down = !manager::global().is_initialized();

    let passed = sites_known == 3 && routed == Some(true) && drained && down;
    PhaseResult::new(
        "Global facade",
        started,
        passed,
        format!("{sites_known}/3 attributed, fallback routed, shutdown clean: {down}"),
    )
}

/// Churn loop: deterministic allocate/free waves, pool against system
/// heap, both ending balanced.
fn phase_churn_performance() -> PhaseResult {
    const ROUNDS: usize = 10_000;
    const WINDOW: usize = 64;

    let started = Instant::now();
    let pool = match MemoryPool::new(PoolConfig::named("Soak/Churn")) {
        Ok(pool) => pool,
        Err(e) => return PhaseResult::new("Churn loop", started, false, format!("config: {e}")),
    };

    // System-heap twin: an uninitialized manager routes everything to
    // the fallback; tracking off to time the allocator alone.
    let fallback = MemoryManager::new();
    fallback.tracker().set_enabled(false);

    let pool_start = Instant::now();
    let mut live = Vec::with_capacity(WINDOW);
    for i in 0..ROUNDS {
        let size = 64 + (i % 1000);
        if let Some(ptr) = pool.allocate(size, 16) {
            live.push(ptr);
        }
        if live.len() >= WINDOW {
            pool.deallocate(live.remove(0));
        }
    }
    for ptr in live.drain(..) {
        pool.deallocate(ptr);
    }
    let pool_us = pool_start.elapsed().as_micros() as u64;

    let system_start = Instant::now();
    for i in 0..ROUNDS {
        let size = 64 + (i % 1000);
        if let Some(ptr) = fallback.allocate(size, 16, "churn") {
            live.push(ptr);
        }
        if live.len() >= WINDOW {
            fallback.deallocate(live.remove(0));
        }
    }
    for ptr in live.drain(..) {
        fallback.deallocate(ptr);
    }
    let system_us = system_start.elapsed().as_micros() as u64;

    let stats = pool.stats();
    let balanced = stats.current_usage == 0 && stats.allocation_count == ROUNDS as u64;

    PhaseResult::new(
        "Churn loop",
        started,
        balanced,
        format!(
            "{ROUNDS} rounds: pool {:.1}ms, system {:.1}ms, usage {} at end",
            pool_us as f64 / 1000.0,
            system_us as f64 / 1000.0,
            stats.current_usage
        ),
    )
}

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║           MEMORY SOAK TEST                                       ║");
    println!("║           Allocate → Merge → Roll Back → Report                  ║");
    println!("╠══════════════════════════════════════════════════════════════════╣");
    println!("║  TARGET: every byte accounted for, zero leaks at shutdown        ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let soak_start = Instant::now();
    let results = [
        phase_pool_split_merge(),
        phase_stack_frames(),
        phase_leak_tracker(),
        phase_global_facade(),
        phase_churn_performance(),
    ];
    let soak_duration = soak_start.elapsed();

    println!("┌─ PHASES ────────────────────────────────────────────────────────┐");
    for result in &results {
        let mark = if result.passed { "✓" } else { "✗" };
        println!("│ {} {:<18} {:>8.1}ms  {}", mark, result.name, result.elapsed_us as f64 / 1000.0, result.detail);
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();
    println!("┌─ TOTAL ─────────────────────────────────────────────────────────┐");
    println!("│ Soak Duration:      {:.2}s", soak_duration.as_secs_f64());
    println!(
        "│ Phases Passed:      {}/{}",
        results.iter().filter(|r| r.passed).count(),
        results.len()
    );
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    if results.iter().all(|r| r.passed) {
        println!("✅ MEMORY SOAK PASSED");
        std::process::exit(0);
    } else {
        println!("❌ MEMORY SOAK FAILED");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test, run in main's phase order: the global facade phase owns
    // the process-wide manager for its lifetime.
    #[test]
    fn test_every_phase_passes_on_a_healthy_allocator() {
        for result in [
            phase_pool_split_merge(),
            phase_stack_frames(),
            phase_leak_tracker(),
            phase_global_facade(),
            phase_churn_performance(),
        ] {
            assert!(result.passed, "{} failed: {}", result.name, result.detail);
        }
    }
}
