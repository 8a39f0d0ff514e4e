#![allow(unsafe_code)]

use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use poolalloc_core::{
    ALIGN, AllocError, AllocatorLogLevel, Budgeted, LogLevelSetting, PlatformAlloc,
    PoolAllocator, PoolConfig, RecoveryStatus, SystemPlatform,
};

/// A block the recovery handler may release from another thread.
struct Ballast {
    platform: Budgeted,
    block: Option<NonNull<u8>>,
    size: usize,
}

// SAFETY: the ballast block is owned by this value alone and only touched by
// whichever thread runs the handler.
unsafe impl Send for Ballast {}

impl Ballast {
    fn release(&mut self) -> bool {
        match self.block.take() {
            Some(block) => {
                // SAFETY: the block came from `platform.malloc(size)` and is
                // freed exactly once.
                unsafe { self.platform.free(block, self.size) };
                true
            }
            None => false,
        }
    }
}

#[test]
fn reuse_after_free_is_lifo_across_sizes_in_one_class() {
    let mut pool = PoolAllocator::new();
    let a = pool.allocate(33).unwrap();
    // SAFETY: a is live with size 33.
    unsafe { pool.deallocate(a, 33) };
    // 33 and 40 both round to 40.
    assert_eq!(pool.allocate(40).unwrap(), a);
}

#[test]
fn every_small_size_maps_to_its_rounded_class() {
    let mut pool = PoolAllocator::new();
    for n in 1..=pool.max_small_bytes() {
        let ptr = pool.allocate(n).unwrap();
        // SAFETY: ptr is live with size n.
        unsafe { pool.deallocate(ptr, n) };
        let rounded = n.div_ceil(ALIGN) * ALIGN;
        // The block went back to the class of `rounded`, so that size pops it.
        assert_eq!(pool.allocate(rounded).unwrap(), ptr, "size {n}");
        // SAFETY: ptr is live again with size `rounded`.
        unsafe { pool.deallocate(ptr, rounded) };
    }
}

#[test]
fn live_blocks_are_aligned_and_disjoint() {
    let mut pool = PoolAllocator::new();
    let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();
    let mut starts = HashSet::new();
    for round in 0..6 {
        for n in (1..=128).step_by(7) {
            let ptr = pool.allocate(n + round).unwrap();
            assert_eq!(ptr.as_ptr() as usize % ALIGN, 0);
            assert!(starts.insert(ptr.as_ptr() as usize));
            live.push((ptr, n + round));
        }
    }
    let mut ranges: Vec<(usize, usize)> = live
        .iter()
        .map(|&(ptr, n)| (ptr.as_ptr() as usize, n))
        .collect();
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0, "overlap at {:#x}", pair[1].0);
    }
    for (ptr, n) in live {
        // SAFETY: each block is live with its recorded size.
        unsafe { pool.deallocate(ptr, n) };
    }
}

#[test]
fn freed_half_is_reused_without_growing_the_arena() {
    let mut pool = PoolAllocator::new();
    let ptrs: Vec<_> = (0..1000).map(|_| pool.allocate(16).unwrap()).collect();

    for ptr in ptrs.iter().step_by(2) {
        // SAFETY: every other block is released exactly once.
        unsafe { pool.deallocate(*ptr, 16) };
    }
    let platform_allocs = pool.large_stats().platform_allocs;
    let refills = pool.stats().refills;
    let heap_size = pool.arena_stats().heap_size;
    let hits = pool.stats().free_list_hits;

    let again: HashSet<usize> = (0..500)
        .map(|_| pool.allocate(16).unwrap().as_ptr() as usize)
        .collect();
    let freed: HashSet<usize> = ptrs
        .iter()
        .step_by(2)
        .map(|ptr| ptr.as_ptr() as usize)
        .collect();

    assert_eq!(again, freed);
    assert_eq!(pool.large_stats().platform_allocs, platform_allocs);
    assert_eq!(pool.stats().refills, refills);
    assert_eq!(pool.arena_stats().heap_size, heap_size);
    assert_eq!(pool.stats().free_list_hits, hits + 500);
}

#[test]
fn ceiling_plus_one_goes_to_platform() {
    let mut pool = PoolAllocator::new();
    let max = pool.max_small_bytes();
    let ptr = pool.allocate(max + 1).unwrap();
    assert_eq!(pool.large_stats().platform_allocs, 1);
    assert_eq!(pool.stats().refills, 0);
    assert_eq!(pool.free_bytes(), 0);
    // SAFETY: ptr is live with size max + 1.
    unsafe { pool.deallocate(ptr, max + 1) };
    assert_eq!(pool.large_stats().platform_frees, 1);

    let ptr = pool.allocate(max).unwrap();
    assert_eq!(pool.large_stats().platform_allocs, 2);
    assert_eq!(pool.stats().refills, 1);
    // SAFETY: ptr is live with size max.
    unsafe { pool.deallocate(ptr, max) };
}

#[test]
fn same_class_reallocate_keeps_pointer_and_bytes() {
    let mut pool = PoolAllocator::new();
    let ptr = pool.allocate(41).unwrap();
    // SAFETY: ptr is live with size 41.
    unsafe { ptr.as_ptr().write_bytes(0x11, 41) };
    // SAFETY: ptr is live with size 41.
    let out = unsafe { pool.reallocate(ptr, 41, 48) }.unwrap();
    assert_eq!(out, ptr);
    // SAFETY: out is live with size 48; the first 41 bytes are initialized.
    assert_eq!(unsafe { *out.as_ptr().add(40) }, 0x11);
}

#[test]
fn recovery_handler_frees_once_then_allocation_fails() {
    let platform = Budgeted::unlimited(SystemPlatform);
    let budget = platform.clone();
    let mut pool = PoolAllocator::with_platform(platform, PoolConfig::default()).unwrap();

    let mut spare = budget.clone();
    let block = spare.malloc(256).unwrap();
    budget.set_limit(budget.in_use());
    let mut ballast = Ballast {
        platform: spare,
        block: Some(block),
        size: 256,
    };

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    pool.set_recovery_handler(Some(Box::new(move || {
        seen.fetch_add(1, Ordering::SeqCst);
        ballast.release();
        RecoveryStatus::Uninstall
    })));

    let first = pool.allocate(200).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!pool.has_recovery_handler());

    assert_eq!(pool.allocate(200), Err(AllocError::Exhausted { size: 200 }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(pool.large_stats().recovery_invocations, 1);

    // SAFETY: first is live with size 200.
    unsafe { pool.deallocate(first, 200) };
}

#[test]
fn small_tier_runs_oom_protocol_when_nothing_is_spare() {
    let platform = Budgeted::unlimited(SystemPlatform);
    let budget = platform.clone();
    let config = PoolConfig::default()
        .with_log_level(LogLevelSetting::Enabled(AllocatorLogLevel::Warn));
    let mut pool = PoolAllocator::with_platform(platform, config).unwrap();

    let first = pool.allocate(128).unwrap();
    let mut live = vec![first];
    while pool.arena_stats().remaining > 0 || pool.free_list_len(15) > 0 {
        live.push(pool.allocate(128).unwrap());
    }
    budget.set_limit(budget.in_use());

    let raise = budget.clone();
    pool.set_recovery_handler(Some(Box::new(move || {
        raise.set_limit(usize::MAX);
        RecoveryStatus::Retry
    })));
    live.push(pool.allocate(128).unwrap());

    assert_eq!(pool.stats().oom_fallbacks, 1);
    let events: Vec<&str> = pool.lifecycle_logs().iter().map(|r| r.event).collect();
    assert_eq!(events, vec!["slab_alloc_failed", "oom_protocol"]);

    for ptr in live {
        // SAFETY: every block is live with size 128.
        unsafe { pool.deallocate(ptr, 128) };
    }
}

#[test]
fn custom_ceiling_moves_the_routing_boundary() {
    let config = PoolConfig::default()
        .with_max_small_bytes(256)
        .with_refill_batch(4);
    let mut pool = PoolAllocator::with_config(config).unwrap();
    let ptr = pool.allocate(200).unwrap();
    assert_eq!(pool.stats().large_allocs, 0);
    assert_eq!(pool.free_list_len(24), 3);
    assert_eq!(pool.arena_stats().heap_size, 2 * 200 * 4);
    // SAFETY: ptr is live with size 200.
    unsafe { pool.deallocate(ptr, 200) };

    let big = pool.allocate(257).unwrap();
    assert_eq!(pool.stats().large_allocs, 1);
    // SAFETY: big is live with size 257.
    unsafe { pool.deallocate(big, 257) };
}

#[test]
fn arena_bytes_are_conserved_across_growth() {
    let mut pool = PoolAllocator::new();
    let mut live = Vec::new();
    for round in 0..50usize {
        let n = 8 + (round * 24) % 121;
        live.push((pool.allocate(n).unwrap(), n));
        let arena = pool.arena_stats();
        assert_eq!(arena.carved + arena.remaining, arena.granted + arena.reclaimed);
        assert_eq!(arena.granted, arena.heap_size);
    }
    assert!(pool.stats().arena_grows > 1);
    for (ptr, n) in live {
        // SAFETY: each block is live with its recorded size.
        unsafe { pool.deallocate(ptr, n) };
    }
}
