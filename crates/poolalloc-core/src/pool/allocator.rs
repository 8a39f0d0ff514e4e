//! Pool allocator state.
//!
//! Coordinates the free-list bank, the pool arena and the large-block tier.
//! All state lives on the instance; two allocators never share memory.
//!
//! Refill growth walks a fixed ladder instead of recursing:
//! 1. carve from the arena (full batch, or as many blocks as fit);
//! 2. donate the arena leftover to its class and ask the platform for a
//!    new slab, once;
//! 3. scavenge one spare block from a free list of this class or larger;
//! 4. run the large tier's out-of-memory protocol for the slab.
//!
//! After a successful rung the carve is retried exactly once.

use std::collections::VecDeque;
use std::fmt;
use std::ptr::{self, NonNull};

use crate::config::PoolConfig;
use crate::error::{AllocError, ConfigError};
use crate::log::{AllocatorLogLevel, AllocatorLogRecord, LifecycleLog, LogEvent, LogSnapshot};
use crate::platform::{PlatformAlloc, SystemPlatform};
use crate::raw::RawAllocator;

use super::arena::{ArenaStats, PoolArena};
use super::free_list::FreeListBank;
use super::large::{LargeBlockAllocator, LargeStats, RecoveryHandler};
use super::size_class::{ALIGN, class_count, class_index, class_size, round_up};

/// Counters for the small tier and its routing decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub small_allocs: u64,
    pub small_frees: u64,
    pub large_allocs: u64,
    pub large_frees: u64,
    /// Small allocations served straight off a free list.
    pub free_list_hits: u64,
    pub refills: u64,
    /// Slabs installed into the arena.
    pub arena_grows: u64,
    pub leftover_donations: u64,
    pub scavenges: u64,
    /// Growths that had to go through the out-of-memory protocol.
    pub oom_fallbacks: u64,
    pub reallocs_in_place: u64,
    pub reallocs_moved: u64,
    pub reallocs_large: u64,
}

/// Two-tier allocator: size-class free lists over a growable arena, with a
/// platform-backed tier for anything above the small-object ceiling.
pub struct PoolAllocator<P: PlatformAlloc = SystemPlatform> {
    config: PoolConfig,
    bank: FreeListBank,
    arena: PoolArena,
    large: LargeBlockAllocator<P>,
    stats: PoolStats,
    log: LifecycleLog,
}

// SAFETY: every pointer held by the allocator (list heads, arena cursor,
// slabs) refers to memory owned exclusively by this instance. Moving the
// instance to another thread moves that ownership with it.
unsafe impl<P: PlatformAlloc + Send> Send for PoolAllocator<P> {}

impl PoolAllocator<SystemPlatform> {
    /// Creates a pool with the default configuration over the process
    /// allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::build(SystemPlatform, PoolConfig::default())
    }

    /// Creates a pool over the process allocator.
    pub fn with_config(config: PoolConfig) -> Result<Self, ConfigError> {
        Self::with_platform(SystemPlatform, config)
    }

    /// Creates a pool configured from `POOLALLOC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::with_config(PoolConfig::from_env()?)
    }
}

impl Default for PoolAllocator<SystemPlatform> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PlatformAlloc> fmt::Debug for PoolAllocator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("config", &self.config)
            .field("stats", &self.stats)
            .field("arena", &self.arena.stats())
            .field("large", &self.large)
            .finish_non_exhaustive()
    }
}

impl<P: PlatformAlloc> PoolAllocator<P> {
    /// Creates a pool over an explicit platform allocator.
    pub fn with_platform(platform: P, config: PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(platform, config))
    }

    fn build(platform: P, config: PoolConfig) -> Self {
        Self {
            bank: FreeListBank::new(class_count(config.max_small_bytes)),
            arena: PoolArena::new(),
            large: LargeBlockAllocator::with_platform(platform),
            stats: PoolStats::default(),
            log: LifecycleLog::new(config.log_level, config.log_capacity),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Small-object ceiling in bytes.
    #[inline]
    pub fn max_small_bytes(&self) -> usize {
        self.config.max_small_bytes
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    pub fn large_stats(&self) -> LargeStats {
        self.large.stats()
    }

    pub fn arena_stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    pub fn platform(&self) -> &P {
        self.large.platform()
    }

    /// Blocks currently parked on free list `class` (0 past the last class).
    pub fn free_list_len(&self, class: usize) -> usize {
        self.bank.len(class)
    }

    /// Bytes parked across all free lists.
    pub fn free_bytes(&self) -> usize {
        self.bank.free_bytes()
    }

    /// Installs (or clears) the out-of-memory recovery handler, returning
    /// the previous one.
    pub fn set_recovery_handler(
        &mut self,
        handler: Option<RecoveryHandler>,
    ) -> Option<RecoveryHandler> {
        self.large.set_recovery_handler(handler)
    }

    pub fn has_recovery_handler(&self) -> bool {
        self.large.has_recovery_handler()
    }

    /// Retained lifecycle records, oldest first.
    pub fn lifecycle_logs(&self) -> &VecDeque<AllocatorLogRecord> {
        self.log.records()
    }

    pub fn drain_lifecycle_logs(&mut self) -> Vec<AllocatorLogRecord> {
        self.log.drain()
    }

    /// Retained lifecycle records as JSON lines.
    pub fn lifecycle_jsonl(&self) -> Result<String, serde_json::Error> {
        crate::log::to_jsonl(self.log.records())
    }

    /// Allocates `n` bytes.
    ///
    /// Requests above the ceiling go to the large-block tier unchanged.
    /// Smaller ones (zero included) are served from the free list of their
    /// class, refilling it from the arena when empty.
    pub fn allocate(&mut self, n: usize) -> Result<NonNull<u8>, AllocError> {
        if n > self.config.max_small_bytes {
            return match self.large.allocate(n) {
                Ok(ptr) => {
                    self.stats.large_allocs += 1;
                    self.emit(AllocatorLogLevel::Trace, || {
                        LogEvent::new("allocate", "alloc", "success")
                            .ptr(ptr)
                            .size(n)
                            .details("path=large")
                    });
                    Ok(ptr)
                }
                Err(err) => {
                    self.emit(AllocatorLogLevel::Error, || {
                        LogEvent::new("allocate", "exhausted", "oom")
                            .size(n)
                            .details("path=large")
                    });
                    Err(err)
                }
            };
        }

        let class = class_index(n);
        if let Some(ptr) = self.bank.pop(class) {
            self.stats.small_allocs += 1;
            self.stats.free_list_hits += 1;
            self.emit(AllocatorLogLevel::Trace, || {
                LogEvent::new("allocate", "alloc", "success")
                    .ptr(ptr)
                    .size(n)
                    .class(class)
                    .details("path=free_list")
            });
            return Ok(ptr);
        }

        match self.refill(class_size(class)) {
            Ok(ptr) => {
                self.stats.small_allocs += 1;
                self.emit(AllocatorLogLevel::Trace, || {
                    LogEvent::new("allocate", "alloc", "success")
                        .ptr(ptr)
                        .size(n)
                        .class(class)
                        .details("path=refill")
                });
                Ok(ptr)
            }
            Err(_) => {
                self.emit(AllocatorLogLevel::Error, || {
                    LogEvent::new("allocate", "exhausted", "oom")
                        .size(n)
                        .class(class)
                        .details("path=refill")
                });
                Err(AllocError::Exhausted { size: n })
            }
        }
    }

    /// Returns a block. Small blocks go back on their free list (LIFO, no
    /// coalescing); large ones go back to the platform.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this allocator for a request of `n` bytes
    /// and must not be used afterwards.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, n: usize) {
        if n > self.config.max_small_bytes {
            // SAFETY: large requests were served by the large tier with the
            // same size.
            unsafe { self.large.deallocate(ptr, n) };
            self.stats.large_frees += 1;
            self.emit(AllocatorLogLevel::Trace, || {
                LogEvent::new("deallocate", "free", "released")
                    .ptr(ptr)
                    .size(n)
                    .details("path=large")
            });
            return;
        }

        let class = class_index(n);
        // SAFETY: small blocks are `class_size(class)` bytes carved from the
        // arena, aligned to the stride, and the caller gives up ownership.
        unsafe { self.bank.push(class, ptr) };
        self.stats.small_frees += 1;
        self.emit(AllocatorLogLevel::Trace, || {
            LogEvent::new("deallocate", "free", "cached")
                .ptr(ptr)
                .size(n)
                .class(class)
                .details("path=free_list")
        });
    }

    /// Resizes a block.
    ///
    /// Large-to-large resizes go through the platform `realloc`. If both
    /// sizes round to the same class the same pointer comes back. Otherwise
    /// a new block is allocated, `min(old_n, new_n)` bytes are copied and
    /// the old block is released.
    ///
    /// # Safety
    ///
    /// `ptr` must be live, from this allocator, with size `old_n`. On
    /// success it must not be used again unless it was returned; on failure
    /// it is untouched.
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_n: usize,
        new_n: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let max = self.config.max_small_bytes;
        if old_n > max && new_n > max {
            // SAFETY: forwarded caller contract; the block came from the
            // large tier with size `old_n`.
            let out = unsafe { self.large.reallocate(ptr, old_n, new_n) };
            if let Ok(fresh) = out {
                self.stats.reallocs_large += 1;
                self.emit(AllocatorLogLevel::Trace, || {
                    LogEvent::new("reallocate", "realloc_large", "success")
                        .ptr(fresh)
                        .size(new_n)
                        .details(format!("old_size={old_n}"))
                });
            }
            return out;
        }

        if old_n <= max && new_n <= max && class_index(old_n) == class_index(new_n) {
            self.stats.reallocs_in_place += 1;
            self.emit(AllocatorLogLevel::Trace, || {
                LogEvent::new("reallocate", "realloc_in_place", "success")
                    .ptr(ptr)
                    .size(new_n)
                    .class(class_index(new_n))
                    .details(format!("old_size={old_n}"))
            });
            return Ok(ptr);
        }

        let fresh = self.allocate(new_n)?;
        // SAFETY: `ptr` holds at least `old_n` bytes, `fresh` at least
        // `new_n`, and `fresh` is a distinct live block.
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), fresh.as_ptr(), old_n.min(new_n));
            self.deallocate(ptr, old_n);
        }
        self.stats.reallocs_moved += 1;
        self.emit(AllocatorLogLevel::Trace, || {
            LogEvent::new("reallocate", "realloc_move", "success")
                .ptr(fresh)
                .size(new_n)
                .details(format!("old_size={old_n}"))
        });
        Ok(fresh)
    }

    /// Fetches a batch of `size`-byte blocks, returns the first and threads
    /// the rest onto the class list.
    fn refill(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let class = class_index(size);
        let mut count = self.config.refill_batch;
        let chunk = self.chunk_alloc(size, &mut count)?;
        self.stats.refills += 1;
        if count > 1 {
            // SAFETY: `chunk_alloc` carved `count * size` contiguous bytes
            // from the arena; the first block goes to the caller and the
            // rest are handed to the bank.
            unsafe {
                let rest = chunk.add(size);
                self.bank.push_chain(class, rest, size, count - 1);
            }
        }
        self.emit(AllocatorLogLevel::Debug, || {
            LogEvent::new("refill", "refill", "success")
                .ptr(chunk)
                .size(size)
                .class(class)
                .details(format!("blocks={count}"))
        });
        Ok(chunk)
    }

    /// Carves up to `*count` blocks of `size` bytes, growing the arena at
    /// most once. `*count` is lowered to what was actually carved.
    fn chunk_alloc(&mut self, size: usize, count: &mut usize) -> Result<NonNull<u8>, AllocError> {
        if let Some(chunk) = self.carve_blocks(size, count) {
            return Ok(chunk);
        }
        self.grow_arena(size, *count)?;
        self.carve_blocks(size, count)
            .ok_or(AllocError::Exhausted { size })
    }

    fn carve_blocks(&mut self, size: usize, count: &mut usize) -> Option<NonNull<u8>> {
        let left = self.arena.remaining();
        let total = size.saturating_mul(*count);
        if left >= total {
            return self.arena.carve(total);
        }
        if left >= size {
            *count = left / size;
            return self.arena.carve(size * *count);
        }
        None
    }

    /// Refills the empty arena, walking the growth ladder.
    fn grow_arena(&mut self, size: usize, count: usize) -> Result<(), AllocError> {
        if let Some((leftover, left)) = self.arena.take_leftover() {
            debug_assert_eq!(left % ALIGN, 0);
            let class = class_index(left);
            // SAFETY: the leftover is a stride-aligned tail of a slab (or of
            // a scavenged block) smaller than `size`, so it fits a class, and
            // the arena no longer hands it out.
            unsafe { self.bank.push(class, leftover) };
            self.stats.leftover_donations += 1;
            self.emit(AllocatorLogLevel::Debug, || {
                LogEvent::new("refill", "leftover_donated", "cached")
                    .ptr(leftover)
                    .size(left)
                    .class(class)
            });
        }

        let bytes_to_get = size
            .checked_mul(count)
            .and_then(|bytes| bytes.checked_mul(2))
            .and_then(|bytes| bytes.checked_add(round_up(self.arena.heap_size() >> 4)))
            .ok_or(AllocError::Exhausted { size: usize::MAX })?;

        if let Some(slab) = self.large.try_allocate(bytes_to_get) {
            self.install_slab(slab, bytes_to_get);
            return Ok(());
        }
        self.emit(AllocatorLogLevel::Warn, || {
            LogEvent::new("refill", "slab_alloc_failed", "retry")
                .size(bytes_to_get)
                .details("next=scavenge")
        });

        let from = class_index(size);
        if let Some(class) = self.bank.first_nonempty_from(from)
            && let Some(block) = self.bank.pop(class)
        {
            let len = class_size(class);
            self.arena.reclaim(block, len);
            self.stats.scavenges += 1;
            self.emit(AllocatorLogLevel::Info, || {
                LogEvent::new("refill", "free_list_scavenged", "success")
                    .ptr(block)
                    .size(len)
                    .class(class)
                    .details(format!("wanted_class={from}"))
            });
            return Ok(());
        }

        self.stats.oom_fallbacks += 1;
        self.emit(AllocatorLogLevel::Warn, || {
            LogEvent::new("refill", "oom_protocol", "retry")
                .size(bytes_to_get)
                .details("no spare blocks at or above the requested class")
        });
        let slab = self.large.allocate(bytes_to_get)?;
        self.install_slab(slab, bytes_to_get);
        Ok(())
    }

    fn install_slab(&mut self, slab: NonNull<u8>, len: usize) {
        self.arena.install_slab(slab, len);
        self.stats.arena_grows += 1;
        self.emit(AllocatorLogLevel::Info, || {
            LogEvent::new("refill", "arena_grow", "success")
                .ptr(slab)
                .size(len)
        });
        self.record_allocator_stats("refill");
    }

    fn record_allocator_stats(&mut self, symbol: &'static str) {
        let stats = self.stats;
        let large = self.large.stats();
        self.emit(AllocatorLogLevel::Debug, || {
            LogEvent::new(symbol, "allocator_stats", "snapshot").details(format!(
                "small_allocs={};small_frees={};refills={};arena_grows={};large_outstanding={}",
                stats.small_allocs,
                stats.small_frees,
                stats.refills,
                stats.arena_grows,
                large.bytes_outstanding
            ))
        });
    }

    fn emit<F>(&mut self, level: AllocatorLogLevel, make: F)
    where
        F: FnOnce() -> LogEvent,
    {
        if !self.log.enabled(level) {
            return;
        }
        let snapshot = LogSnapshot {
            arena_remaining: self.arena.remaining(),
            heap_size: self.arena.heap_size(),
            free_bytes: self.bank.free_bytes(),
        };
        self.log.record(level, make(), snapshot);
    }
}

impl<P: PlatformAlloc> Drop for PoolAllocator<P> {
    fn drop(&mut self) {
        for slab in self.arena.take_slabs() {
            // SAFETY: every slab came from the large tier with this length;
            // blocks carved from it are dead once the pool is dropped.
            unsafe { self.large.deallocate(slab.base, slab.len) };
        }
    }
}

impl<P: PlatformAlloc> RawAllocator for PoolAllocator<P> {
    fn allocate(&mut self, n: usize) -> Result<NonNull<u8>, AllocError> {
        PoolAllocator::allocate(self, n)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, n: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { PoolAllocator::deallocate(self, ptr, n) }
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_n: usize,
        new_n: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: forwarded caller contract.
        unsafe { PoolAllocator::reallocate(self, ptr, old_n, new_n) }
    }
}
