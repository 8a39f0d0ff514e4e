//! Pool arena: the unclaimed range `[start, end)` that refills carve from.
//!
//! The arena only grows. `heap_size` counts every byte obtained from the
//! large-block tier and feeds the next growth request.

use std::ptr::NonNull;

/// Byte accounting for the arena.
///
/// `carved + remaining == granted + reclaimed` holds at all times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Bytes obtained from the large-block tier.
    pub granted: usize,
    /// Bytes re-entering the arena from scavenged free-list blocks.
    pub reclaimed: usize,
    /// Bytes handed out of the arena, donated leftovers included.
    pub carved: usize,
    /// Leftover bytes donated to free lists before a growth.
    pub donated: usize,
    /// Bytes still unclaimed in the arena.
    pub remaining: usize,
    /// Cumulative growth counter used to size the next slab.
    pub heap_size: usize,
    /// Slabs obtained from the large-block tier.
    pub slabs: usize,
}

/// A slab obtained from the large-block tier, released on teardown.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Slab {
    pub base: NonNull<u8>,
    pub len: usize,
}

#[derive(Debug)]
pub(crate) struct PoolArena {
    cursor: Option<NonNull<u8>>,
    remaining: usize,
    slabs: Vec<Slab>,
    stats: ArenaStats,
}

impl PoolArena {
    pub fn new() -> Self {
        Self {
            cursor: None,
            remaining: 0,
            slabs: Vec::new(),
            stats: ArenaStats::default(),
        }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn heap_size(&self) -> usize {
        self.stats.heap_size
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            remaining: self.remaining(),
            slabs: self.slabs.len(),
            ..self.stats
        }
    }

    /// Carves `bytes` off the front, or `None` if fewer remain.
    pub fn carve(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        if bytes == 0 || bytes > self.remaining {
            return None;
        }
        let out = self.cursor?;
        self.remaining -= bytes;
        // SAFETY: `bytes <= remaining`, so the new cursor is within (or one
        // past the end of) the current range.
        self.cursor = Some(unsafe { out.add(bytes) });
        self.stats.carved += bytes;
        Some(out)
    }

    /// Takes whatever is left (for donation), leaving the arena empty.
    pub fn take_leftover(&mut self) -> Option<(NonNull<u8>, usize)> {
        let left = self.remaining;
        let ptr = self.carve(left)?;
        self.stats.donated += left;
        Some((ptr, left))
    }

    /// Replaces the (empty) range with a fresh slab from the large tier.
    pub fn install_slab(&mut self, base: NonNull<u8>, len: usize) {
        debug_assert_eq!(self.remaining(), 0);
        self.set_range(base, len);
        self.slabs.push(Slab { base, len });
        self.stats.granted += len;
        self.stats.heap_size += len;
    }

    /// Replaces the (empty) range with a block scavenged from a free list.
    pub fn reclaim(&mut self, base: NonNull<u8>, len: usize) {
        debug_assert_eq!(self.remaining(), 0);
        self.set_range(base, len);
        self.stats.reclaimed += len;
    }

    /// Slabs to hand back to the large tier on teardown.
    pub fn take_slabs(&mut self) -> Vec<Slab> {
        self.cursor = None;
        self.remaining = 0;
        std::mem::take(&mut self.slabs)
    }

    fn set_range(&mut self, base: NonNull<u8>, len: usize) {
        self.cursor = Some(base);
        self.remaining = len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(8))]
    struct Backing([u8; 512]);

    #[test]
    fn carve_advances_and_accounts() {
        let mut backing = Backing([0; 512]);
        let base = NonNull::new(backing.0.as_mut_ptr()).unwrap();
        let mut arena = PoolArena::new();
        assert!(arena.carve(8).is_none());

        arena.install_slab(base, 512);
        assert_eq!(arena.carve(128), Some(base));
        assert_eq!(arena.carve(64), Some(unsafe { base.add(128) }));
        assert!(arena.carve(1024).is_none());

        let stats = arena.stats();
        assert_eq!(stats.granted, 512);
        assert_eq!(stats.carved, 192);
        assert_eq!(stats.remaining, 320);
        assert_eq!(stats.heap_size, 512);
        assert_eq!(stats.carved + stats.remaining, stats.granted + stats.reclaimed);
        arena.take_slabs();
    }

    #[test]
    fn leftover_is_taken_whole() {
        let mut backing = Backing([0; 512]);
        let base = NonNull::new(backing.0.as_mut_ptr()).unwrap();
        let mut arena = PoolArena::new();
        arena.install_slab(base, 100);
        arena.carve(64);
        assert_eq!(arena.take_leftover(), Some((unsafe { base.add(64) }, 36)));
        assert_eq!(arena.take_leftover(), None);
        assert_eq!(arena.stats().donated, 36);
        assert_eq!(arena.stats().carved, 100);
        arena.take_slabs();
    }

    #[test]
    fn reclaim_does_not_grow_heap_size() {
        let mut backing = Backing([0; 512]);
        let base = NonNull::new(backing.0.as_mut_ptr()).unwrap();
        let mut arena = PoolArena::new();
        arena.reclaim(base, 64);
        let stats = arena.stats();
        assert_eq!(stats.heap_size, 0);
        assert_eq!(stats.reclaimed, 64);
        assert_eq!(stats.slabs, 0);
        assert!(arena.take_slabs().is_empty());
    }
}
