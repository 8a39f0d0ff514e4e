//! Free-list bank: one intrusive singly-linked list per size class.
//!
//! A free block's first word is reinterpreted as a [`FreeNode`] holding the
//! next pointer. That view only exists while the block sits on a list; once
//! popped, the bytes belong to the caller and are never read here again.

use std::ptr::NonNull;

use super::size_class::{ALIGN, class_size};

/// Link cell overlaid on a free block.
#[repr(C)]
struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

const _: () = assert!(std::mem::size_of::<FreeNode>() <= ALIGN);

/// List heads plus population counts.
#[derive(Debug)]
pub(crate) struct FreeListBank {
    heads: Vec<Option<NonNull<FreeNode>>>,
    lens: Vec<usize>,
}

impl FreeListBank {
    pub fn new(classes: usize) -> Self {
        Self {
            heads: vec![None; classes],
            lens: vec![0; classes],
        }
    }

    pub fn len(&self, class: usize) -> usize {
        self.lens.get(class).copied().unwrap_or(0)
    }

    /// Bytes parked across all lists.
    pub fn free_bytes(&self) -> usize {
        self.lens
            .iter()
            .enumerate()
            .map(|(class, &len)| len * class_size(class))
            .sum()
    }

    /// Pops the head of `class`, O(1).
    pub fn pop(&mut self, class: usize) -> Option<NonNull<u8>> {
        let node = self.heads[class]?;
        debug_assert_eq!(node.as_ptr() as usize % ALIGN, 0, "misaligned free node");
        // SAFETY: every node on a list was pushed by `push`/`push_chain`,
        // which wrote a valid link into its first word, and nothing else
        // touches a block while it is on a list.
        let next = unsafe { node.as_ref().next };
        self.heads[class] = next;
        self.lens[class] -= 1;
        Some(node.cast::<u8>())
    }

    /// Pushes a block onto `class`, O(1). No coalescing.
    ///
    /// # Safety
    ///
    /// `block` must be valid for writes of at least `class_size(class)`
    /// bytes, aligned to [`ALIGN`], and exclusively owned by the bank from
    /// now on.
    pub unsafe fn push(&mut self, class: usize, block: NonNull<u8>) {
        let node = block.cast::<FreeNode>();
        // SAFETY: caller guarantees `block` is writable, aligned, and owned.
        unsafe {
            node.as_ptr().write(FreeNode {
                next: self.heads[class],
            });
        }
        self.heads[class] = Some(node);
        self.lens[class] += 1;
    }

    /// Threads `count` contiguous blocks of `block_size` bytes starting at
    /// `first` onto `class`, in address order, terminated by the previous
    /// head.
    ///
    /// # Safety
    ///
    /// `[first, first + count * block_size)` must be writable, aligned, and
    /// exclusively owned by the bank from now on. `block_size` must equal
    /// `class_size(class)`.
    pub unsafe fn push_chain(
        &mut self,
        class: usize,
        first: NonNull<u8>,
        block_size: usize,
        count: usize,
    ) {
        debug_assert_eq!(block_size, class_size(class));
        // Link back-to-front so the lowest address ends up at the head.
        for i in (0..count).rev() {
            // SAFETY: `i * block_size` stays inside the caller's range.
            let block = unsafe { first.add(i * block_size) };
            // SAFETY: forwarded caller contract for this block.
            unsafe { self.push(class, block) };
        }
    }

    /// First class at or above `from` with a spare block, if any.
    pub fn first_nonempty_from(&self, from: usize) -> Option<usize> {
        (from..self.heads.len()).find(|&class| self.heads[class].is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(8))]
    struct Backing([u8; 256]);

    #[test]
    fn push_pop_is_lifo() {
        let mut backing = Backing([0; 256]);
        let base = NonNull::new(backing.0.as_mut_ptr()).unwrap();
        let mut bank = FreeListBank::new(16);
        // SAFETY: distinct 16-byte blocks inside `backing`.
        unsafe {
            bank.push(1, base);
            bank.push(1, base.add(16));
        }
        assert_eq!(bank.len(1), 2);
        assert_eq!(bank.free_bytes(), 32);
        assert_eq!(bank.pop(1), Some(unsafe { base.add(16) }));
        assert_eq!(bank.pop(1), Some(base));
        assert_eq!(bank.pop(1), None);
        assert_eq!(bank.len(1), 0);
    }

    #[test]
    fn chain_pops_in_address_order() {
        let mut backing = Backing([0; 256]);
        let base = NonNull::new(backing.0.as_mut_ptr()).unwrap();
        let mut bank = FreeListBank::new(16);
        // SAFETY: 8 blocks of 32 bytes fill `backing` exactly.
        unsafe { bank.push_chain(3, base, 32, 8) };
        assert_eq!(bank.len(3), 8);
        for i in 0..8 {
            assert_eq!(bank.pop(3), Some(unsafe { base.add(i * 32) }));
        }
        assert!(bank.pop(3).is_none());
    }

    #[test]
    fn chain_keeps_existing_tail() {
        let mut backing = Backing([0; 256]);
        let base = NonNull::new(backing.0.as_mut_ptr()).unwrap();
        let mut bank = FreeListBank::new(16);
        // SAFETY: disjoint 8-byte blocks inside `backing`.
        unsafe {
            bank.push(0, base.add(200));
            bank.push_chain(0, base, 8, 2);
        }
        assert_eq!(bank.pop(0), Some(base));
        assert_eq!(bank.pop(0), Some(unsafe { base.add(8) }));
        assert_eq!(bank.pop(0), Some(unsafe { base.add(200) }));
    }

    #[test]
    fn first_nonempty_scans_upward() {
        let mut backing = Backing([0; 256]);
        let base = NonNull::new(backing.0.as_mut_ptr()).unwrap();
        let mut bank = FreeListBank::new(16);
        assert_eq!(bank.first_nonempty_from(0), None);
        // SAFETY: one 64-byte block inside `backing`.
        unsafe { bank.push(7, base) };
        assert_eq!(bank.first_nonempty_from(2), Some(7));
        assert_eq!(bank.first_nonempty_from(7), Some(7));
        assert_eq!(bank.first_nonempty_from(8), None);
    }
}
