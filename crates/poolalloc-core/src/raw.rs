//! Byte-level allocator interface shared by every tier.

use std::ptr::NonNull;

use crate::error::AllocError;

/// Sized raw allocation: callers hand back the size they asked for.
///
/// Implemented by [`crate::LargeBlockAllocator`], [`crate::PoolAllocator`]
/// and [`crate::SharedPool`]; [`crate::TypedAllocator`] is generic over it.
pub trait RawAllocator {
    /// Returns a block of at least `n` bytes, aligned to [`crate::ALIGN`].
    fn allocate(&mut self, n: usize) -> Result<NonNull<u8>, AllocError>;

    /// Releases a block.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this allocator for a request of exactly
    /// `n` bytes and must not be used afterwards.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, n: usize);

    /// Resizes a block, preserving the first `min(old_n, new_n)` bytes.
    ///
    /// # Safety
    ///
    /// `ptr` must be live, from this allocator, with size `old_n`. On
    /// success it must not be used again; on failure it is untouched.
    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_n: usize,
        new_n: usize,
    ) -> Result<NonNull<u8>, AllocError>;
}
