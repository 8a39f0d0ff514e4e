//! Element-typed facade over any [`RawAllocator`].
//!
//! Counts are in elements of `T`, not bytes. `construct`/`destroy` are the
//! placement-new and in-place-drop halves of object lifetime; allocation
//! never runs constructors.

use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};

use crate::error::AllocError;
use crate::pool::allocator::PoolAllocator;
use crate::pool::size_class::ALIGN;
use crate::raw::RawAllocator;

/// Allocates storage for `T` values from a borrowed raw allocator.
pub struct TypedAllocator<'a, T, A: RawAllocator + ?Sized = PoolAllocator> {
    raw: &'a mut A,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T, A: RawAllocator + ?Sized> TypedAllocator<'a, T, A> {
    pub fn new(raw: &'a mut A) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Largest element count a single request may ask for.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        match size_of::<T>() {
            0 => usize::MAX,
            size => isize::MAX as usize / size,
        }
    }

    /// Uninitialized storage for `n` values.
    ///
    /// `n == 0` and zero-sized `T` never touch the allocator and return a
    /// dangling, well-aligned pointer.
    pub fn allocate(&mut self, n: usize) -> Result<NonNull<T>, AllocError> {
        if n == 0 || size_of::<T>() == 0 {
            return Ok(NonNull::dangling());
        }
        if align_of::<T>() > ALIGN {
            return Err(AllocError::UnsupportedAlignment {
                align: align_of::<T>(),
            });
        }
        if n > self.max_size() {
            return Err(AllocError::LengthOverflow {
                count: n,
                elem_size: size_of::<T>(),
            });
        }
        let block = self.raw.allocate(n * size_of::<T>())?;
        Ok(block.cast::<T>())
    }

    pub fn allocate_one(&mut self) -> Result<NonNull<T>, AllocError> {
        self.allocate(1)
    }

    /// Releases storage for `n` values. Does not drop them.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`Self::allocate`] on an allocator over the same
    /// raw allocator with the same `n`, and must not be used afterwards.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<T>, n: usize) {
        if n == 0 || size_of::<T>() == 0 {
            return;
        }
        // SAFETY: forwarded caller contract; the byte size matches the one
        // used by `allocate`.
        unsafe { self.raw.deallocate(ptr.cast::<u8>(), n * size_of::<T>()) }
    }

    /// # Safety
    ///
    /// Same as [`Self::deallocate`] with `n == 1`.
    pub unsafe fn deallocate_one(&mut self, ptr: NonNull<T>) {
        // SAFETY: forwarded caller contract.
        unsafe { self.deallocate(ptr, 1) }
    }

    /// Moves `value` into uninitialized storage.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes and aligned. Any value already there
    /// is overwritten without being dropped.
    pub unsafe fn construct(&self, ptr: NonNull<T>, value: T) {
        // SAFETY: caller guarantees `ptr` is writable and aligned.
        unsafe { ptr.as_ptr().write(value) }
    }

    /// Drops the value at `ptr` in place, leaving the storage allocated.
    ///
    /// # Safety
    ///
    /// `ptr` must hold an initialized `T` that is not used again.
    pub unsafe fn destroy(&self, ptr: NonNull<T>) {
        // SAFETY: caller guarantees an initialized, unaliased value.
        unsafe { ptr::drop_in_place(ptr.as_ptr()) }
    }

    /// Drops `n` consecutive values starting at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr..ptr + n` must hold initialized values that are not used again.
    pub unsafe fn destroy_n(&self, ptr: NonNull<T>, n: usize) {
        // SAFETY: caller guarantees `n` initialized, unaliased values.
        unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(ptr.as_ptr(), n)) }
    }
}
