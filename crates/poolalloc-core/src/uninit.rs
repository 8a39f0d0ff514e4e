//! Building runs of values in uninitialized storage.
//!
//! Storage from a [`TypedAllocator`](crate::TypedAllocator) holds no values.
//! These helpers fill it element by element. If a `Clone`, `Default` or
//! iterator call panics partway, the values already written are dropped
//! before the panic continues, leaving the storage uninitialized again.

use std::mem;
use std::ptr::{self, NonNull};

/// Prefix of a run written so far. Dropped on unwind, forgotten on success.
struct PartialInit<T> {
    start: NonNull<T>,
    built: usize,
}

impl<T> PartialInit<T> {
    fn new(start: NonNull<T>) -> Self {
        Self { start, built: 0 }
    }

    /// # Safety
    ///
    /// Slot `built` past `start` must be valid for writes and aligned.
    unsafe fn push(&mut self, value: T) {
        // SAFETY: caller guarantees the next slot is writable.
        unsafe { self.start.add(self.built).write(value) };
        self.built += 1;
    }

    fn finish(self) -> NonNull<T> {
        // SAFETY: `built` slots were written, so the end is at most one past
        // the storage the caller provided.
        let end = unsafe { self.start.add(self.built) };
        mem::forget(self);
        end
    }
}

impl<T> Drop for PartialInit<T> {
    fn drop(&mut self) {
        // SAFETY: the first `built` slots hold values written by `push` that
        // nobody else owns yet.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(
                self.start.as_ptr(),
                self.built,
            ));
        }
    }
}

/// Clones every item of `src` into consecutive slots starting at `dst`.
/// Returns one past the last slot written.
///
/// # Safety
///
/// `dst` must be valid for writes of as many `T` as `src` yields, and
/// aligned. Those slots must not hold values that need dropping.
pub unsafe fn uninitialized_copy<'a, T, I>(src: I, dst: NonNull<T>) -> NonNull<T>
where
    T: Clone + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut run = PartialInit::new(dst);
    for value in src {
        // SAFETY: caller guarantees room for every source item.
        unsafe { run.push(value.clone()) };
    }
    run.finish()
}

/// Clones at most `count` items of `src` into storage at `dst`.
///
/// # Safety
///
/// As [`uninitialized_copy`], for `count` slots.
pub unsafe fn uninitialized_copy_n<'a, T, I>(src: I, count: usize, dst: NonNull<T>) -> NonNull<T>
where
    T: Clone + 'a,
    I: IntoIterator<Item = &'a T>,
{
    // SAFETY: forwarded caller contract; at most `count` items are taken.
    unsafe { uninitialized_copy(src.into_iter().take(count), dst) }
}

/// Moves every item of `src` into storage at `dst`.
///
/// # Safety
///
/// As [`uninitialized_copy`].
pub unsafe fn uninitialized_move<T, I>(src: I, dst: NonNull<T>) -> NonNull<T>
where
    I: IntoIterator<Item = T>,
{
    let mut run = PartialInit::new(dst);
    for value in src {
        // SAFETY: caller guarantees room for every source item.
        unsafe { run.push(value) };
    }
    run.finish()
}

/// Moves at most `count` items of `src` into storage at `dst`. Returns the
/// rest of the source together with one past the last slot written.
///
/// # Safety
///
/// As [`uninitialized_copy`], for `count` slots.
pub unsafe fn uninitialized_move_n<T, I>(
    src: I,
    count: usize,
    dst: NonNull<T>,
) -> (I::IntoIter, NonNull<T>)
where
    I: IntoIterator<Item = T>,
{
    let mut iter = src.into_iter();
    let mut run = PartialInit::new(dst);
    for value in iter.by_ref().take(count) {
        // SAFETY: caller guarantees `count` writable slots.
        unsafe { run.push(value) };
    }
    (iter, run.finish())
}

/// Writes a clone of `value` into every slot of `dst`.
///
/// # Safety
///
/// `dst` must be valid for writes and aligned, with no values that need
/// dropping.
pub unsafe fn uninitialized_fill<T: Clone>(dst: NonNull<[T]>, value: &T) {
    // SAFETY: forwarded caller contract over the whole slice.
    unsafe { uninitialized_fill_n(dst.cast::<T>(), dst.len(), value) };
}

/// Writes `count` clones of `value` starting at `dst`. Returns one past the
/// last slot written.
///
/// # Safety
///
/// `dst` must be valid for writes of `count` values and aligned, with no
/// values that need dropping.
pub unsafe fn uninitialized_fill_n<T: Clone>(
    dst: NonNull<T>,
    count: usize,
    value: &T,
) -> NonNull<T> {
    let mut run = PartialInit::new(dst);
    for _ in 0..count {
        // SAFETY: caller guarantees `count` writable slots.
        unsafe { run.push(value.clone()) };
    }
    run.finish()
}

/// Writes `T::default()` into every slot of `dst`.
///
/// # Safety
///
/// As [`uninitialized_fill`].
pub unsafe fn uninitialized_default_construct<T: Default>(dst: NonNull<[T]>) {
    // SAFETY: forwarded caller contract over the whole slice.
    unsafe { uninitialized_default_construct_n(dst.cast::<T>(), dst.len()) };
}

/// Writes `count` default values starting at `dst`. Returns one past the
/// last slot written.
///
/// # Safety
///
/// As [`uninitialized_fill_n`].
pub unsafe fn uninitialized_default_construct_n<T: Default>(
    dst: NonNull<T>,
    count: usize,
) -> NonNull<T> {
    let mut run = PartialInit::new(dst);
    for _ in 0..count {
        // SAFETY: caller guarantees `count` writable slots.
        unsafe { run.push(T::default()) };
    }
    run.finish()
}

/// Drops every value in `first..last` in place. The storage stays
/// allocated.
///
/// # Safety
///
/// `first` and `last` must bound one run inside a single allocation, with
/// `first <= last`, and every slot in between must hold an initialized
/// value that is not used again.
///
/// # Panics
///
/// If `T` is zero-sized; two addresses cannot express a count of those.
pub unsafe fn destroy<T>(first: NonNull<T>, last: NonNull<T>) {
    assert!(mem::size_of::<T>() != 0, "destroy over a zero-sized type");
    // SAFETY: caller guarantees both ends lie in one allocation.
    let len = unsafe { last.offset_from(first) };
    let len = usize::try_from(len).unwrap_or(0);
    // SAFETY: caller guarantees `len` initialized, unaliased values.
    unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(first.as_ptr(), len)) }
}
