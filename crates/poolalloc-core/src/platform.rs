//! Platform allocator seam.
//!
//! The large-block tier never calls libc directly. It goes through
//! [`PlatformAlloc`] so embedders can swap the backing allocator and tests
//! can simulate exhaustion with [`Budgeted`].

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A `malloc`/`realloc`/`free` style backing allocator.
///
/// Every returned block must be aligned to at least
/// [`ALIGN`](crate::ALIGN) bytes. Sizes are passed on every call so wrappers
/// can do their own accounting.
pub trait PlatformAlloc {
    /// Allocates `size` bytes. `None` signals failure.
    fn malloc(&mut self, size: usize) -> Option<NonNull<u8>>;

    /// Resizes a block. On failure the original block is left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this platform with size `old_size` and must
    /// not have been freed.
    unsafe fn realloc(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>>;

    /// Releases a block.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this platform with size `size` and must not
    /// be used afterwards.
    unsafe fn free(&mut self, ptr: NonNull<u8>, size: usize);
}

/// The process allocator (`libc::malloc` and friends).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SystemPlatform;

impl PlatformAlloc for SystemPlatform {
    fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        // SAFETY: malloc accepts any size; a zero-byte request is promoted so
        // a non-null result is always a distinct block.
        let raw = unsafe { libc::malloc(size.max(1)) };
        NonNull::new(raw.cast::<u8>())
    }

    unsafe fn realloc(
        &mut self,
        ptr: NonNull<u8>,
        _old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: caller guarantees `ptr` is a live libc allocation.
        let raw = unsafe { libc::realloc(ptr.as_ptr().cast::<c_void>(), new_size.max(1)) };
        NonNull::new(raw.cast::<u8>())
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>, _size: usize) {
        // SAFETY: caller guarantees `ptr` is a live libc allocation.
        unsafe { libc::free(ptr.as_ptr().cast::<c_void>()) }
    }
}

#[derive(Debug)]
struct Budget {
    limit: AtomicUsize,
    in_use: AtomicUsize,
}

/// Caps the bytes outstanding through an inner platform.
///
/// Clones share one budget, so a recovery handler holding a clone can free
/// memory or raise the limit for the allocator that owns the original.
#[derive(Debug, Clone)]
pub struct Budgeted<P = SystemPlatform> {
    inner: P,
    budget: Arc<Budget>,
}

impl<P: PlatformAlloc> Budgeted<P> {
    /// Wraps `inner` with a limit of `limit` outstanding bytes.
    #[must_use]
    pub fn new(inner: P, limit: usize) -> Self {
        Self {
            inner,
            budget: Arc::new(Budget {
                limit: AtomicUsize::new(limit),
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Wraps `inner` without a cap; accounting still runs.
    #[must_use]
    pub fn unlimited(inner: P) -> Self {
        Self::new(inner, usize::MAX)
    }

    /// Current cap in bytes.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.budget.limit.load(Ordering::Acquire)
    }

    /// Replaces the cap. Lowering it below `in_use` only blocks new requests.
    pub fn set_limit(&self, limit: usize) {
        self.budget.limit.store(limit, Ordering::Release);
    }

    /// Bytes currently outstanding through this budget.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.budget.in_use.load(Ordering::Acquire)
    }

    fn reserve(&self, bytes: usize) -> bool {
        let limit = self.limit();
        self.budget
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&next| next <= limit)
            })
            .is_ok()
    }

    fn release(&self, bytes: usize) {
        let _ = self
            .budget
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}

impl<P: PlatformAlloc> PlatformAlloc for Budgeted<P> {
    fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if !self.reserve(size) {
            return None;
        }
        let out = self.inner.malloc(size);
        if out.is_none() {
            self.release(size);
        }
        out
    }

    unsafe fn realloc(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let growth = new_size.saturating_sub(old_size);
        if growth > 0 && !self.reserve(growth) {
            return None;
        }
        // SAFETY: forwarded caller contract.
        let out = unsafe { self.inner.realloc(ptr, old_size, new_size) };
        match out {
            Some(_) if new_size < old_size => self.release(old_size - new_size),
            None if growth > 0 => self.release(growth),
            _ => {}
        }
        out
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.free(ptr, size) };
        self.release(size);
    }
}
