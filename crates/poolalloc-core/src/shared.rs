//! Thread-safe handle to one pool.
//!
//! [`PoolAllocator`] is single-threaded. `SharedPool` serializes every call
//! on a `parking_lot::Mutex`, so clones on different threads share one set
//! of free lists and one arena.

use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::AllocError;
use crate::platform::{PlatformAlloc, SystemPlatform};
use crate::pool::allocator::{PoolAllocator, PoolStats};
use crate::raw::RawAllocator;

pub struct SharedPool<P: PlatformAlloc = SystemPlatform> {
    inner: Arc<Mutex<PoolAllocator<P>>>,
}

impl<P: PlatformAlloc> Clone for SharedPool<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for SharedPool<SystemPlatform> {
    fn default() -> Self {
        Self::new(PoolAllocator::new())
    }
}

impl<P: PlatformAlloc> SharedPool<P> {
    pub fn new(pool: PoolAllocator<P>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pool)),
        }
    }

    /// Runs `f` with the pool locked. Use it to batch several calls under
    /// one lock or to reach accessors not mirrored here.
    pub fn with<R>(&self, f: impl FnOnce(&mut PoolAllocator<P>) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut *guard)
    }

    pub fn allocate(&self, n: usize) -> Result<NonNull<u8>, AllocError> {
        self.inner.lock().allocate(n)
    }

    /// # Safety
    ///
    /// Same contract as [`PoolAllocator::deallocate`]; the block may have
    /// been allocated through any clone of this handle.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, n: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.lock().deallocate(ptr, n) }
    }

    /// # Safety
    ///
    /// Same contract as [`PoolAllocator::reallocate`].
    pub unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_n: usize,
        new_n: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.lock().reallocate(ptr, old_n, new_n) }
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats()
    }
}

impl<P: PlatformAlloc> RawAllocator for SharedPool<P> {
    fn allocate(&mut self, n: usize) -> Result<NonNull<u8>, AllocError> {
        SharedPool::allocate(self, n)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, n: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { SharedPool::deallocate(self, ptr, n) }
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_n: usize,
        new_n: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: forwarded caller contract.
        unsafe { SharedPool::reallocate(self, ptr, old_n, new_n) }
    }
}
