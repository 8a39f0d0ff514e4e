//! Large-block tier.
//!
//! Thin wrapper over a [`PlatformAlloc`] with the out-of-memory protocol:
//! when the platform fails, the installed recovery handler runs and the
//! request is retried, for as long as a handler stays installed. A handler
//! that never frees memory and never uninstalls itself spins forever; that
//! is the contract, not a bug.

use std::fmt;
use std::ptr::NonNull;

use crate::error::AllocError;
use crate::platform::{PlatformAlloc, SystemPlatform};
use crate::raw::RawAllocator;

/// What a recovery handler wants after it has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStatus {
    /// Stay installed; the failed request is retried.
    Retry,
    /// Remove the handler, then retry the request one last time.
    Uninstall,
}

/// Callback run when the platform allocator fails. Expected to free memory
/// elsewhere.
pub type RecoveryHandler = Box<dyn FnMut() -> RecoveryStatus + Send>;

/// Counters for the large-block tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LargeStats {
    /// Successful and failed `malloc` calls on the platform.
    pub platform_allocs: u64,
    /// `realloc` calls on the platform.
    pub platform_reallocs: u64,
    /// `free` calls on the platform.
    pub platform_frees: u64,
    /// Platform calls that returned no memory.
    pub platform_failures: u64,
    /// Recovery handler invocations.
    pub recovery_invocations: u64,
    /// Bytes currently held from the platform through this tier.
    pub bytes_outstanding: usize,
}

/// Platform-backed allocator with a pluggable recovery handler.
pub struct LargeBlockAllocator<P: PlatformAlloc = SystemPlatform> {
    platform: P,
    recovery: Option<RecoveryHandler>,
    stats: LargeStats,
}

impl LargeBlockAllocator<SystemPlatform> {
    /// Creates a tier backed by the process allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::with_platform(SystemPlatform)
    }
}

impl Default for LargeBlockAllocator<SystemPlatform> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PlatformAlloc> fmt::Debug for LargeBlockAllocator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LargeBlockAllocator")
            .field("has_recovery_handler", &self.recovery.is_some())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<P: PlatformAlloc> LargeBlockAllocator<P> {
    /// Creates a tier over an explicit platform.
    pub fn with_platform(platform: P) -> Self {
        Self {
            platform,
            recovery: None,
            stats: LargeStats::default(),
        }
    }

    /// Installs `handler` (or clears it with `None`), returning the previous
    /// one so callers can chain or restore it.
    pub fn set_recovery_handler(
        &mut self,
        handler: Option<RecoveryHandler>,
    ) -> Option<RecoveryHandler> {
        std::mem::replace(&mut self.recovery, handler)
    }

    /// True if a recovery handler is installed.
    #[must_use]
    pub fn has_recovery_handler(&self) -> bool {
        self.recovery.is_some()
    }

    #[must_use]
    pub fn stats(&self) -> LargeStats {
        self.stats
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// One platform attempt, no recovery protocol.
    pub fn try_allocate(&mut self, n: usize) -> Option<NonNull<u8>> {
        self.stats.platform_allocs += 1;
        match self.platform.malloc(n) {
            Some(ptr) => {
                self.stats.bytes_outstanding += n;
                Some(ptr)
            }
            None => {
                self.stats.platform_failures += 1;
                None
            }
        }
    }

    /// Allocates `n` bytes, running the recovery protocol on failure.
    pub fn allocate(&mut self, n: usize) -> Result<NonNull<u8>, AllocError> {
        if let Some(ptr) = self.try_allocate(n) {
            return Ok(ptr);
        }
        self.recover(n, |tier| tier.try_allocate(n))
    }

    /// Resizes a block, running the recovery protocol on failure. The
    /// resize itself is retried, not a fresh allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this tier with size `old_n` and must not
    /// have been released. On success `ptr` is invalid; on failure it is
    /// untouched.
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_n: usize,
        new_n: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: forwarded caller contract.
        if let Some(out) = unsafe { self.try_reallocate(ptr, old_n, new_n) } {
            return Ok(out);
        }
        // SAFETY: each retry only runs after the previous attempt failed,
        // so `ptr` is still the live block.
        self.recover(new_n, |tier| unsafe {
            tier.try_reallocate(ptr, old_n, new_n)
        })
    }

    /// Returns a block to the platform. Cannot fail.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this tier with size `n` and must not be
    /// used afterwards.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, n: usize) {
        self.stats.platform_frees += 1;
        self.stats.bytes_outstanding = self.stats.bytes_outstanding.saturating_sub(n);
        // SAFETY: forwarded caller contract.
        unsafe { self.platform.free(ptr, n) }
    }

    unsafe fn try_reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_n: usize,
        new_n: usize,
    ) -> Option<NonNull<u8>> {
        self.stats.platform_reallocs += 1;
        // SAFETY: forwarded caller contract.
        match unsafe { self.platform.realloc(ptr, old_n, new_n) } {
            Some(out) => {
                self.stats.bytes_outstanding =
                    self.stats.bytes_outstanding.saturating_sub(old_n) + new_n;
                Some(out)
            }
            None => {
                self.stats.platform_failures += 1;
                None
            }
        }
    }

    /// The retry loop: run the handler, retry, repeat until success or no
    /// handler is left.
    fn recover<F>(&mut self, n: usize, mut attempt: F) -> Result<NonNull<u8>, AllocError>
    where
        F: FnMut(&mut Self) -> Option<NonNull<u8>>,
    {
        loop {
            let Some(handler) = self.recovery.as_mut() else {
                return Err(AllocError::Exhausted { size: n });
            };
            self.stats.recovery_invocations += 1;
            if handler() == RecoveryStatus::Uninstall {
                self.recovery = None;
            }
            if let Some(ptr) = attempt(self) {
                return Ok(ptr);
            }
        }
    }
}

impl<P: PlatformAlloc> RawAllocator for LargeBlockAllocator<P> {
    fn allocate(&mut self, n: usize) -> Result<NonNull<u8>, AllocError> {
        LargeBlockAllocator::allocate(self, n)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, n: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { LargeBlockAllocator::deallocate(self, ptr, n) }
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_n: usize,
        new_n: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: forwarded caller contract.
        unsafe { LargeBlockAllocator::reallocate(self, ptr, old_n, new_n) }
    }
}
