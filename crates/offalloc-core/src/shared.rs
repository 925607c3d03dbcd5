//! Mutex-guarded allocator for callers that share one range across threads.
//!
//! The allocator itself has no interior locking. This wrapper holds it
//! behind a single `parking_lot::Mutex`; every operation takes the lock for
//! its whole duration since allocate and free both rewrite the bitmaps.

use parking_lot::Mutex;

use crate::allocator::{Allocation, Allocator, NodeHandle};
use crate::error::{AllocError, HandleError};
use crate::report::StorageReport;

/// Thread-safe handle to one [`Allocator`].
pub struct SharedAllocator {
    inner: Mutex<Allocator>,
}

impl SharedAllocator {
    #[must_use]
    pub fn new(allocator: Allocator) -> Self {
        Self {
            inner: Mutex::new(allocator),
        }
    }

    pub fn allocate(&self, size: u32) -> Result<Allocation, AllocError> {
        self.inner.lock().allocate(size)
    }

    pub fn free(&self, allocation: Allocation) -> Result<(), HandleError> {
        self.inner.lock().free(allocation)
    }

    pub fn allocation_size(&self, handle: NodeHandle) -> Result<u32, HandleError> {
        self.inner.lock().allocation_size(handle)
    }

    #[must_use]
    pub fn storage_report(&self) -> StorageReport {
        self.inner.lock().storage_report()
    }

    pub fn reset(&self) {
        self.inner.lock().reset();
    }

    /// Runs `f` with the lock held, for multi-step sequences that must not
    /// interleave with other threads.
    pub fn with<R>(&self, f: impl FnOnce(&mut Allocator) -> R) -> R {
        f(&mut self.inner.lock())
    }

    #[must_use]
    pub fn into_inner(self) -> Allocator {
        self.inner.into_inner()
    }
}

impl std::fmt::Debug for SharedAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedAllocator").finish_non_exhaustive()
    }
}
