//! Thread-safety adaptor
//!
//! [`ThreadSafeResource`] owns a resource behind a `Mutex` and runs every
//! call under the lock. It protects the wrapped resource's bookkeeping only;
//! ordering of device work across streams is still the caller's concern.

use std::any::Any;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::MemResult;
use crate::mr::{same_resource, DeviceMemoryResource};
use crate::types::{DevicePtr, MemInfo, StreamHandle};

/// Serializes all calls into the wrapped resource
#[derive(Debug)]
pub struct ThreadSafeResource<R> {
    inner: Mutex<R>,
}

impl<R: DeviceMemoryResource> ThreadSafeResource<R> {
    pub fn new(resource: R) -> Self {
        ThreadSafeResource {
            inner: Mutex::new(resource),
        }
    }

    /// Lock the wrapped resource, e.g. to read pool statistics
    ///
    /// # Errors
    /// - `LockPoisoned` if a thread panicked while holding the lock
    pub fn lock(&self) -> MemResult<MutexGuard<'_, R>> {
        Ok(self.inner.lock()?)
    }

    pub fn into_inner(self) -> MemResult<R> {
        Ok(self.inner.into_inner()?)
    }

    /// Deallocation cannot report errors, so a poisoned lock is logged and
    /// entered anyway
    fn lock_for_release(&self) -> MutexGuard<'_, R> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::error!("ThreadSafeResource: lock poisoned, continuing with deallocation");
            PoisonError::into_inner(poisoned)
        })
    }
}

impl<R: DeviceMemoryResource> DeviceMemoryResource for ThreadSafeResource<R> {
    fn allocate(&self, bytes: usize, stream: StreamHandle) -> MemResult<DevicePtr> {
        self.lock()?.allocate(bytes, stream)
    }

    fn deallocate(&self, ptr: DevicePtr, bytes: usize, stream: StreamHandle) {
        self.lock_for_release().deallocate(ptr, bytes, stream)
    }

    fn is_equal(&self, other: &dyn DeviceMemoryResource) -> bool {
        if same_resource(self, other) {
            return true;
        }

        if let Some(other) = other.as_any().downcast_ref::<Self>() {
            // Lock in address order so two threads comparing a with b and
            // b with a cannot deadlock
            let (first, second) = if (self as *const Self) < (other as *const Self) {
                (self, other)
            } else {
                (other, self)
            };
            let first_guard = first.lock_for_release();
            let second_guard = second.lock_for_release();
            return first_guard.is_equal(&*second_guard);
        }

        self.lock_for_release().is_equal(other)
    }

    fn supports_streams(&self) -> bool {
        self.lock_for_release().supports_streams()
    }

    fn supports_cross_stream_free(&self) -> bool {
        self.lock_for_release().supports_cross_stream_free()
    }

    fn mem_info(&self) -> MemResult<MemInfo> {
        self.lock()?.mem_info()
    }

    fn synchronize_stream(&self, stream: StreamHandle) -> MemResult<()> {
        self.lock()?.synchronize_stream(stream)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
