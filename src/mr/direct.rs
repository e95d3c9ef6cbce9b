//! Direct resources: one driver reservation per allocation
//!
//! [`DirectResource::device`] reserves device-exclusive memory and
//! [`DirectResource::managed`] reserves unified memory visible to host and
//! device. Both forward every call straight to the [`DeviceAllocator`] and
//! keep no bookkeeping of their own, so they are cheap to share and ignore
//! the stream argument entirely.

use std::any::Any;
use std::sync::Arc;

use crate::backend::{platform_allocator, SharedAllocator};
use crate::error::MemResult;
use crate::mr::DeviceMemoryResource;
use crate::types::{DevicePtr, MemInfo, MemoryKind, StreamHandle};

/// Passthrough resource over a device allocator
#[derive(Debug, Clone)]
pub struct DirectResource {
    allocator: SharedAllocator,
    kind: MemoryKind,
}

impl DirectResource {
    /// Device-exclusive memory from `allocator`
    pub fn device(allocator: SharedAllocator) -> Self {
        DirectResource {
            allocator,
            kind: MemoryKind::Device,
        }
    }

    /// Unified (managed) memory from `allocator`
    pub fn managed(allocator: SharedAllocator) -> Self {
        DirectResource {
            allocator,
            kind: MemoryKind::Managed,
        }
    }

    /// Device memory from the platform allocator
    pub fn platform_device() -> Self {
        Self::device(platform_allocator())
    }

    /// Managed memory from the platform allocator
    pub fn platform_managed() -> Self {
        Self::managed(platform_allocator())
    }

    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    pub fn allocator(&self) -> &SharedAllocator {
        &self.allocator
    }
}

impl DeviceMemoryResource for DirectResource {
    fn allocate(&self, bytes: usize, _stream: StreamHandle) -> MemResult<DevicePtr> {
        if bytes == 0 {
            return Ok(DevicePtr::null());
        }
        let ptr = self.allocator.reserve(bytes, self.kind)?;
        tracing::trace!("DirectResource({:?}): allocated {} bytes at {}", self.kind, bytes, ptr);
        Ok(ptr)
    }

    fn deallocate(&self, ptr: DevicePtr, bytes: usize, _stream: StreamHandle) {
        if ptr.is_null() {
            debug_assert_eq!(bytes, 0, "null pointer deallocated with non-zero size");
            return;
        }
        tracing::trace!("DirectResource({:?}): releasing {} bytes at {}", self.kind, bytes, ptr);
        self.allocator.release(ptr, bytes, self.kind);
    }

    /// Direct resources of the same kind over the same allocator are
    /// interchangeable: each one just hands the pointer back to the driver.
    fn is_equal(&self, other: &dyn DeviceMemoryResource) -> bool {
        match other.as_any().downcast_ref::<DirectResource>() {
            Some(other) => self.kind == other.kind && Arc::ptr_eq(&self.allocator, &other.allocator),
            None => false,
        }
    }

    fn supports_streams(&self) -> bool {
        false
    }

    fn mem_info(&self) -> MemResult<MemInfo> {
        self.allocator.mem_info()
    }

    fn synchronize_stream(&self, stream: StreamHandle) -> MemResult<()> {
        self.allocator.synchronize_stream(stream)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
