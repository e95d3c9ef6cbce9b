//! Size-routed resource
//!
//! Requests up to a threshold go to one resource and larger requests go to
//! another. The usual arrangement is a pool for small, frequent allocations
//! and a direct resource for large ones that would otherwise bloat the pool.

use std::any::Any;

use crate::error::{MemResult, MemoryError};
use crate::mr::{same_resource, DeviceMemoryResource, SharedResource};
use crate::types::{DevicePtr, MemInfo, StreamHandle};

#[derive(Debug, Clone)]
pub struct HybridResource {
    small: SharedResource,
    large: SharedResource,
    threshold: usize,
}

impl HybridResource {
    /// Route `bytes <= threshold` to `small` and the rest to `large`
    pub fn new(small: SharedResource, large: SharedResource, threshold: usize) -> Self {
        HybridResource {
            small,
            large,
            threshold,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn small(&self) -> &SharedResource {
        &self.small
    }

    pub fn large(&self) -> &SharedResource {
        &self.large
    }

    fn route(&self, bytes: usize) -> &SharedResource {
        if bytes <= self.threshold {
            &self.small
        } else {
            &self.large
        }
    }
}

impl DeviceMemoryResource for HybridResource {
    fn allocate(&self, bytes: usize, stream: StreamHandle) -> MemResult<DevicePtr> {
        self.route(bytes).allocate(bytes, stream)
    }

    fn deallocate(&self, ptr: DevicePtr, bytes: usize, stream: StreamHandle) {
        self.route(bytes).deallocate(ptr, bytes, stream)
    }

    fn is_equal(&self, other: &dyn DeviceMemoryResource) -> bool {
        if same_resource(self, other) {
            return true;
        }
        match other.as_any().downcast_ref::<HybridResource>() {
            Some(other) => {
                self.threshold == other.threshold
                    && self.small.is_equal(&*other.small)
                    && self.large.is_equal(&*other.large)
            }
            None => false,
        }
    }

    fn supports_streams(&self) -> bool {
        self.small.supports_streams() || self.large.supports_streams()
    }

    fn supports_cross_stream_free(&self) -> bool {
        self.small.supports_cross_stream_free() && self.large.supports_cross_stream_free()
    }

    /// Reported by the large side, which normally sees the device directly
    fn mem_info(&self) -> MemResult<MemInfo> {
        self.large
            .mem_info()
            .or_else(|_| self.small.mem_info())
            .map_err(|_| MemoryError::Unsupported("mem_info on HybridResource".to_string()))
    }

    fn synchronize_stream(&self, stream: StreamHandle) -> MemResult<()> {
        self.small.synchronize_stream(stream)?;
        if !self.large.is_equal(&*self.small) {
            self.large.synchronize_stream(stream)?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
