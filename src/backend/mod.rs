//! Device allocator seam
//!
//! Everything above this module treats the driver as an opaque capability:
//! "reserve N bytes of this kind, get back an address or a failure". Two
//! implementations exist:
//!
//! - [`SimulatedDevice`]: a capacity-bounded virtual address space that
//!   never touches real memory. Used on hosts without ROCm and in tests.
//! - `HipAllocator` (feature `rocm`): `hipMalloc` / `hipMallocManaged` /
//!   `hipFree` against the current HIP device.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::MemResult;
use crate::types::{DevicePtr, MemInfo, MemoryKind, StreamHandle};

#[cfg(feature = "rocm")]
pub mod hip_backend;
pub mod simulated;

#[cfg(feature = "rocm")]
pub use hip_backend::{HipAllocator, HipStream};
pub use simulated::SimulatedDevice;

/// Capacity of the simulated device used when no GPU is available (8 GiB)
pub const SIMULATED_DEVICE_CAPACITY: usize = 8 << 30;

/// Raw device memory provider
pub trait DeviceAllocator: Send + Sync + fmt::Debug {
    /// Reserve exactly `bytes` of `kind` memory
    fn reserve(&self, bytes: usize, kind: MemoryKind) -> MemResult<DevicePtr>;

    /// Release a reservation previously returned by `reserve`
    fn release(&self, ptr: DevicePtr, bytes: usize, kind: MemoryKind);

    /// Free and total device memory
    fn mem_info(&self) -> MemResult<MemInfo>;

    /// Block until all work queued on `stream` has completed
    fn synchronize_stream(&self, stream: StreamHandle) -> MemResult<()>;

    /// Ordinal of the device this allocator serves
    fn device_id(&self) -> i32 {
        0
    }
}

/// Shared handle to an allocator
pub type SharedAllocator = Arc<dyn DeviceAllocator>;

static PLATFORM_ALLOCATOR: Lazy<SharedAllocator> = Lazy::new(create_platform_allocator);

#[cfg(feature = "rocm")]
fn create_platform_allocator() -> SharedAllocator {
    match HipAllocator::new() {
        Ok(allocator) => Arc::new(allocator),
        Err(e) => {
            tracing::warn!(
                "HIP device unavailable ({}), falling back to simulated device",
                e
            );
            Arc::new(SimulatedDevice::new(SIMULATED_DEVICE_CAPACITY))
        }
    }
}

#[cfg(not(feature = "rocm"))]
fn create_platform_allocator() -> SharedAllocator {
    tracing::debug!(
        "Built without rocm feature, using simulated device ({} MB)",
        SIMULATED_DEVICE_CAPACITY / 1024 / 1024
    );
    Arc::new(SimulatedDevice::new(SIMULATED_DEVICE_CAPACITY))
}

/// The process-wide allocator for this build
///
/// Created on first use. With the `rocm` feature this is the HIP device
/// allocator when a device is present, otherwise a simulated device.
pub fn platform_allocator() -> SharedAllocator {
    Arc::clone(&PLATFORM_ALLOCATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_allocator_is_shared() {
        let a = platform_allocator();
        let b = platform_allocator();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_platform_allocator_reports_memory() {
        let info = platform_allocator().mem_info().unwrap();
        assert!(info.total > 0);
        assert!(info.free <= info.total);
    }
}
