//! Device allocator backed by the HIP runtime

use std::ptr;

use super::{check, ffi};
use crate::backend::DeviceAllocator;
use crate::error::{MemResult, MemoryError};
use crate::types::{DevicePtr, MemInfo, MemoryKind, StreamHandle};

/// `hipMalloc` / `hipMallocManaged` on the current device
#[derive(Debug)]
pub struct HipAllocator {
    device_id: i32,
}

impl HipAllocator {
    /// Bind to the current HIP device
    ///
    /// # Errors
    /// - No HIP device present
    /// - HIP runtime failed to initialize
    pub fn new() -> MemResult<Self> {
        check("hipInit", unsafe { ffi::hipInit(0) })?;

        let mut count = 0i32;
        check("hipGetDeviceCount", unsafe { ffi::hipGetDeviceCount(&mut count) })?;
        if count == 0 {
            return Err(MemoryError::Unsupported("no HIP device present".to_string()));
        }

        let mut device_id = 0i32;
        check("hipGetDevice", unsafe { ffi::hipGetDevice(&mut device_id) })?;

        tracing::info!("HipAllocator bound to device {} of {}", device_id, count);
        Ok(HipAllocator { device_id })
    }
}

impl DeviceAllocator for HipAllocator {
    fn reserve(&self, bytes: usize, kind: MemoryKind) -> MemResult<DevicePtr> {
        if bytes == 0 {
            return Ok(DevicePtr::null());
        }

        if bytes > 1024 * 1024 * 1024 {
            tracing::debug!("HipAllocator: large reservation requested: {} MB", bytes / (1024 * 1024));
        }

        let mut raw: *mut std::ffi::c_void = ptr::null_mut();
        let result = unsafe {
            match kind {
                MemoryKind::Device => ffi::hipMalloc(&mut raw, bytes),
                MemoryKind::Managed => {
                    ffi::hipMallocManaged(&mut raw, bytes, ffi::HIP_MEM_ATTACH_GLOBAL)
                }
            }
        };
        tracing::trace!(
            "HipAllocator: reserve {:?} returned result={}, ptr={:?}",
            kind,
            result,
            raw
        );

        if result == ffi::HIP_ERROR_OUT_OF_MEMORY {
            let available = self.mem_info().map(|info| info.free).unwrap_or(0);
            return Err(MemoryError::out_of_memory(bytes, available));
        }
        check(
            match kind {
                MemoryKind::Device => "hipMalloc",
                MemoryKind::Managed => "hipMallocManaged",
            },
            result,
        )?;

        if raw.is_null() {
            tracing::error!("HipAllocator: driver returned null pointer for {} bytes", bytes);
            return Err(MemoryError::out_of_memory(bytes, 0));
        }

        Ok(DevicePtr::from_addr(raw as usize))
    }

    fn release(&self, ptr: DevicePtr, bytes: usize, kind: MemoryKind) {
        if ptr.is_null() {
            return;
        }

        let result = unsafe { ffi::hipFree(ptr.as_mut_ptr()) };
        if result != ffi::HIP_SUCCESS {
            tracing::error!(
                "HipAllocator: hipFree failed with code {} for {} ({} bytes, {:?})",
                result,
                ptr,
                bytes,
                kind
            );
        }
    }

    fn mem_info(&self) -> MemResult<MemInfo> {
        let mut free = 0usize;
        let mut total = 0usize;
        check("hipMemGetInfo", unsafe { ffi::hipMemGetInfo(&mut free, &mut total) })?;
        Ok(MemInfo { free, total })
    }

    fn synchronize_stream(&self, stream: StreamHandle) -> MemResult<()> {
        check("hipStreamSynchronize", unsafe {
            ffi::hipStreamSynchronize(stream.as_ptr())
        })
    }

    fn device_id(&self) -> i32 {
        self.device_id
    }
}
