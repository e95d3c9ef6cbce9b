//! HIP stream wrapper

use std::ptr;

use super::{check, ffi};
use crate::error::{MemResult, MemoryError};
use crate::types::StreamHandle;

// SAFETY: HipStream is Send+Sync because it only contains a raw pointer
// and HIP stream handles may be used from any host thread.
// NOTE: HipStream does NOT implement Clone because cloning raw pointers
// would cause double-destroy when both instances are dropped.
unsafe impl Send for HipStream {}
unsafe impl Sync for HipStream {}

/// Owned HIP stream
#[repr(C)]
#[derive(Debug)]
pub struct HipStream {
    stream: *mut std::ffi::c_void,
}

impl HipStream {
    /// Create a new HIP stream
    pub fn new() -> MemResult<Self> {
        let mut stream: *mut std::ffi::c_void = ptr::null_mut();

        let result = unsafe { ffi::hipStreamCreate(&mut stream) };
        tracing::debug!(
            "HipStream::new: hipStreamCreate returned result={}, stream={:?}",
            result,
            stream
        );
        check("hipStreamCreate", result)?;

        if stream.is_null() {
            return Err(MemoryError::Hip {
                call: "hipStreamCreate",
                code: result,
            });
        }

        Ok(HipStream { stream })
    }

    /// Handle used to tag allocations made for this stream
    pub fn handle(&self) -> StreamHandle {
        StreamHandle::from_raw(self.stream as usize)
    }

    /// Synchronize the stream
    pub fn synchronize(&self) -> MemResult<()> {
        check("hipStreamSynchronize", unsafe {
            ffi::hipStreamSynchronize(self.stream)
        })
    }
}

impl Drop for HipStream {
    fn drop(&mut self) {
        if !self.stream.is_null() {
            unsafe {
                ffi::hipStreamDestroy(self.stream);
            }
        }
    }
}
