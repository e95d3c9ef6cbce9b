//! ROCm/HIP backend for device memory
//!
//! Only compiled with the `rocm` feature. Provides the raw FFI bindings,
//! the [`HipAllocator`] used as the upstream for direct resources, and a
//! [`HipStream`] wrapper that yields [`StreamHandle`](crate::types::StreamHandle)s.

mod allocator;
pub(crate) mod ffi;
mod stream;

pub use allocator::HipAllocator;
pub use stream::HipStream;

use crate::error::{MemResult, MemoryError};

/// Map a HIP status code to a `MemResult`
pub(crate) fn check(call: &'static str, code: i32) -> MemResult<()> {
    if code == ffi::HIP_SUCCESS {
        Ok(())
    } else {
        Err(MemoryError::Hip { call, code })
    }
}
