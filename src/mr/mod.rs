//! Device memory resources
//!
//! A memory resource hands out blocks of device memory through the
//! [`DeviceMemoryResource`] interface. Concrete strategies can be swapped
//! without touching call sites:
//!
//! - [`DirectResource`]: one driver reservation per request (device or managed)
//! - [`PoolResource`]: sub-allocates from large upstream reservations
//! - [`ThreadSafeResource`]: serializes every call to a wrapped resource
//! - [`HybridResource`]: routes small and large requests to different resources
//! - [`LoggingResource`]: records an event log of every call
//!
//! The process-wide default resource lives in [`default`].
//!
//! # Thread Safety
//!
//! Resources are always `Send`. Whether they are `Sync` is part of their
//! contract: [`DirectResource`] is stateless and `Sync`, while
//! [`PoolResource`] mutates its free list in place and is deliberately not
//! `Sync`. To share a pool between threads, wrap it in
//! [`ThreadSafeResource`]. [`SharedResource`] (what the default registry
//! stores) therefore requires `Sync`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{MemResult, MemoryError};
use crate::types::{DevicePtr, MemInfo, StreamHandle};

pub mod default;
pub mod direct;
pub mod event_log;
pub mod hybrid;
pub mod pool;
pub mod thread_safe;

pub use default::{
    get_default_resource, initial_resource, is_initial_resource, set_default_resource,
};
pub use direct::DirectResource;
pub use event_log::{EventKind, LoggingResource, MemoryEvent, CSV_HEADER};
pub use hybrid::HybridResource;
pub use pool::{Block, PoolConfig, PoolResource, PoolStats, StreamReuse};
pub use thread_safe::ThreadSafeResource;

/// Interface implemented by every memory resource
pub trait DeviceMemoryResource: Any + Send + fmt::Debug {
    /// Allocate `bytes` usable by work issued on `stream`
    ///
    /// `bytes == 0` returns [`DevicePtr::null()`], which `deallocate`
    /// accepts back with size 0.
    ///
    /// # Errors
    /// - `OutOfMemory` when neither cached memory nor upstream can satisfy
    ///   the request
    fn allocate(&self, bytes: usize, stream: StreamHandle) -> MemResult<DevicePtr>;

    /// Return memory obtained from `allocate` on this resource
    ///
    /// `ptr` must come from this resource and not have been deallocated yet,
    /// and `bytes` must equal the size originally requested. Violations are
    /// caller bugs: debug builds assert, release builds log and ignore.
    fn deallocate(&self, ptr: DevicePtr, bytes: usize, stream: StreamHandle);

    /// Whether memory from `self` can be deallocated through `other`
    fn is_equal(&self, other: &dyn DeviceMemoryResource) -> bool {
        same_resource(self, other)
    }

    /// Whether the resource orders its reuse of memory by stream
    fn supports_streams(&self) -> bool;

    /// Whether memory allocated on one stream may be freed on another
    fn supports_cross_stream_free(&self) -> bool {
        true
    }

    /// Free and total memory visible to this resource
    fn mem_info(&self) -> MemResult<MemInfo> {
        Err(MemoryError::Unsupported(format!(
            "mem_info on {}",
            std::any::type_name::<Self>()
        )))
    }

    /// Wait for all work on `stream`, used before memory changes streams
    fn synchronize_stream(&self, stream: StreamHandle) -> MemResult<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a thread-safe resource
pub type SharedResource = Arc<dyn DeviceMemoryResource + Send + Sync>;

/// Identity comparison: do both references point at the same object?
pub fn same_resource<T>(a: &T, b: &dyn DeviceMemoryResource) -> bool
where
    T: DeviceMemoryResource + ?Sized,
{
    std::ptr::eq(
        (a as *const T).cast::<()>(),
        (b as *const dyn DeviceMemoryResource).cast::<()>(),
    )
}
