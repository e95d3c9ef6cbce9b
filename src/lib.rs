//! hipmr - Device Memory Resources for AMD GPUs
//!
//! Pluggable allocation of GPU memory through a single interface,
//! [`DeviceMemoryResource`], with interchangeable strategies:
//!
//! - direct device and managed (unified) memory, one driver call per request
//! - a pooled sub-allocator with best-fit reuse, per-stream preference,
//!   coalescing and bounded growth
//! - adaptors for thread safety, size routing and event logging
//! - a process-wide default resource that can be swapped atomically
//!
//! Build with the `rocm` feature to allocate real memory through HIP.
//! Without it every resource runs on top of a simulated device.

#![allow(clippy::new_without_default)] // Builders expose both new() and Default
#![allow(clippy::missing_safety_doc)] // FFI bindings documented at module level

pub mod backend;
pub mod error;
pub mod logging;
pub mod manager;
pub mod mr;
pub mod types;

pub use error::{ErrorCategory, MemResult, MemoryError};
pub use manager::{csv_log, finalize, initialize, is_initialized, ResourceOptions};
pub use mr::{
    get_default_resource, set_default_resource, DeviceMemoryResource, SharedResource,
};
pub use types::{DevicePtr, MemInfo, MemoryKind, StreamHandle};
