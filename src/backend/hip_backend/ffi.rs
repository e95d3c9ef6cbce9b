//! HIP FFI bindings
//!
//! Only the memory, stream and device-query entry points of the ROCm HIP
//! runtime are bound here.

use std::ffi::c_void;

#[link(name = "amdhip64")]
extern "C" {
    pub fn hipInit(flags: u32) -> i32;
    pub fn hipGetDeviceCount(count: *mut i32) -> i32;
    pub fn hipGetDevice(deviceId: *mut i32) -> i32;
    pub fn hipMalloc(ptr: *mut *mut c_void, size: usize) -> i32;
    pub fn hipMallocManaged(ptr: *mut *mut c_void, size: usize, flags: u32) -> i32;
    pub fn hipFree(ptr: *mut c_void) -> i32;
    pub fn hipMemGetInfo(free: *mut usize, total: *mut usize) -> i32;
    pub fn hipStreamCreate(stream: *mut *mut c_void) -> i32;
    pub fn hipStreamDestroy(stream: *mut c_void) -> i32;
    pub fn hipStreamSynchronize(stream: *mut c_void) -> i32;
}

/// HIP success code
pub const HIP_SUCCESS: i32 = 0;

/// `hipErrorOutOfMemory`
pub const HIP_ERROR_OUT_OF_MEMORY: i32 = 2;

/// Managed memory is accessible from any stream on any device
pub const HIP_MEM_ATTACH_GLOBAL: u32 = 0x1;
