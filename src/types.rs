//! Opaque handles shared by every memory resource
//!
//! Device addresses and streams are carried as plain integers. The
//! allocators never dereference a [`DevicePtr`]; it is only compared,
//! offset and handed back to the driver.

use std::fmt;

use serde::Serialize;

/// Opaque device address
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct DevicePtr(usize);

impl DevicePtr {
    /// The zero-size sentinel. Returned by `allocate(0, _)` and accepted by
    /// every resource's `deallocate(null, 0, _)` as a no-op.
    pub const fn null() -> Self {
        DevicePtr(0)
    }

    /// Wrap a raw address
    pub const fn from_addr(addr: usize) -> Self {
        DevicePtr(addr)
    }

    /// Raw address value
    pub const fn addr(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one
    pub const fn offset(self, bytes: usize) -> Self {
        DevicePtr(self.0 + bytes)
    }

    /// Raw pointer form for FFI calls
    pub fn as_mut_ptr(self) -> *mut std::ffi::c_void {
        self.0 as *mut std::ffi::c_void
    }
}

impl fmt::Debug for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevicePtr({:#x})", self.0)
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Opaque stream identity
///
/// Two handles are the same stream iff their values are equal. The default
/// (null) stream is [`StreamHandle::DEFAULT`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct StreamHandle(usize);

impl StreamHandle {
    /// The null stream
    pub const DEFAULT: StreamHandle = StreamHandle(0);

    pub const fn from_raw(raw: usize) -> Self {
        StreamHandle(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }

    pub const fn is_default(self) -> bool {
        self.0 == 0
    }

    /// Raw pointer form for FFI calls
    pub fn as_ptr(self) -> *mut std::ffi::c_void {
        self.0 as *mut std::ffi::c_void
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            write!(f, "StreamHandle(default)")
        } else {
            write!(f, "StreamHandle({:#x})", self.0)
        }
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Which driver primitive backs an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MemoryKind {
    /// Device-exclusive memory (`hipMalloc`)
    Device,
    /// Unified memory visible to host and device (`hipMallocManaged`)
    Managed,
}

/// Free and total bytes as reported by a device or resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemInfo {
    pub free: usize,
    pub total: usize,
}

/// Round `bytes` up to a multiple of `alignment` (a power of two)
pub const fn align_up(bytes: usize, alignment: usize) -> usize {
    (bytes + alignment - 1) & !(alignment - 1)
}

/// Round `bytes` down to a multiple of `alignment` (a power of two)
pub const fn align_down(bytes: usize, alignment: usize) -> usize {
    bytes & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(255, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(1000, 512), 1024);
    }

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(255, 256), 0);
        assert_eq!(align_down(1000, 256), 768);
        assert_eq!(align_down(1024, 512), 1024);
    }

    #[test]
    fn test_null_pointer_sentinel() {
        assert!(DevicePtr::null().is_null());
        assert!(!DevicePtr::from_addr(0x1000).is_null());
        assert_eq!(DevicePtr::from_addr(0x1000).offset(0x100).addr(), 0x1100);
    }

    #[test]
    fn test_stream_formatting() {
        assert_eq!(format!("{:?}", StreamHandle::DEFAULT), "StreamHandle(default)");
        assert_eq!(StreamHandle::from_raw(0x20).to_string(), "0x20");
        assert!(StreamHandle::default().is_default());
    }
}
