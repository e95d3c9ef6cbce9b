//! Resources on a real HIP device
//!
//! Only built with `--features rocm`. Tests skip when no device is present.

#![cfg(feature = "rocm")]

mod common;

use std::sync::Arc;

use common::*;
use hipmr::backend::{HipAllocator, HipStream, SharedAllocator};
use hipmr::mr::{DirectResource, PoolConfig, PoolResource, ThreadSafeResource};
use hipmr::{DeviceMemoryResource, SharedResource, StreamHandle};

fn hip_allocator() -> Option<SharedAllocator> {
    match HipAllocator::new() {
        Ok(allocator) => Some(Arc::new(allocator)),
        Err(e) => {
            eprintln!("WARNING: HIP device not available ({}), skipping", e);
            None
        }
    }
}

#[test]
#[serial]
fn test_direct_device_and_managed() {
    let Some(allocator) = hip_allocator() else {
        return;
    };
    let before = allocator.mem_info().unwrap();

    for mr in [
        DirectResource::device(allocator.clone()),
        DirectResource::managed(allocator.clone()),
    ] {
        let ptr = mr.allocate(16 * MIB, StreamHandle::DEFAULT).unwrap();
        assert!(!ptr.is_null());
        assert_eq!(ptr.addr() % 256, 0);
        mr.deallocate(ptr, 16 * MIB, StreamHandle::DEFAULT);
    }

    let after = allocator.mem_info().unwrap();
    assert_eq!(before.total, after.total);
}

#[test]
#[serial]
fn test_pool_on_device_streams() {
    let Some(allocator) = hip_allocator() else {
        return;
    };
    let upstream: SharedResource = Arc::new(DirectResource::device(allocator));
    let pool = PoolResource::new(upstream, PoolConfig::new().with_initial_pool_size(64 * MIB))
        .unwrap();
    let mr: SharedResource = Arc::new(ThreadSafeResource::new(pool));

    let stream_a = HipStream::new().unwrap();
    let stream_b = HipStream::new().unwrap();

    test_various_allocations_on_device(&*mr, stream_a.handle());
    test_random_allocations(&*mr, 100, MIB, stream_a.handle());

    // Free on another stream, then reuse on the first
    let ptr = mr.allocate(MIB, stream_a.handle()).unwrap();
    mr.deallocate(ptr, MIB, stream_b.handle());
    let again = mr.allocate(MIB, stream_a.handle()).unwrap();
    mr.deallocate(again, MIB, stream_a.handle());

    stream_a.synchronize().unwrap();
    stream_b.synchronize().unwrap();
}

/// `test_various_allocations` without the oversized request, whose size
/// depends on the simulated device
fn test_various_allocations_on_device(mr: &dyn DeviceMemoryResource, stream: StreamHandle) {
    for bytes in [4, KIB, 10 * KIB, MIB, 64 * MIB] {
        let ptr = mr.allocate(bytes, stream).unwrap();
        assert!(!ptr.is_null());
        mr.deallocate(ptr, bytes, stream);
    }
}
