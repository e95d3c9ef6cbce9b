//! Common test utilities for memory resource tests
//!
//! Every resource under test sits on its own [`SimulatedDevice`], so tests
//! can run in parallel without sharing capacity, and can inspect the device
//! afterwards for leaked reservations.
//!
//! # Usage
//!
//! ```ignore
//! mod common;
//! use common::*;
//!
//! #[test]
//! fn my_test() {
//!     for factory in all_factories() {
//!         let fixture = factory.build();
//!         test_various_allocations(&*fixture.mr, STREAM_A);
//!         fixture.assert_no_leak();
//!     }
//! }
//! ```

#![allow(dead_code)] // Each test binary uses a different subset

use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use hipmr::backend::{SharedAllocator, SimulatedDevice};
use hipmr::mr::{
    DirectResource, HybridResource, PoolConfig, PoolResource, StreamReuse, ThreadSafeResource,
};
use hipmr::{DeviceMemoryResource, DevicePtr, SharedResource, StreamHandle};
use rand::Rng;
pub use serial_test::serial;

pub const KIB: usize = 1 << 10;
pub const MIB: usize = 1 << 20;
pub const GIB: usize = 1 << 30;

/// Threads started by [`spawn`]
pub const NUM_THREADS: usize = 4;

/// Capacity of each test device
pub const DEVICE_CAPACITY: usize = 16 * GIB;

/// Pools start small so that tests exercise growth
pub const INITIAL_POOL_SIZE: usize = 64 * MIB;

/// Hybrid resources send requests up to this size to their pool
pub const HYBRID_THRESHOLD: usize = MIB;

pub const STREAM_A: StreamHandle = StreamHandle::from_raw(0xa000);
pub const STREAM_B: StreamHandle = StreamHandle::from_raw(0xb000);

/// A resource and the device underneath it
pub struct Fixture {
    pub name: &'static str,
    pub device: Arc<SimulatedDevice>,
    pub mr: SharedResource,
}

impl Fixture {
    /// Drop the resource and check the device got everything back
    ///
    /// # Panics
    ///
    /// Panics if the device still holds reservations. Clones of `mr` held
    /// elsewhere keep pools alive, so drop those first.
    pub fn assert_no_leak(self) {
        let Fixture { name, device, mr } = self;
        drop(mr);
        assert_eq!(
            device.live_reservations(),
            0,
            "{}: {} bytes still reserved on the device",
            name,
            device.used_bytes()
        );
    }
}

/// Named recipe for a resource under test
#[derive(Clone, Copy)]
pub struct ResourceFactory {
    pub name: &'static str,
    make: fn(SharedAllocator) -> SharedResource,
}

impl ResourceFactory {
    pub fn build(&self) -> Fixture {
        let device = Arc::new(SimulatedDevice::new(DEVICE_CAPACITY));
        let allocator: SharedAllocator = device.clone();
        Fixture {
            name: self.name,
            device,
            mr: (self.make)(allocator),
        }
    }
}

fn make_device(allocator: SharedAllocator) -> SharedResource {
    Arc::new(DirectResource::device(allocator))
}

fn make_managed(allocator: SharedAllocator) -> SharedResource {
    Arc::new(DirectResource::managed(allocator))
}

fn make_pool_over(upstream: SharedResource, stream_reuse: StreamReuse) -> SharedResource {
    let config = PoolConfig::new()
        .with_initial_pool_size(INITIAL_POOL_SIZE)
        .with_stream_reuse(stream_reuse);
    let pool = PoolResource::new(upstream, config).expect("failed to create pool");
    Arc::new(ThreadSafeResource::new(pool))
}

fn make_pool(allocator: SharedAllocator) -> SharedResource {
    make_pool_over(make_device(allocator), StreamReuse::CrossStream)
}

fn make_stream_bound_pool(allocator: SharedAllocator) -> SharedResource {
    make_pool_over(make_device(allocator), StreamReuse::SameStreamOnly)
}

fn make_stream_bound_managed_pool(allocator: SharedAllocator) -> SharedResource {
    make_pool_over(make_managed(allocator), StreamReuse::SameStreamOnly)
}

fn make_hybrid(allocator: SharedAllocator) -> SharedResource {
    let direct = make_device(allocator);
    let pool = make_pool_over(direct.clone(), StreamReuse::CrossStream);
    Arc::new(HybridResource::new(pool, direct, HYBRID_THRESHOLD))
}

/// Every shareable resource configuration
pub fn all_factories() -> Vec<ResourceFactory> {
    vec![
        ResourceFactory { name: "Device", make: make_device },
        ResourceFactory { name: "Managed", make: make_managed },
        ResourceFactory { name: "Pool", make: make_pool },
        ResourceFactory { name: "StreamBoundPool", make: make_stream_bound_pool },
        ResourceFactory {
            name: "StreamBoundManagedPool",
            make: make_stream_bound_managed_pool,
        },
        ResourceFactory { name: "Hybrid", make: make_hybrid },
    ]
}

/// Run `task` on [`NUM_THREADS`] threads and wait for all of them
///
/// A panic on any thread fails the calling test.
pub fn spawn<F>(task: F)
where
    F: Fn() + Sync,
{
    thread::scope(|scope| {
        for _ in 0..NUM_THREADS {
            scope.spawn(&task);
        }
    });
}

fn assert_usable(ptr: DevicePtr, bytes: usize) {
    assert!(!ptr.is_null(), "allocation of {} bytes returned null", bytes);
    assert_eq!(ptr.addr() % 256, 0, "{} is not 256-byte aligned", ptr);
}

/// Allocate and free through the current default resource
pub fn test_get_default_resource() {
    let mr = hipmr::get_default_resource();
    let ptr = mr.allocate(MIB, StreamHandle::DEFAULT).expect("default allocation failed");
    assert_usable(ptr, MIB);
    mr.deallocate(ptr, MIB, StreamHandle::DEFAULT);
}

/// Fixed sizes from empty to oversized
pub fn test_various_allocations(mr: &dyn DeviceMemoryResource, stream: StreamHandle) {
    // Zero bytes is a valid request for the null sentinel
    let ptr = mr.allocate(0, stream).unwrap();
    assert!(ptr.is_null());
    mr.deallocate(ptr, 0, stream);

    for bytes in [4, KIB, 10 * KIB, MIB, 256 * MIB] {
        let ptr = mr.allocate(bytes, stream).unwrap();
        assert_usable(ptr, bytes);
        mr.deallocate(ptr, bytes, stream);
    }

    // Larger than the device
    let err = mr.allocate(4 * DEVICE_CAPACITY, stream).unwrap_err();
    assert!(err.is_recoverable(), "expected out of memory, got {}", err);
}

/// `count` random sizes in `[1, max_size]`, all live at once, then freed
pub fn test_random_allocations(
    mr: &dyn DeviceMemoryResource,
    count: usize,
    max_size: usize,
    stream: StreamHandle,
) {
    let mut rng = rand::thread_rng();
    let allocations: Vec<(DevicePtr, usize)> = (0..count)
        .map(|_| {
            let bytes = rng.gen_range(1..=max_size);
            let ptr = mr.allocate(bytes, stream).unwrap();
            assert_usable(ptr, bytes);
            (ptr, bytes)
        })
        .collect();

    assert_disjoint(&allocations);

    for (ptr, bytes) in allocations {
        mr.deallocate(ptr, bytes, stream);
    }
}

/// Interleaved random allocation and deallocation, biased towards growth
pub fn test_mixed_random_allocation_free(
    mr: &dyn DeviceMemoryResource,
    max_size: usize,
    stream: StreamHandle,
) {
    const OPERATIONS: usize = 1000;
    const ALLOCATION_PERCENT: u32 = 53;

    let mut rng = rand::thread_rng();
    let mut live: Vec<(DevicePtr, usize)> = Vec::new();

    for _ in 0..OPERATIONS {
        let allocate = live.is_empty() || rng.gen_ratio(ALLOCATION_PERCENT, 100);
        if allocate {
            let bytes = rng.gen_range(1..=max_size);
            let ptr = mr.allocate(bytes, stream).unwrap();
            assert_usable(ptr, bytes);
            live.push((ptr, bytes));
        } else {
            let index = rng.gen_range(0..live.len());
            let (ptr, bytes) = live.swap_remove(index);
            mr.deallocate(ptr, bytes, stream);
        }
    }

    for (ptr, bytes) in live {
        mr.deallocate(ptr, bytes, stream);
    }
}

/// Every thread holds `count` random allocations in `[1, MIB]` on its own
/// stream; all of them are checked for overlap while still outstanding
pub fn test_concurrent_allocations_disjoint(mr: &(dyn DeviceMemoryResource + Sync), count: usize) {
    let live: Mutex<Vec<(DevicePtr, usize)>> = Mutex::new(Vec::new());
    // Workers plus the checking thread
    let allocated = Barrier::new(NUM_THREADS + 1);
    let checked = Barrier::new(NUM_THREADS + 1);

    thread::scope(|scope| {
        for t in 0..NUM_THREADS {
            let (live, allocated, checked) = (&live, &allocated, &checked);
            scope.spawn(move || {
                let stream = StreamHandle::from_raw(0x1000 * (t + 1));
                let mut rng = rand::thread_rng();
                let mine: Vec<(DevicePtr, usize)> = (0..count)
                    .map(|_| {
                        let bytes = rng.gen_range(1..=MIB);
                        let ptr = mr.allocate(bytes, stream).unwrap();
                        assert_usable(ptr, bytes);
                        (ptr, bytes)
                    })
                    .collect();
                live.lock().unwrap().extend_from_slice(&mine);

                allocated.wait();
                checked.wait();

                for (ptr, bytes) in mine {
                    mr.deallocate(ptr, bytes, stream);
                }
            });
        }

        allocated.wait();
        let all = live.lock().unwrap().clone();
        // Release the workers even if the check fails, so the scope can join
        let result = std::panic::catch_unwind(|| {
            assert_eq!(all.len(), NUM_THREADS * count);
            assert_disjoint(&all);
        });
        checked.wait();
        if let Err(panic) = result {
            std::panic::resume_unwind(panic);
        }
    });
}

/// # Panics
///
/// Panics if any two live allocations overlap
pub fn assert_disjoint(allocations: &[(DevicePtr, usize)]) {
    let mut sorted = allocations.to_vec();
    sorted.sort_by_key(|(ptr, _)| *ptr);
    for pair in sorted.windows(2) {
        let (a, a_bytes) = pair[0];
        let (b, _) = pair[1];
        assert!(
            a.addr() + a_bytes <= b.addr(),
            "allocation {} ({} bytes) overlaps {}",
            a,
            a_bytes,
            b
        );
    }
}
