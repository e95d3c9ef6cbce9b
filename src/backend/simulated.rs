//! Simulated device for hosts without a GPU
//!
//! Hands out addresses from a private virtual address range and enforces a
//! capacity limit, so the pool's growth and out-of-memory paths behave the
//! same way they do on real hardware. Addresses are never dereferenced.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::backend::DeviceAllocator;
use crate::error::{MemResult, MemoryError};
use crate::types::{align_up, DevicePtr, MemInfo, MemoryKind, StreamHandle};

/// First address handed out by a simulated device
const BASE_ADDRESS: usize = 0x1000_0000;

/// Reservations are placed on this granularity, with one extra granule of
/// unmapped space after each so no two reservations are ever adjacent.
const RESERVATION_GRANULARITY: usize = 2 << 20;

#[derive(Debug)]
struct Reservation {
    bytes: usize,
    kind: MemoryKind,
}

#[derive(Debug)]
struct DeviceState {
    next_address: usize,
    used: usize,
    live: HashMap<DevicePtr, Reservation>,
}

/// Capacity-bounded fake device
#[derive(Debug)]
pub struct SimulatedDevice {
    capacity: usize,
    device_id: i32,
    state: Mutex<DeviceState>,
    reserve_calls: AtomicUsize,
    release_calls: AtomicUsize,
    stream_syncs: AtomicUsize,
}

impl SimulatedDevice {
    /// Create a device with `capacity` bytes of memory
    pub fn new(capacity: usize) -> Self {
        Self::with_device_id(capacity, 0)
    }

    pub fn with_device_id(capacity: usize, device_id: i32) -> Self {
        SimulatedDevice {
            capacity,
            device_id,
            state: Mutex::new(DeviceState {
                next_address: BASE_ADDRESS,
                used: 0,
                live: HashMap::new(),
            }),
            reserve_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
            stream_syncs: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently reserved
    pub fn used_bytes(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .used
    }

    /// Number of outstanding reservations
    pub fn live_reservations(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .live
            .len()
    }

    /// Kind of the reservation starting at `ptr`, if one is live
    pub fn reservation_kind(&self, ptr: DevicePtr) -> Option<MemoryKind> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .live
            .get(&ptr)
            .map(|r| r.kind)
    }

    /// Successful `reserve` calls so far
    pub fn reserve_count(&self) -> usize {
        self.reserve_calls.load(Ordering::Relaxed)
    }

    /// `release` calls so far
    pub fn release_count(&self) -> usize {
        self.release_calls.load(Ordering::Relaxed)
    }

    /// `synchronize_stream` calls so far
    pub fn sync_count(&self) -> usize {
        self.stream_syncs.load(Ordering::Relaxed)
    }
}

impl DeviceAllocator for SimulatedDevice {
    fn reserve(&self, bytes: usize, kind: MemoryKind) -> MemResult<DevicePtr> {
        if bytes == 0 {
            return Ok(DevicePtr::null());
        }

        let mut state = self.state.lock()?;
        let available = self.capacity - state.used;
        if bytes > available {
            tracing::debug!(
                "SimulatedDevice: refusing {} bytes, {} available",
                bytes,
                available
            );
            return Err(MemoryError::out_of_memory(bytes, available));
        }

        let span = align_up(bytes, RESERVATION_GRANULARITY) + RESERVATION_GRANULARITY;
        let address = state.next_address;
        state.next_address = address
            .checked_add(span)
            .ok_or_else(|| MemoryError::out_of_memory(bytes, available))?;
        state.used += bytes;

        let ptr = DevicePtr::from_addr(address);
        state.live.insert(ptr, Reservation { bytes, kind });
        self.reserve_calls.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(
            "SimulatedDevice: reserved {} bytes ({:?}) at {}",
            bytes,
            kind,
            ptr
        );
        Ok(ptr)
    }

    fn release(&self, ptr: DevicePtr, bytes: usize, kind: MemoryKind) {
        if ptr.is_null() {
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.release_calls.fetch_add(1, Ordering::Relaxed);

        match state.live.remove(&ptr) {
            Some(reservation) => {
                debug_assert_eq!(
                    reservation.bytes, bytes,
                    "release of {} with size {} but {} were reserved",
                    ptr, bytes, reservation.bytes
                );
                debug_assert_eq!(reservation.kind, kind, "release of {} with wrong kind", ptr);
                state.used -= reservation.bytes;
            }
            None => {
                tracing::error!("SimulatedDevice: release of unknown pointer {}", ptr);
                debug_assert!(false, "release of unknown pointer {}", ptr);
            }
        }
    }

    fn mem_info(&self) -> MemResult<MemInfo> {
        let state = self.state.lock()?;
        Ok(MemInfo {
            free: self.capacity - state.used,
            total: self.capacity,
        })
    }

    fn synchronize_stream(&self, _stream: StreamHandle) -> MemResult<()> {
        // Work on a simulated device completes immediately
        self.stream_syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn device_id(&self) -> i32 {
        self.device_id
    }
}
