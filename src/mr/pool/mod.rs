//! Pooled sub-allocator
//!
//! Reserves large regions from an upstream resource and serves many smaller
//! requests from them without calling upstream again.
//!
//! - Best-fit allocation, preferring blocks last used on the requesting
//!   stream so reuse needs no cross-stream synchronization
//! - Oversized blocks are split; the remainder stays free on the same stream
//! - Freed blocks are coalesced eagerly with their free neighbours
//! - Growth is bounded by `maximum_pool_size`; exhaustion is `OutOfMemory`
//! - All reservations go back to upstream when the pool is dropped
//!
//! # Thread Safety
//!
//! `PoolResource` is `Send` but not `Sync`: the free list and allocation map
//! are mutated in place. Wrap it in
//! [`ThreadSafeResource`](crate::mr::ThreadSafeResource) to share it.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use hipmr::mr::{DeviceMemoryResource, DirectResource, PoolConfig, PoolResource};
//! use hipmr::StreamHandle;
//!
//! let upstream = Arc::new(DirectResource::platform_device());
//! let config = PoolConfig::new()
//!     .with_initial_pool_size(16 << 20)
//!     .with_maximum_pool_size(64 << 20);
//! let pool = PoolResource::new(upstream, config)?;
//!
//! let ptr = pool.allocate(1000, StreamHandle::DEFAULT)?;
//! pool.deallocate(ptr, 1000, StreamHandle::DEFAULT);
//! assert_eq!(pool.stats().free_bytes, 16 << 20);
//! # Ok::<(), hipmr::MemoryError>(())
//! ```

mod config;
mod free_list;

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;

use serde::Serialize;

pub use config::{PoolConfig, StreamReuse, DEFAULT_ALIGNMENT, DEFAULT_MINIMUM_GROWTH};
pub use free_list::Block;
use free_list::FreeList;

use crate::error::{MemResult, MemoryError};
use crate::mr::{DeviceMemoryResource, SharedResource};
use crate::types::{align_down, align_up, DevicePtr, MemInfo, StreamHandle};

/// Outstanding allocation
#[derive(Debug, Clone, Copy)]
struct AllocationRecord {
    size: usize,
    stream: StreamHandle,
    reservation: u32,
}

/// Region obtained from upstream
#[derive(Debug, Clone, Copy)]
struct Reservation {
    ptr: DevicePtr,
    size: usize,
    stream: StreamHandle,
}

#[derive(Debug, Default)]
struct PoolState {
    free: FreeList,
    allocations: HashMap<DevicePtr, AllocationRecord>,
    reservations: Vec<Reservation>,
    pool_size: usize,
    allocated: usize,
    peak_allocated: usize,
    cross_stream_reuses: usize,
}

/// Snapshot of pool usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    /// Bytes reserved from upstream
    pub pool_size: usize,
    /// Bytes sitting in the free list
    pub free_bytes: usize,
    /// Bytes handed out to callers (after alignment rounding)
    pub allocated_bytes: usize,
    pub peak_allocated_bytes: usize,
    pub free_blocks: usize,
    pub outstanding_allocations: usize,
    pub reservations: usize,
    /// Allocations served from a block last used on another stream
    pub cross_stream_reuses: usize,
}

/// Sub-allocating memory resource
#[derive(Debug)]
pub struct PoolResource {
    upstream: SharedResource,
    config: PoolConfig,
    state: RefCell<PoolState>,
}

impl PoolResource {
    /// Create a pool over `upstream`
    ///
    /// Reserves the initial pool size eagerly. When `initial_pool_size` is
    /// `None`, half of the upstream's free memory is used (or nothing, if
    /// upstream cannot report its free memory).
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Upstream cannot provide the initial reservation
    pub fn new(upstream: SharedResource, config: PoolConfig) -> MemResult<Self> {
        config.validate()?;

        let maximum = config.maximum_pool_size.unwrap_or(usize::MAX);
        let initial = match config.initial_pool_size {
            Some(bytes) => bytes,
            None => upstream
                .mem_info()
                .map(|info| info.free / 2)
                .unwrap_or(0)
                .min(maximum),
        };
        let initial = align_down(initial, config.alignment);

        let pool = PoolResource {
            upstream,
            config,
            state: RefCell::new(PoolState::default()),
        };

        if initial > 0 {
            let mut state = pool.state.borrow_mut();
            pool.reserve_upstream(&mut state, initial, StreamHandle::DEFAULT)?;
        }

        tracing::debug!(
            "PoolResource created: initial {} bytes, maximum {:?}, {:?}",
            initial,
            pool.config.maximum_pool_size,
            pool.config.stream_reuse
        );
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn upstream(&self) -> &SharedResource {
        &self.upstream
    }

    /// Current usage counters
    pub fn stats(&self) -> PoolStats {
        let state = self.state.borrow();
        PoolStats {
            pool_size: state.pool_size,
            free_bytes: state.free.total_bytes(),
            allocated_bytes: state.allocated,
            peak_allocated_bytes: state.peak_allocated,
            free_blocks: state.free.len(),
            outstanding_allocations: state.allocations.len(),
            reservations: state.reservations.len(),
            cross_stream_reuses: state.cross_stream_reuses,
        }
    }

    /// Free blocks in address order
    pub fn free_blocks(&self) -> Vec<Block> {
        self.state.borrow().free.iter().copied().collect()
    }

    /// Calculate fragmentation ratio (0.0 = none, 1.0 = fully fragmented)
    ///
    /// - 0.0: free memory is one contiguous block (or there is none)
    /// - Higher values: free memory is scattered across many blocks
    pub fn fragmentation(&self) -> f32 {
        let state = self.state.borrow();
        let free = state.free.total_bytes();
        if free == 0 {
            return 0.0;
        }
        1.0 - (state.free.largest() as f32 / free as f32)
    }

    /// Take a free block for `size` bytes on `stream`, if one fits
    fn take_block(
        &self,
        state: &mut PoolState,
        size: usize,
        stream: StreamHandle,
    ) -> MemResult<Option<Block>> {
        if let Some(block) = state.free.best_fit_on_stream(stream, size) {
            state.free.remove(block.ptr);
            return Ok(Some(block));
        }

        if self.config.stream_reuse == StreamReuse::SameStreamOnly {
            return Ok(None);
        }

        let Some(block) = state.free.best_fit_any(size) else {
            return Ok(None);
        };

        // The block's previous stream may still have work in flight on it
        self.upstream.synchronize_stream(block.stream)?;
        state.free.remove(block.ptr);
        state.cross_stream_reuses += 1;
        tracing::trace!(
            "PoolResource: reusing {} bytes at {} from stream {} on stream {}",
            block.size,
            block.ptr,
            block.stream,
            stream
        );
        Ok(Some(Block { stream, ..block }))
    }

    /// Grow the pool by at least `size` bytes
    fn grow(&self, state: &mut PoolState, size: usize, stream: StreamHandle) -> MemResult<()> {
        let maximum = self.config.maximum_pool_size.unwrap_or(usize::MAX);
        let headroom = maximum.saturating_sub(state.pool_size);
        if size > headroom {
            tracing::debug!(
                "PoolResource: cannot grow by {} bytes, {} bytes below maximum",
                size,
                headroom
            );
            return Err(MemoryError::out_of_memory(
                size,
                headroom.max(state.free.largest()),
            ));
        }

        // Double the pool each time, never by less than the minimum growth
        let preferred = size
            .max(self.config.minimum_growth)
            .max(state.pool_size)
            .min(headroom);
        let preferred = align_down(preferred, self.config.alignment).max(size);

        match self.reserve_upstream(state, preferred, stream) {
            Err(MemoryError::OutOfMemory { .. }) if preferred > size => {
                tracing::debug!(
                    "PoolResource: upstream refused {} bytes, retrying with {}",
                    preferred,
                    size
                );
                self.reserve_upstream(state, size, stream)
            }
            result => result,
        }
    }

    fn reserve_upstream(
        &self,
        state: &mut PoolState,
        size: usize,
        stream: StreamHandle,
    ) -> MemResult<()> {
        let ptr = self.upstream.allocate(size, stream)?;
        let id = state.reservations.len() as u32;
        state.reservations.push(Reservation { ptr, size, stream });
        state.pool_size += size;
        state.free.insert(Block {
            ptr,
            size,
            stream,
            reservation: id,
        });

        tracing::debug!(
            "PoolResource: reserved {} bytes at {} from upstream (pool size {} bytes, {} reservations)",
            size,
            ptr,
            state.pool_size,
            state.reservations.len()
        );
        Ok(())
    }
}

impl DeviceMemoryResource for PoolResource {
    fn allocate(&self, bytes: usize, stream: StreamHandle) -> MemResult<DevicePtr> {
        if bytes == 0 {
            return Ok(DevicePtr::null());
        }
        if bytes > usize::MAX - self.config.alignment {
            return Err(MemoryError::out_of_memory(bytes, 0));
        }
        let size = align_up(bytes, self.config.alignment);

        let mut state = self.state.borrow_mut();
        let block = match self.take_block(&mut state, size, stream)? {
            Some(block) => block,
            None => {
                self.grow(&mut state, size, stream)?;
                self.take_block(&mut state, size, stream)?
                    .ok_or_else(|| MemoryError::out_of_memory(bytes, state.free.largest()))?
            }
        };

        let (used, remainder) = block.split(size);
        if let Some(remainder) = remainder {
            state.free.insert(remainder);
        }

        state.allocations.insert(
            used.ptr,
            AllocationRecord {
                size,
                stream,
                reservation: used.reservation,
            },
        );
        state.allocated += size;
        state.peak_allocated = state.peak_allocated.max(state.allocated);

        tracing::trace!(
            "PoolResource: allocated {} bytes ({} requested) at {} on stream {}",
            size,
            bytes,
            used.ptr,
            stream
        );
        Ok(used.ptr)
    }

    fn deallocate(&self, ptr: DevicePtr, bytes: usize, stream: StreamHandle) {
        if ptr.is_null() {
            debug_assert_eq!(bytes, 0, "null pointer deallocated with non-zero size");
            return;
        }

        let mut state = self.state.borrow_mut();
        let Some(record) = state.allocations.remove(&ptr) else {
            tracing::error!(
                "PoolResource: deallocate of {} which is not outstanding (double free or foreign pointer)",
                ptr
            );
            debug_assert!(false, "deallocate of {} which is not outstanding", ptr);
            return;
        };

        debug_assert_eq!(
            record.size,
            align_up(bytes, self.config.alignment),
            "deallocate of {} with size {} does not match the allocation",
            ptr,
            bytes
        );

        let stream = if stream != record.stream
            && self.config.stream_reuse == StreamReuse::SameStreamOnly
        {
            tracing::error!(
                "PoolResource: {} allocated on stream {} freed on stream {}, which this pool does not support",
                ptr,
                record.stream,
                stream
            );
            debug_assert!(false, "cross-stream free on a stream-bound pool");
            record.stream
        } else {
            stream
        };

        state.allocated -= record.size;

        let freed = Block {
            ptr,
            size: record.size,
            stream,
            reservation: record.reservation,
        };
        let upstream = &self.upstream;
        let stream_reuse = self.config.stream_reuse;
        let merged = state.free.insert_coalescing(freed, |neighbour| {
            if neighbour.stream == stream {
                return true;
            }
            match stream_reuse {
                StreamReuse::SameStreamOnly => false,
                // The merged block will be tagged with `stream`, so the
                // neighbour's stream has to be idle first
                StreamReuse::CrossStream => match upstream.synchronize_stream(neighbour.stream) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(
                            "PoolResource: not merging with block on stream {}: {}",
                            neighbour.stream,
                            e
                        );
                        false
                    }
                },
            }
        });

        tracing::trace!(
            "PoolResource: freed {} bytes at {} on stream {}, free block now {} bytes at {}",
            record.size,
            ptr,
            stream,
            merged.size,
            merged.ptr
        );
    }

    fn supports_streams(&self) -> bool {
        true
    }

    fn supports_cross_stream_free(&self) -> bool {
        self.config.stream_reuse == StreamReuse::CrossStream
    }

    /// Free bytes in the pool and total bytes reserved from upstream
    fn mem_info(&self) -> MemResult<MemInfo> {
        let state = self.state.borrow();
        Ok(MemInfo {
            free: state.free.total_bytes(),
            total: state.pool_size,
        })
    }

    fn synchronize_stream(&self, stream: StreamHandle) -> MemResult<()> {
        self.upstream.synchronize_stream(stream)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for PoolResource {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.allocations.is_empty() {
            tracing::warn!(
                "PoolResource dropped with {} outstanding allocations ({} bytes)",
                state.allocations.len(),
                state.allocated
            );
        }

        while let Some(reservation) = state.reservations.pop() {
            self.upstream
                .deallocate(reservation.ptr, reservation.size, reservation.stream);
        }
        tracing::debug!("PoolResource released {} bytes to upstream", state.pool_size);
    }
}
