//! Configuration for [`PoolResource`](super::PoolResource)

use serde::Serialize;

use crate::config_error;
use crate::error::MemResult;

/// Default sub-allocation granularity (256 bytes, the HIP malloc alignment)
pub const DEFAULT_ALIGNMENT: usize = 256;

/// Default smallest upstream growth step (2 MiB)
pub const DEFAULT_MINIMUM_GROWTH: usize = 2 << 20;

/// How freed memory may move between streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum StreamReuse {
    /// Blocks freed on one stream may be handed to another after the pool
    /// synchronizes the old stream. Cross-stream free is supported.
    #[default]
    CrossStream,
    /// Blocks stay with the stream they were allocated on and must be freed
    /// on that same stream. Freeing on another stream is a precondition
    /// violation.
    SameStreamOnly,
}

/// Pool construction parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolConfig {
    /// Bytes reserved from upstream at construction. `None` reserves half
    /// of the upstream's currently free memory.
    pub initial_pool_size: Option<usize>,

    /// Ceiling on bytes reserved from upstream. `None` is unbounded.
    pub maximum_pool_size: Option<usize>,

    /// Smallest upstream reservation made when the pool grows
    pub minimum_growth: usize,

    /// Allocation sizes are rounded up to this power of two
    pub alignment: usize,

    /// Stream reuse policy
    pub stream_reuse: StreamReuse,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            initial_pool_size: None,
            maximum_pool_size: None,
            minimum_growth: DEFAULT_MINIMUM_GROWTH,
            alignment: DEFAULT_ALIGNMENT,
            stream_reuse: StreamReuse::CrossStream,
        }
    }
}

impl PoolConfig {
    /// Create a new pool config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial pool size
    pub fn with_initial_pool_size(mut self, bytes: usize) -> Self {
        self.initial_pool_size = Some(bytes);
        self
    }

    /// Set the maximum pool size
    pub fn with_maximum_pool_size(mut self, bytes: usize) -> Self {
        self.maximum_pool_size = Some(bytes);
        self
    }

    /// Set the minimum growth step
    pub fn with_minimum_growth(mut self, bytes: usize) -> Self {
        self.minimum_growth = bytes;
        self
    }

    /// Set the allocation alignment
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set the stream reuse policy
    pub fn with_stream_reuse(mut self, stream_reuse: StreamReuse) -> Self {
        self.stream_reuse = stream_reuse;
        self
    }

    /// Check the parameters are consistent
    ///
    /// # Errors
    /// - alignment is not a power of two
    /// - initial size exceeds the maximum size
    /// - minimum growth is zero
    pub fn validate(&self) -> MemResult<()> {
        if !self.alignment.is_power_of_two() {
            return Err(config_error!(
                "alignment must be a power of two, got {}",
                self.alignment
            ));
        }
        if self.minimum_growth == 0 {
            return Err(config_error!("minimum growth cannot be zero"));
        }
        if let (Some(initial), Some(maximum)) = (self.initial_pool_size, self.maximum_pool_size) {
            if initial > maximum {
                return Err(config_error!(
                    "initial pool size {} exceeds maximum pool size {}",
                    initial,
                    maximum
                ));
            }
        }
        Ok(())
    }
}
