//! One-call setup of the default resource
//!
//! [`initialize`] builds a resource stack from [`ResourceOptions`] and
//! installs it as the process default:
//!
//! ```text
//! direct (device | managed)
//!   -> ThreadSafeResource<PoolResource>   if use_pool_allocator
//!   -> LoggingResource                    if enable_logging
//! ```
//!
//! [`finalize`] puts the built-in resource back.
//!
//! # Example
//!
//! ```rust
//! use hipmr::manager::{self, ResourceOptions};
//!
//! let options = ResourceOptions::new()
//!     .with_pool_allocator(true)
//!     .with_initial_pool_size(32 << 20)
//!     .with_logging(true);
//! manager::initialize(&options)?;
//!
//! let mr = hipmr::get_default_resource();
//! let ptr = mr.allocate(4096, hipmr::StreamHandle::DEFAULT)?;
//! mr.deallocate(ptr, 4096, hipmr::StreamHandle::DEFAULT);
//!
//! assert!(manager::csv_log()?.starts_with("Event Type,"));
//! manager::finalize();
//! # Ok::<(), hipmr::MemoryError>(())
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::backend::platform_allocator;
use crate::config_error;
use crate::error::{MemResult, MemoryError};
use crate::mr::{
    set_default_resource, DirectResource, LoggingResource, PoolConfig, PoolResource,
    SharedResource, ThreadSafeResource,
};

const USE_MANAGED_MEMORY_ENV: &str = "HIPMR_USE_MANAGED_MEMORY";
const USE_POOL_ALLOCATOR_ENV: &str = "HIPMR_USE_POOL_ALLOCATOR";
const INITIAL_POOL_SIZE_ENV: &str = "HIPMR_INITIAL_POOL_SIZE";
const MAXIMUM_POOL_SIZE_ENV: &str = "HIPMR_MAXIMUM_POOL_SIZE";
const ENABLE_LOGGING_ENV: &str = "HIPMR_ENABLE_LOGGING";

/// What [`initialize`] should build
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ResourceOptions {
    /// Unified memory instead of device memory
    pub use_managed_memory: bool,
    pub use_pool_allocator: bool,
    /// Pool only. `None` reserves half of free memory.
    pub initial_pool_size: Option<usize>,
    /// Pool only. `None` is unbounded.
    pub maximum_pool_size: Option<usize>,
    /// Record an event log readable through [`csv_log`]
    pub enable_logging: bool,
}

impl ResourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options from `HIPMR_*` environment variables, defaults for unset ones
    ///
    /// # Errors
    /// - `InvalidConfiguration` if a variable is set to something unparsable
    pub fn from_env() -> MemResult<Self> {
        Ok(ResourceOptions {
            use_managed_memory: env_flag(USE_MANAGED_MEMORY_ENV)?.unwrap_or(false),
            use_pool_allocator: env_flag(USE_POOL_ALLOCATOR_ENV)?.unwrap_or(false),
            initial_pool_size: env_size(INITIAL_POOL_SIZE_ENV)?,
            maximum_pool_size: env_size(MAXIMUM_POOL_SIZE_ENV)?,
            enable_logging: env_flag(ENABLE_LOGGING_ENV)?.unwrap_or(false),
        })
    }

    pub fn with_managed_memory(mut self, enabled: bool) -> Self {
        self.use_managed_memory = enabled;
        self
    }

    pub fn with_pool_allocator(mut self, enabled: bool) -> Self {
        self.use_pool_allocator = enabled;
        self
    }

    pub fn with_initial_pool_size(mut self, bytes: usize) -> Self {
        self.initial_pool_size = Some(bytes);
        self
    }

    pub fn with_maximum_pool_size(mut self, bytes: usize) -> Self {
        self.maximum_pool_size = Some(bytes);
        self
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = enabled;
        self
    }

    fn pool_config(&self) -> PoolConfig {
        let mut config = PoolConfig::new();
        if let Some(bytes) = self.initial_pool_size {
            config = config.with_initial_pool_size(bytes);
        }
        if let Some(bytes) = self.maximum_pool_size {
            config = config.with_maximum_pool_size(bytes);
        }
        config
    }
}

fn env_flag(name: &str) -> MemResult<Option<bool>> {
    let Ok(value) = std::env::var(name) else {
        return Ok(None);
    };
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
        other => Err(config_error!("{} must be a boolean, got '{}'", name, other)),
    }
}

fn env_size(name: &str) -> MemResult<Option<usize>> {
    let Ok(value) = std::env::var(name) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<usize>()
        .map(Some)
        .map_err(|e| config_error!("{} must be a size in bytes, got '{}': {}", name, value, e))
}

#[derive(Debug)]
struct Installed {
    options: ResourceOptions,
    event_log: Option<Arc<LoggingResource>>,
}

static STATE: Lazy<Mutex<Option<Installed>>> = Lazy::new(|| Mutex::new(None));

fn state() -> MutexGuard<'static, Option<Installed>> {
    STATE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build the resource stack described by `options` and make it the default
///
/// Calling this again finalizes the previous setup first.
///
/// # Errors
/// - Invalid pool options
/// - The pool's initial reservation cannot be satisfied
pub fn initialize(options: &ResourceOptions) -> MemResult<()> {
    let mut state = state();
    if state.take().is_some() {
        tracing::debug!("Re-initializing, dropping previous resource stack");
        set_default_resource(None);
    }

    let allocator = platform_allocator();
    let device_id = allocator.device_id();
    let direct = if options.use_managed_memory {
        DirectResource::managed(allocator)
    } else {
        DirectResource::device(allocator)
    };

    let mut resource: SharedResource = Arc::new(direct);
    if options.use_pool_allocator {
        let pool = PoolResource::new(resource, options.pool_config())?;
        resource = Arc::new(ThreadSafeResource::new(pool));
    }

    let event_log = if options.enable_logging {
        let log = Arc::new(LoggingResource::new(resource, device_id));
        resource = log.clone();
        Some(log)
    } else {
        None
    };

    set_default_resource(Some(resource));
    tracing::info!(
        "Memory resources initialized: managed={}, pool={}, logging={}",
        options.use_managed_memory,
        options.use_pool_allocator,
        options.enable_logging
    );

    *state = Some(Installed {
        options: options.clone(),
        event_log,
    });
    Ok(())
}

/// Restore the built-in default resource
///
/// Memory still outstanding from the finalized stack stays valid; the stack
/// is released once the last handle to it is dropped.
pub fn finalize() {
    if state().take().is_some() {
        set_default_resource(None);
        tracing::info!("Memory resources finalized");
    }
}

pub fn is_initialized() -> bool {
    state().is_some()
}

/// Options of the current setup, if initialized
pub fn options() -> Option<ResourceOptions> {
    state().as_ref().map(|installed| installed.options.clone())
}

/// The recorded event log as CSV
///
/// # Errors
/// - `LoggingDisabled` unless initialized with logging enabled
pub fn csv_log() -> MemResult<String> {
    let event_log = state()
        .as_ref()
        .and_then(|installed| installed.event_log.clone())
        .ok_or(MemoryError::LoggingDisabled)?;
    event_log.csv_log()
}
