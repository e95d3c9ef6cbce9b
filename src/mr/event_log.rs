//! Event-log adaptor
//!
//! [`LoggingResource`] forwards to an inner resource and records one
//! [`MemoryEvent`] per allocation and deallocation. The log can be rendered
//! as CSV with [`LoggingResource::csv_log`]:
//!
//! ```text
//! Event Type,Device ID,Address,Stream,Size (bytes),Free Memory,Total Memory,Current Allocs,Start,End,Elapsed,Location
//! Alloc,0,0x10000000,0x0,1024,8589933568,8589934592,1,0.000012,0.000015,0.000003,main
//! ```
//!
//! Times are seconds since the adaptor was created.

use std::any::Any;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Serialize, Serializer};

use crate::error::{MemResult, MemoryError};
use crate::mr::{same_resource, DeviceMemoryResource, SharedResource};
use crate::types::{DevicePtr, MemInfo, StreamHandle};

/// Column names of the CSV event log
pub const CSV_HEADER: [&str; 12] = [
    "Event Type",
    "Device ID",
    "Address",
    "Stream",
    "Size (bytes)",
    "Free Memory",
    "Total Memory",
    "Current Allocs",
    "Start",
    "End",
    "Elapsed",
    "Location",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Alloc,
    Free,
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryEvent {
    #[serde(rename = "Event Type")]
    pub event: EventKind,
    #[serde(rename = "Device ID")]
    pub device_id: i32,
    #[serde(rename = "Address", serialize_with = "display")]
    pub address: DevicePtr,
    #[serde(rename = "Stream", serialize_with = "display")]
    pub stream: StreamHandle,
    #[serde(rename = "Size (bytes)")]
    pub size: usize,
    /// Free memory reported by the inner resource after the call
    #[serde(rename = "Free Memory")]
    pub free_memory: usize,
    #[serde(rename = "Total Memory")]
    pub total_memory: usize,
    /// Outstanding allocations after the call
    #[serde(rename = "Current Allocs")]
    pub current_allocs: usize,
    #[serde(rename = "Start")]
    pub start: f64,
    #[serde(rename = "End")]
    pub end: f64,
    #[serde(rename = "Elapsed")]
    pub elapsed: f64,
    /// Name of the calling thread
    #[serde(rename = "Location")]
    pub location: String,
}

fn display<T: fmt::Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

#[derive(Debug, Default)]
struct EventLog {
    events: Vec<MemoryEvent>,
    current_allocs: usize,
}

/// Resource adaptor that records every allocate and deallocate
#[derive(Debug)]
pub struct LoggingResource {
    inner: SharedResource,
    device_id: i32,
    created: Instant,
    log: Mutex<EventLog>,
}

impl LoggingResource {
    pub fn new(inner: SharedResource, device_id: i32) -> Self {
        LoggingResource {
            inner,
            device_id,
            created: Instant::now(),
            log: Mutex::new(EventLog::default()),
        }
    }

    pub fn inner(&self) -> &SharedResource {
        &self.inner
    }

    /// Copy of the recorded events, oldest first
    pub fn events(&self) -> MemResult<Vec<MemoryEvent>> {
        Ok(self.log.lock()?.events.clone())
    }

    /// Drop recorded events. The outstanding allocation count is kept.
    pub fn clear(&self) -> MemResult<()> {
        self.log.lock()?.events.clear();
        Ok(())
    }

    /// Render the log as CSV, header first
    pub fn csv_log(&self) -> MemResult<String> {
        let log = self.log.lock()?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(CSV_HEADER)?;
        for event in &log.events {
            writer.serialize(event)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| MemoryError::EventLog(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| MemoryError::EventLog(e.to_string()))
    }

    fn seconds_since_creation(&self, at: Instant) -> f64 {
        at.duration_since(self.created).as_secs_f64()
    }

    // Recording must not fail a deallocation, so poisoning is ignored
    fn lock_log(&self) -> MutexGuard<'_, EventLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(
        &self,
        log: &mut EventLog,
        event: EventKind,
        address: DevicePtr,
        stream: StreamHandle,
        size: usize,
        started: Instant,
    ) {
        let finished = Instant::now();
        let memory = self.inner.mem_info().unwrap_or_default();
        let location = std::thread::current()
            .name()
            .unwrap_or("<unnamed>")
            .to_string();

        match event {
            EventKind::Alloc => log.current_allocs += 1,
            EventKind::Free => log.current_allocs = log.current_allocs.saturating_sub(1),
        }
        let current_allocs = log.current_allocs;

        let start = self.seconds_since_creation(started);
        let end = self.seconds_since_creation(finished);
        log.events.push(MemoryEvent {
            event,
            device_id: self.device_id,
            address,
            stream,
            size,
            free_memory: memory.free,
            total_memory: memory.total,
            current_allocs,
            start,
            end,
            elapsed: end - start,
            location,
        });
    }
}

impl DeviceMemoryResource for LoggingResource {
    fn allocate(&self, bytes: usize, stream: StreamHandle) -> MemResult<DevicePtr> {
        let started = Instant::now();
        let ptr = self.inner.allocate(bytes, stream)?;
        let mut log = self.lock_log();
        self.record(&mut log, EventKind::Alloc, ptr, stream, bytes, started);
        Ok(ptr)
    }

    fn deallocate(&self, ptr: DevicePtr, bytes: usize, stream: StreamHandle) {
        let started = Instant::now();
        // Free row must be logged before the address can be reused
        let mut log = self.lock_log();
        self.inner.deallocate(ptr, bytes, stream);
        self.record(&mut log, EventKind::Free, ptr, stream, bytes, started);
    }

    /// Equal when the wrapped resources are equal; the log itself does not
    /// own any memory
    fn is_equal(&self, other: &dyn DeviceMemoryResource) -> bool {
        if same_resource(self, other) {
            return true;
        }
        match other.as_any().downcast_ref::<LoggingResource>() {
            Some(other) => self.inner.is_equal(&*other.inner),
            None => false,
        }
    }

    fn supports_streams(&self) -> bool {
        self.inner.supports_streams()
    }

    fn supports_cross_stream_free(&self) -> bool {
        self.inner.supports_cross_stream_free()
    }

    fn mem_info(&self) -> MemResult<MemInfo> {
        self.inner.mem_info()
    }

    fn synchronize_stream(&self, stream: StreamHandle) -> MemResult<()> {
        self.inner.synchronize_stream(stream)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
