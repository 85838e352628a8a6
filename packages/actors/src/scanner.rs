//! The scan seam: the per-shard domain evaluation plugged into workers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use pool_core::{JobId, PartitionError, ShardJob, SliceDescriptor, WorkerEvent, WorkerId};
use ractor::ActorRef;
use serde_json::{Map, Value};

use crate::messages::CoordinatorMessage;

/// Outcome of a successful scan.
///
/// Acknowledgement does not depend on it; a scan with zero findings is
/// still a completed job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Items the scan considered.
    pub scanned: usize,
    /// Items that produced a result.
    pub findings: usize,
}

impl ScanReport {
    pub fn new(scanned: usize, findings: usize) -> Self {
        Self { scanned, findings }
    }
}

/// A scan attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ScanError(pub String);

impl ScanError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<PartitionError> for ScanError {
    fn from(err: PartitionError) -> Self {
        Self(err.to_string())
    }
}

/// Result type for scans.
pub type ScanResult = Result<ScanReport, ScanError>;

/// Future type for async scans.
pub type ScanFuture = Pin<Box<dyn Future<Output = ScanResult> + Send>>;

/// Channel from a worker to its coordinator.
#[derive(Debug, Clone)]
pub struct EventSink {
    worker_id: WorkerId,
    coordinator: ActorRef<CoordinatorMessage>,
}

impl EventSink {
    pub(crate) fn new(worker_id: WorkerId, coordinator: ActorRef<CoordinatorMessage>) -> Self {
        Self {
            worker_id,
            coordinator,
        }
    }

    /// Worker this sink belongs to.
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Emit an informational event.
    pub fn info(&self, message: impl Into<String>) {
        self.emit(WorkerEvent::Info(message.into()));
    }

    pub(crate) fn error(&self, error: impl Into<String>) {
        self.emit(WorkerEvent::Error(error.into()));
    }

    fn emit(&self, event: WorkerEvent) {
        if let Err(e) = self.coordinator.send_message(CoordinatorMessage::Worker {
            worker_id: self.worker_id,
            event,
        }) {
            tracing::debug!("Worker {} event dropped: {}", self.worker_id, e);
        }
    }
}

/// Everything a scan needs for one job.
pub struct ScanContext {
    pub job_id: JobId,
    /// Delivery count of this job, starting at 1.
    pub attempt: u32,
    pub job: ShardJob,
    /// The shard resolved by the partitioner.
    pub slice: SliceDescriptor,
    /// Scanner parameters from the pool configuration.
    pub params: Arc<Map<String, Value>>,
    pub events: EventSink,
}

/// Trait for shard scanners.
///
/// Implement this trait to define what a worker does with its slice.
pub trait Scanner: Send + Sync + 'static {
    fn scan(&self, ctx: ScanContext) -> ScanFuture;
}

/// A simple function-based scanner.
pub struct FnScanner<F>
where
    F: Fn(ScanContext) -> ScanFuture + Send + Sync + 'static,
{
    scan: F,
}

impl<F> FnScanner<F>
where
    F: Fn(ScanContext) -> ScanFuture + Send + Sync + 'static,
{
    pub fn new(scan: F) -> Self {
        Self { scan }
    }
}

impl<F> Scanner for FnScanner<F>
where
    F: Fn(ScanContext) -> ScanFuture + Send + Sync + 'static,
{
    fn scan(&self, ctx: ScanContext) -> ScanFuture {
        (self.scan)(ctx)
    }
}
