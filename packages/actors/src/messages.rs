//! Message types for actor communication.

use pool_core::{Job, JobId, PartitionError, ShardJob, WorkerEvent, WorkerHandle, WorkerId};
use ractor::RpcReplyPort;

use crate::client::QueueClient;
use crate::queue_actor::QueueStats;

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Durably insert a new job.
    Enqueue {
        payload: Box<ShardJob>,
        reply: RpcReplyPort<Result<Job, QueueError>>,
    },

    /// Hand the next deliverable job to a consumer.
    Reserve {
        worker_id: String,
        reply: RpcReplyPort<Result<Option<Job>, QueueError>>,
    },

    /// Mark a reserved job complete.
    Ack {
        job_id: JobId,
        worker_id: String,
        reply: RpcReplyPort<Result<Job, QueueError>>,
    },

    /// Get a job by ID, active or archived.
    GetJob {
        job_id: JobId,
        reply: RpcReplyPort<Result<Option<Job>, QueueError>>,
    },

    /// Get queue stats.
    GetStats {
        reply: RpcReplyPort<Result<QueueStats, QueueError>>,
    },

    /// Return expired reservations to the queue.
    Sweep,

    /// Shutdown the queue gracefully.
    Shutdown,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Ask the queue for work if idle.
    Poll,

    /// Scan the shard of a reserved job.
    ProcessJob { job: Box<Job> },

    /// Shutdown the worker.
    Shutdown,
}

/// Messages for the Coordinator.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Event emitted by a worker, forwarded unchanged.
    Worker {
        worker_id: WorkerId,
        event: WorkerEvent,
    },

    /// Unrecoverable error on the coordination channel.
    CoordinationError { error: String },

    /// List all worker handles, including exited ones.
    GetWorkers {
        reply: RpcReplyPort<Vec<WorkerHandle>>,
    },

    /// Get a client for the pool's queue.
    GetQueue { reply: RpcReplyPort<QueueClient> },

    /// Kill a running worker.
    TerminateWorker {
        worker_id: WorkerId,
        reply: RpcReplyPort<Result<(), CoordinatorError>>,
    },

    /// Stop workers, queue and coordinator.
    Shutdown,
}

/// Error type for queue operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {job_id} is not reserved by worker {worker_id}")]
    NotReserved { job_id: JobId, worker_id: String },

    #[error("Invalid shard: {0}")]
    Partition(#[from] PartitionError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Timeout")]
    Timeout,
}

/// Error type for the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Fatal coordination error: {0}")]
    Fatal(String),

    #[error("Failed to start pool: {0}")]
    Spawn(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Coordinator unavailable: {0}")]
    Unavailable(String),

    #[error("Worker {0} is not running")]
    WorkerNotRunning(WorkerId),
}
