//! Actor system for the shard scanning pool.
//!
//! This crate provides the Ractor-based actors behind a worker pool that
//! scans slices of a dataset, one queued shard job at a time.
//!
//! # Architecture
//!
//! - `Coordinator` - Top-level actor that owns the queue and the workers
//! - `QueueActor` - Durable competing-consumer queue of shard jobs
//! - `WorkerActor` - Reserves a job, scans its slice, acknowledges it
//!
//! # Usage
//!
//! ```ignore
//! use actors::{FnScanner, ScanReport, start_pool};
//!
//! let pool = start_pool(config, Arc::new(scanner), Arc::new(dataset)).await?;
//! pool.queue().enqueue_shards(4, fields).await?;
//!
//! while let Some(event) = pool.next_event().await {
//!     println!("{}", event.description());
//! }
//! ```

mod client;
mod coordinator;
mod messages;
mod queue_actor;
mod scanner;
mod worker_actor;

pub use client::QueueClient;
pub use coordinator::{
    Coordinator, CoordinatorArgs, PoolHandle, start_pool, start_pool_with_store,
};
pub use messages::{
    CoordinatorError, CoordinatorMessage, QueueError, QueueMessage, WorkerMessage,
};
pub use queue_actor::{QueueActor, QueueArgs, QueueStats, spawn_queue};
pub use scanner::{
    EventSink, FnScanner, ScanContext, ScanError, ScanFuture, ScanReport, ScanResult, Scanner,
};
pub use worker_actor::WorkerActor;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort};
