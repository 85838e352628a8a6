//! Core domain types for the shard worker pool.
//!
//! This crate contains shared types used across all packages:
//! - `ShardJob` and `Job` for queued work
//! - The partitioner that maps a shard to a dataset slice
//! - Worker identity, lifecycle and events
//! - Pool and broker configuration

mod config;
mod events;
mod job;
mod partition;
mod worker;

pub use config::{
    BrokerConfig, ConfigError, PoolConfig, RedeliveryPolicy, RespawnPolicy, ScanFailurePolicy,
};
pub use events::{PoolEvent, WorkerEvent};
pub use job::{Job, JobId, JobStatus, ShardJob};
pub use partition::{
    Dataset, InMemoryDataset, PartitionError, SliceDescriptor, partition, partition_range,
};
pub use worker::{WorkerExit, WorkerHandle, WorkerId, WorkerState};
