//! Job domain types for shard work items in the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::partition::PartitionError;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire payload of a shard job.
///
/// Serialized as `{"chunkIndex": .., "splitFactor": .., ...}`. Any extra
/// domain fields are carried through untouched for the scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardJob {
    pub chunk_index: u32,
    pub split_factor: u32,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ShardJob {
    /// Create a shard job, rejecting indices outside `[0, split_factor)`.
    pub fn new(chunk_index: u32, split_factor: u32) -> Result<Self, PartitionError> {
        if split_factor == 0 {
            return Err(PartitionError::ZeroSplitFactor);
        }
        if chunk_index >= split_factor {
            return Err(PartitionError::ChunkOutOfRange {
                chunk_index,
                split_factor,
            });
        }
        Ok(Self {
            chunk_index,
            split_factor,
            fields: Map::new(),
        })
    }

    /// Attach a domain field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Attach a set of domain fields.
    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// One job per chunk for the given split factor.
    pub fn all_shards(split_factor: u32) -> Result<Vec<Self>, PartitionError> {
        if split_factor == 0 {
            return Err(PartitionError::ZeroSplitFactor);
        }
        (0..split_factor)
            .map(|chunk_index| Self::new(chunk_index, split_factor))
            .collect()
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be delivered.
    #[default]
    Pending,
    /// Delivered to a consumer and not yet acknowledged.
    Reserved {
        worker_id: String,
        reserved_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    },
    /// Acknowledged by the consumer holding the reservation.
    Acked { acked_at: DateTime<Utc> },
    /// Exceeded the delivery limit without an acknowledgement.
    Dead {
        died_at: DateTime<Utc>,
        attempts: u32,
    },
}

impl JobStatus {
    /// Get a simple status string for display and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Reserved { .. } => "reserved",
            JobStatus::Acked { .. } => "acked",
            JobStatus::Dead { .. } => "dead",
        }
    }

    /// The consumer currently holding the reservation, if any.
    pub fn reserved_by(&self) -> Option<&str> {
        match self {
            JobStatus::Reserved { worker_id, .. } => Some(worker_id),
            _ => None,
        }
    }
}

/// A job is a shard payload wrapped in the queue's delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Logical queue this job belongs to.
    pub queue: String,
    /// The shard to scan.
    pub payload: ShardJob,
    /// Current status.
    pub status: JobStatus,
    /// Number of deliveries so far.
    #[serde(default)]
    pub attempts: u32,
    /// Earliest time the job may be delivered again.
    pub available_at: DateTime<Utc>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(queue: impl Into<String>, payload: ShardJob) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            queue: queue.into(),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            available_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_format_is_camel_case_with_domain_fields() {
        let job = ShardJob::new(2, 4)
            .unwrap()
            .with_field("gasPrice", json!("3000000000"));
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(
            value,
            json!({"chunkIndex": 2, "splitFactor": 4, "gasPrice": "3000000000"})
        );

        let parsed: ShardJob = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, job);
    }

    #[test]
    fn rejects_out_of_range_chunks() {
        assert_eq!(ShardJob::new(0, 0), Err(PartitionError::ZeroSplitFactor));
        assert_eq!(
            ShardJob::new(4, 4),
            Err(PartitionError::ChunkOutOfRange {
                chunk_index: 4,
                split_factor: 4
            })
        );
    }

    #[test]
    fn all_shards_covers_every_chunk() {
        let shards = ShardJob::all_shards(5).unwrap();
        let indices: Vec<u32> = shards.iter().map(|s| s.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(shards.iter().all(|s| s.split_factor == 5));
    }

    #[test]
    fn only_reserved_jobs_have_a_lease_holder() {
        let now = Utc::now();
        let reserved = JobStatus::Reserved {
            worker_id: "pool/1".to_string(),
            reserved_at: now,
            deadline: now,
        };
        assert_eq!(reserved.reserved_by(), Some("pool/1"));
        assert_eq!(reserved.as_str(), "reserved");

        let acked = JobStatus::Acked { acked_at: now };
        assert_eq!(acked.reserved_by(), None);
        assert_eq!(acked.as_str(), "acked");
        assert_eq!(JobStatus::Pending.reserved_by(), None);
    }
}
