//! Job repository for the active job table and its history.
//!
//! The active table is the broker: every lease change is a conditional
//! update on the stored row, so consumers in different processes sharing
//! one store never hold the same job at once.

use chrono::{DateTime, Utc};
use pool_core::{Job, JobId, JobStatus};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

const JOB_TABLE: &str = "shard_job";

/// Internal record type for SurrealDB.
///
/// The job itself lives in `body`; the other columns exist for filtering
/// and for the lease conditions.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    job_id: String,
    queue: String,
    status: String,
    /// Lease holder, empty when the job is not reserved.
    worker: String,
    attempts: u32,
    available_ms: i64,
    /// Lease expiry, `i64::MAX` when the job is not reserved.
    deadline_ms: i64,
    body: String,
}

impl JobRecord {
    fn from_job(job: &Job) -> Result<Self, DbError> {
        let (worker, deadline_ms) = match &job.status {
            JobStatus::Reserved {
                worker_id,
                deadline,
                ..
            } => (worker_id.clone(), deadline.timestamp_millis()),
            _ => (String::new(), i64::MAX),
        };
        Ok(Self {
            job_id: job.id.to_string(),
            queue: job.queue.clone(),
            status: job.status.as_str().to_string(),
            worker,
            attempts: job.attempts,
            available_ms: job.available_at.timestamp_millis(),
            deadline_ms,
            body: serde_json::to_string(job)?,
        })
    }

    fn into_job(self) -> Result<Job, DbError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Job history record for archival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistoryRecord {
    pub job_id: String,
    pub queue: String,
    pub chunk_index: u32,
    pub split_factor: u32,
    pub final_status: String,
    pub attempts: u32,
    pub created_at: String,
    pub finished_at: String,
    /// The job in its final state.
    pub body: String,
}

impl JobHistoryRecord {
    pub fn job(&self) -> Result<Job, DbError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Number of jobs of a queue in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub pending: u64,
    pub reserved: u64,
    pub acked: u64,
    pub dead: u64,
}

#[derive(Debug, Deserialize)]
struct StatusCount {
    #[serde(alias = "final_status")]
    status: String,
    total: u64,
}

fn into_jobs(records: Vec<JobRecord>) -> Result<Vec<Job>, DbError> {
    records.into_iter().map(JobRecord::into_job).collect()
}

/// Repository for job persistence operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new job in the database.
    pub async fn create(&self, job: &Job) -> Result<Job, DbError> {
        let record: Option<JobRecord> = self
            .db
            .create((JOB_TABLE, job.id.to_string()))
            .content(JobRecord::from_job(job)?)
            .await?;

        record
            .ok_or_else(|| DbError::Query("Failed to create job".into()))?
            .into_job()
    }

    /// Get an active job by ID.
    pub async fn get(&self, id: JobId) -> Result<Job, DbError> {
        let record: Option<JobRecord> = self.db.select((JOB_TABLE, id.to_string())).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))?
            .into_job()
    }

    /// Find a job whether it is active or archived.
    pub async fn find(&self, id: JobId) -> Result<Option<Job>, DbError> {
        match self.get(id).await {
            Ok(job) => return Ok(Some(job)),
            Err(DbError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let mut response = self
            .db
            .query("SELECT * FROM job_history WHERE job_id = $job_id")
            .bind(("job_id", id.to_string()))
            .await?;
        let records: Vec<JobHistoryRecord> = response.take(0)?;
        records.first().map(JobHistoryRecord::job).transpose()
    }

    /// Replace `from` with `to`, but only if the stored job still holds the
    /// same status, lease holder and delivery count as `from`.
    ///
    /// Returns `None` when another consumer changed the job first.
    pub async fn transition(&self, from: &Job, to: &Job) -> Result<Option<Job>, DbError> {
        let expected = JobRecord::from_job(from)?;
        let mut response = self
            .db
            .query(
                r#"
                UPDATE type::thing("shard_job", $id) CONTENT $record
                WHERE status = $status AND worker = $worker AND attempts = $attempts
                "#,
            )
            .bind(("id", to.id.to_string()))
            .bind(("record", JobRecord::from_job(to)?))
            .bind(("status", expected.status))
            .bind(("worker", expected.worker))
            .bind(("attempts", expected.attempts))
            .await?
            .check()?;

        let records: Vec<JobRecord> = response.take(0)?;
        records.into_iter().next().map(JobRecord::into_job).transpose()
    }

    /// Pending jobs of a queue that may be delivered at `now`, oldest first.
    pub async fn list_deliverable(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, DbError> {
        let mut response = self
            .db
            .query(format!(
                r#"
                SELECT * FROM shard_job
                WHERE queue = $queue AND status = "pending" AND available_ms <= $now
                ORDER BY job_id LIMIT {}
                "#,
                limit
            ))
            .bind(("queue", queue.to_string()))
            .bind(("now", now.timestamp_millis()))
            .await?;

        into_jobs(response.take(0)?)
    }

    /// Reserved jobs of a queue whose lease ran out at `now`, oldest first.
    pub async fn list_expired(&self, queue: &str, now: DateTime<Utc>) -> Result<Vec<Job>, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                SELECT * FROM shard_job
                WHERE queue = $queue AND status = "reserved" AND deadline_ms <= $now
                ORDER BY job_id
                "#,
            )
            .bind(("queue", queue.to_string()))
            .bind(("now", now.timestamp_millis()))
            .await?;

        into_jobs(response.take(0)?)
    }

    /// Terminal jobs still in the active table, left by an interrupted archive.
    pub async fn list_stranded(&self, queue: &str) -> Result<Vec<Job>, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                SELECT * FROM shard_job
                WHERE queue = $queue AND status IN ["acked", "dead"]
                ORDER BY job_id
                "#,
            )
            .bind(("queue", queue.to_string()))
            .await?;

        into_jobs(response.take(0)?)
    }

    /// Move a terminal job to history and delete it from the active table.
    ///
    /// Both writes happen in one transaction and repeating the call is
    /// harmless. Non-terminal jobs are left untouched.
    pub async fn archive(&self, job: &Job) -> Result<(), DbError> {
        let finished_at = match &job.status {
            JobStatus::Acked { acked_at } => *acked_at,
            JobStatus::Dead { died_at, .. } => *died_at,
            _ => return Ok(()),
        };

        let history = JobHistoryRecord {
            job_id: job.id.to_string(),
            queue: job.queue.clone(),
            chunk_index: job.payload.chunk_index,
            split_factor: job.payload.split_factor,
            final_status: job.status.as_str().to_string(),
            attempts: job.attempts,
            created_at: job.created_at.to_rfc3339(),
            finished_at: finished_at.to_rfc3339(),
            body: serde_json::to_string(job)?,
        };

        self.db
            .query(
                r#"
                BEGIN TRANSACTION;
                UPSERT type::thing("job_history", $id) CONTENT $history;
                DELETE type::thing("shard_job", $id);
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("id", job.id.to_string()))
            .bind(("history", history))
            .await?
            .check()?;

        Ok(())
    }

    /// Archived jobs of a queue.
    pub async fn history(&self, queue: &str) -> Result<Vec<JobHistoryRecord>, DbError> {
        let mut response = self
            .db
            .query("SELECT * FROM job_history WHERE queue = $queue")
            .bind(("queue", queue.to_string()))
            .await?;

        let mut records: Vec<JobHistoryRecord> = response.take(0)?;
        records.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(records)
    }

    /// Count the jobs of a queue by state, archived ones included.
    pub async fn counts(&self, queue: &str) -> Result<JobCounts, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                SELECT status, count() AS total FROM shard_job
                WHERE queue = $queue GROUP BY status;
                SELECT final_status, count() AS total FROM job_history
                WHERE queue = $queue GROUP BY final_status;
                "#,
            )
            .bind(("queue", queue.to_string()))
            .await?;

        let active: Vec<StatusCount> = response.take(0)?;
        let archived: Vec<StatusCount> = response.take(1)?;

        let mut counts = JobCounts::default();
        for row in active.into_iter().chain(archived) {
            match row.status.as_str() {
                "pending" => counts.pending += row.total,
                "reserved" => counts.reserved += row.total,
                "acked" => counts.acked += row.total,
                "dead" => counts.dead += row.total,
                _ => {}
            }
        }
        Ok(counts)
    }
}
