//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// Safe to run on every startup; all definitions are idempotent.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing job store schema...");

    db.query(JOB_SCHEMA).await?.check()?;
    db.query(JOB_HISTORY_SCHEMA).await?.check()?;

    tracing::info!("Job store schema initialized");

    Ok(())
}

/// Active job table. The job itself is stored as a JSON body; the scalar
/// columns exist for filtering.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS shard_job SCHEMALESS;

DEFINE INDEX IF NOT EXISTS shard_job_queue ON shard_job FIELDS queue;
DEFINE INDEX IF NOT EXISTS shard_job_queue_status ON shard_job FIELDS queue, status;
"#;

/// History of acknowledged and dead-lettered jobs.
const JOB_HISTORY_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job_history SCHEMALESS;

DEFINE INDEX IF NOT EXISTS history_job ON job_history FIELDS job_id;
DEFINE INDEX IF NOT EXISTS history_queue ON job_history FIELDS queue;
DEFINE INDEX IF NOT EXISTS history_status ON job_history FIELDS final_status;
"#;
