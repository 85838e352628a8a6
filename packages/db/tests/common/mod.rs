use db::{DbConfig, DbError, repositories::JobRepository};

/// Fresh in-memory store. Every call gets its own datastore.
pub async fn setup_repo() -> Result<JobRepository, DbError> {
    let db = db::init(&DbConfig::memory()).await?;
    Ok(JobRepository::new(db))
}
