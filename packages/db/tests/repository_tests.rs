#![allow(clippy::disallowed_methods)]

mod common;

use chrono::{TimeDelta, Utc};
use pool_core::{Job, JobStatus, ShardJob};
use serde_json::json;
use std::error::Error;

use db::DbError;

fn shard(chunk_index: u32, split_factor: u32) -> ShardJob {
    ShardJob::new(chunk_index, split_factor)
        .expect("valid shard")
        .with_field("block", json!(14_000_000))
}

fn reserved(job: &Job, worker: &str) -> Job {
    let now = Utc::now();
    let mut next = job.clone();
    next.attempts += 1;
    next.status = JobStatus::Reserved {
        worker_id: worker.to_string(),
        reserved_at: now,
        deadline: now + TimeDelta::seconds(30),
    };
    next.updated_at = now;
    next
}

#[tokio::test]
async fn create_and_get() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;

    let job = Job::new("tasks", shard(1, 4));
    let created = repo.create(&job).await?;
    assert_eq!(created, job);

    let loaded = repo.get(job.id).await?;
    assert_eq!(loaded.payload.chunk_index, 1);
    assert_eq!(loaded.payload.fields.get("block"), Some(&json!(14_000_000)));

    let missing = repo.get(Job::new("tasks", shard(0, 1)).id).await;
    assert!(matches!(missing, Err(DbError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn transition_applies_only_to_the_expected_state() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;

    let job = Job::new("tasks", shard(0, 2));
    repo.create(&job).await?;

    let first = reserved(&job, "a");
    let claimed = repo.transition(&job, &first).await?;
    assert_eq!(claimed.as_ref().map(|j| j.attempts), Some(1));
    assert_eq!(repo.get(job.id).await?.status.reserved_by(), Some("a"));

    // A second consumer working from the same stale snapshot loses.
    let second = reserved(&job, "b");
    assert!(repo.transition(&job, &second).await?.is_none());
    assert_eq!(repo.get(job.id).await?.status.reserved_by(), Some("a"));

    // Transitions of jobs that are not stored do nothing.
    let ghost = Job::new("tasks", shard(1, 2));
    assert!(repo.transition(&ghost, &reserved(&ghost, "a")).await?.is_none());
    assert!(matches!(repo.get(ghost.id).await, Err(DbError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn deliverable_jobs_are_pending_available_and_scoped_to_queue()
-> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;
    let now = Utc::now();

    let first = Job::new("tasks", shard(0, 3));
    let second = Job::new("tasks", shard(1, 3));
    let mut later = Job::new("tasks", shard(2, 3));
    later.available_at = now + TimeDelta::minutes(5);
    let foreign = Job::new("other", shard(0, 1));
    for job in [&first, &second, &later, &foreign] {
        repo.create(job).await?;
    }
    repo.transition(&second, &reserved(&second, "a")).await?;

    let deliverable = repo.list_deliverable("tasks", now, 10).await?;
    let ids: Vec<_> = deliverable.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![first.id]);

    let limited = repo.list_deliverable("tasks", now + TimeDelta::minutes(10), 1).await?;
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, first.id);

    Ok(())
}

#[tokio::test]
async fn expired_leases_are_listed() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;

    let job = Job::new("tasks", shard(0, 1));
    repo.create(&job).await?;
    repo.transition(&job, &reserved(&job, "a")).await?;

    assert!(repo.list_expired("tasks", Utc::now()).await?.is_empty());

    let expired = repo
        .list_expired("tasks", Utc::now() + TimeDelta::minutes(1))
        .await?;
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, job.id);

    Ok(())
}

#[tokio::test]
async fn archive_moves_terminal_jobs_to_history() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;

    let mut job = Job::new("tasks", shard(2, 4));
    repo.create(&job).await?;

    // Pending jobs are not archived.
    repo.archive(&job).await?;
    assert!(repo.get(job.id).await.is_ok());

    job.attempts = 1;
    job.status = JobStatus::Acked {
        acked_at: Utc::now(),
    };
    repo.archive(&job).await?;

    assert!(matches!(repo.get(job.id).await, Err(DbError::NotFound(_))));

    let history = repo.history("tasks").await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].job_id, job.id.to_string());
    assert_eq!(history[0].final_status, "acked");
    assert_eq!(history[0].chunk_index, 2);
    assert_eq!(history[0].split_factor, 4);

    // Archived jobs are still found, in their final state.
    assert_eq!(repo.find(job.id).await?, Some(job));

    Ok(())
}

#[tokio::test]
async fn archive_can_be_repeated() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;

    let job = Job::new("tasks", shard(0, 1));
    repo.create(&job).await?;
    let acked = repo
        .transition(
            &job,
            &Job {
                status: JobStatus::Acked {
                    acked_at: Utc::now(),
                },
                ..job.clone()
            },
        )
        .await?
        .expect("pending job transitions");

    assert_eq!(repo.list_stranded("tasks").await?.len(), 1);

    repo.archive(&acked).await?;
    repo.archive(&acked).await?;

    assert!(repo.list_stranded("tasks").await?.is_empty());
    assert_eq!(repo.history("tasks").await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn counts_include_archived_jobs() -> Result<(), Box<dyn Error>> {
    let repo = common::setup_repo().await?;

    let pending = Job::new("tasks", shard(0, 3));
    let leased = Job::new("tasks", shard(1, 3));
    let mut done = Job::new("tasks", shard(2, 3));
    for job in [&pending, &leased, &done] {
        repo.create(job).await?;
    }
    repo.transition(&leased, &reserved(&leased, "a")).await?;
    done.status = JobStatus::Dead {
        died_at: Utc::now(),
        attempts: 3,
    };
    repo.archive(&done).await?;

    let counts = repo.counts("tasks").await?;
    assert_eq!(counts.pending, 1);
    assert_eq!(counts.reserved, 1);
    assert_eq!(counts.acked, 0);
    assert_eq!(counts.dead, 1);

    assert_eq!(repo.counts("other").await?, Default::default());

    Ok(())
}
