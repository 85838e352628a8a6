//! Queue actor: the front of the durable, competing-consumer broker.
//!
//! The job store holds all queue state. Reservations are claimed with a
//! conditional update on the stored job, so several queue actors, in this
//! process or others, can serve one queue without delivering a job twice.
//! Jobs written by any producer are picked up on the next reserve.
//! Reservations that outlive the acknowledgement deadline are swept back
//! into the queue by whichever actor sees them first.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use db::DbError;
use db::repositories::JobRepository;
use pool_core::{Job, JobId, JobStatus, RedeliveryPolicy};
use ractor::{Actor, ActorCell, ActorProcessingErr, ActorRef};
use serde::{Deserialize, Serialize};

use crate::client::QueueClient;
use crate::messages::{QueueError, QueueMessage};

/// Candidates fetched per reserve. Claims lost to other consumers move on
/// to the next candidate.
const RESERVE_BATCH: usize = 16;

/// Statistics for a queue's current state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting for delivery.
    pub pending: u64,
    /// Jobs delivered and not yet acknowledged.
    pub reserved: u64,
    /// Jobs acknowledged.
    pub acked: u64,
    /// Jobs dead-lettered.
    pub dead: u64,
    /// Expired reservations this actor returned to the queue.
    pub redelivered: u64,
}

/// Queue actor arguments.
pub struct QueueArgs {
    pub queue: String,
    pub redelivery: RedeliveryPolicy,
    pub sweep_interval: Duration,
    pub store: JobRepository,
}

/// State for the queue actor.
pub struct QueueActorState {
    queue: String,
    redelivery: RedeliveryPolicy,
    redelivered: u64,
    store: JobRepository,
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn store_error(e: DbError) -> QueueError {
    QueueError::Store(e.to_string())
}

impl QueueActorState {
    fn new(args: QueueArgs) -> Self {
        Self {
            queue: args.queue,
            redelivery: args.redelivery,
            redelivered: 0,
            store: args.store,
        }
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let counts = self.store.counts(&self.queue).await.map_err(store_error)?;
        Ok(QueueStats {
            pending: counts.pending,
            reserved: counts.reserved,
            acked: counts.acked,
            dead: counts.dead,
            redelivered: self.redelivered,
        })
    }

    async fn enqueue(&self, job: Job) -> Result<Job, QueueError> {
        let job = self.store.create(&job).await.map_err(store_error)?;

        tracing::debug!(
            "Enqueued job {} (chunk {}/{}) on {}",
            job.id,
            job.payload.chunk_index,
            job.payload.split_factor,
            self.queue
        );
        Ok(job)
    }

    async fn reserve(&self, worker_id: String) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        let candidates = self
            .store
            .list_deliverable(&self.queue, now, RESERVE_BATCH)
            .await
            .map_err(store_error)?;

        for job in candidates {
            let mut next = job.clone();
            next.attempts = next.attempts.saturating_add(1);
            next.status = JobStatus::Reserved {
                worker_id: worker_id.clone(),
                reserved_at: now,
                deadline: after(now, self.redelivery.ack_deadline),
            };
            next.updated_at = now;

            if let Some(claimed) = self.store.transition(&job, &next).await.map_err(store_error)? {
                tracing::debug!(
                    "Job {} reserved by worker {} (attempt {})",
                    claimed.id,
                    worker_id,
                    claimed.attempts
                );
                return Ok(Some(claimed));
            }
            tracing::debug!("Job {} was claimed by another consumer", job.id);
        }

        Ok(None)
    }

    async fn ack(&self, job_id: JobId, worker_id: String) -> Result<Job, QueueError> {
        let job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(DbError::NotFound(_)) => {
                return match self.store.find(job_id).await.map_err(store_error)? {
                    Some(_) => Err(QueueError::NotReserved { job_id, worker_id }),
                    None => Err(QueueError::JobNotFound(job_id)),
                };
            }
            Err(e) => return Err(store_error(e)),
        };

        if job.status.reserved_by() != Some(worker_id.as_str()) {
            return Err(QueueError::NotReserved { job_id, worker_id });
        }

        let now = Utc::now();
        let mut next = job.clone();
        next.status = JobStatus::Acked { acked_at: now };
        next.updated_at = now;

        let Some(acked) = self.store.transition(&job, &next).await.map_err(store_error)? else {
            return Err(QueueError::NotReserved { job_id, worker_id });
        };

        // An interrupted archive is finished by the next sweep.
        self.store.archive(&acked).await.map_err(store_error)?;
        Ok(acked)
    }

    /// Return expired reservations to the queue, or dead-letter them, and
    /// finish archives that were interrupted.
    ///
    /// Store failures here mean the queue can no longer keep its promises,
    /// so they are returned to the caller instead of being logged.
    async fn sweep(&mut self) -> Result<(), QueueError> {
        let now = Utc::now();
        let expired = self
            .store
            .list_expired(&self.queue, now)
            .await
            .map_err(store_error)?;

        for job in expired {
            let mut next = job.clone();
            next.updated_at = now;

            if self.redelivery.allows_delivery(job.attempts) {
                next.status = JobStatus::Pending;
                next.available_at = after(now, self.redelivery.backoff);
                if self.store.transition(&job, &next).await.map_err(store_error)?.is_some() {
                    tracing::info!(
                        "Job {} missed its ack deadline, redelivering (attempt {} done)",
                        job.id,
                        job.attempts
                    );
                    self.redelivered += 1;
                }
            } else {
                next.status = JobStatus::Dead {
                    died_at: now,
                    attempts: job.attempts,
                };
                if let Some(dead) = self.store.transition(&job, &next).await.map_err(store_error)? {
                    self.store.archive(&dead).await.map_err(store_error)?;
                    tracing::warn!(
                        "Job {} dead-lettered after {} deliveries",
                        job.id,
                        job.attempts
                    );
                }
            }
        }

        let stranded = self
            .store
            .list_stranded(&self.queue)
            .await
            .map_err(store_error)?;
        for job in stranded {
            tracing::info!("Finishing archive of job {}", job.id);
            self.store.archive(&job).await.map_err(store_error)?;
        }

        Ok(())
    }
}

/// Queue actor that manages a single logical queue.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue actor: {}", args.queue);

        let sweep_interval = args.sweep_interval.max(Duration::from_millis(1));
        let state = QueueActorState::new(args);

        let stats = state
            .stats()
            .await
            .map_err(|e| ActorProcessingErr::from(format!("Failed to open queue: {}", e)))?;
        if stats.pending + stats.reserved > 0 {
            tracing::info!(
                "Queue {} has {} pending and {} reserved jobs",
                state.queue,
                stats.pending,
                stats.reserved
            );
        }

        // Start the redelivery sweep
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                interval.tick().await;
                if myself_clone.send_message(QueueMessage::Sweep).is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Enqueue { payload, reply } => {
                let job = Job::new(state.queue.clone(), *payload);
                let _ = reply.send(state.enqueue(job).await);
            }

            QueueMessage::Reserve { worker_id, reply } => {
                let _ = reply.send(state.reserve(worker_id).await);
            }

            QueueMessage::Ack {
                job_id,
                worker_id,
                reply,
            } => {
                let _ = reply.send(state.ack(job_id, worker_id).await);
            }

            QueueMessage::GetJob { job_id, reply } => {
                let _ = reply.send(state.store.find(job_id).await.map_err(store_error));
            }

            QueueMessage::GetStats { reply } => {
                let _ = reply.send(state.stats().await);
            }

            QueueMessage::Sweep => {
                state.sweep().await.map_err(|e| {
                    ActorProcessingErr::from(format!("Queue {} sweep failed: {}", state.queue, e))
                })?;
            }

            QueueMessage::Shutdown => {
                tracing::info!("Shutting down queue: {}", state.queue);
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Spawn a standalone queue actor.
pub async fn spawn_queue(args: QueueArgs) -> Result<QueueClient, QueueError> {
    let (actor, _handle) = Actor::spawn(None, QueueActor, args)
        .await
        .map_err(|e| QueueError::Unavailable(format!("Failed to spawn queue: {}", e)))?;
    Ok(QueueClient::new(actor))
}

/// Spawn a queue actor supervised by `supervisor`.
pub(crate) async fn spawn_linked_queue(
    args: QueueArgs,
    supervisor: ActorCell,
) -> Result<ActorRef<QueueMessage>, ActorProcessingErr> {
    let (actor, _handle) = Actor::spawn_linked(None, QueueActor, args, supervisor)
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn queue: {}", e)))?;
    Ok(actor)
}
