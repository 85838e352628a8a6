//! Client handle for the queue actor.

use std::time::Duration;

use futures_util::future::try_join_all;
use pool_core::{Job, JobId, ShardJob};
use ractor::rpc::CallResult;
use ractor::{ActorRef, Message, RpcReplyPort};
use serde_json::{Map, Value};

use crate::messages::{QueueError, QueueMessage};
use crate::queue_actor::QueueStats;

/// How long a caller waits for an actor to answer.
pub(crate) const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Why an actor call did not produce a reply.
#[derive(Debug)]
pub(crate) enum CallFailure {
    Timeout,
    Unavailable(String),
}

/// Send a request to `actor` and wait for the reply.
pub(crate) async fn call<M, T, F>(actor: &ActorRef<M>, build: F) -> Result<T, CallFailure>
where
    M: Message,
    T: Send + 'static,
    F: FnOnce(RpcReplyPort<T>) -> M,
{
    match ractor::rpc::call(actor, build, Some(CALL_TIMEOUT)).await {
        Ok(CallResult::Success(value)) => Ok(value),
        Ok(CallResult::Timeout) => Err(CallFailure::Timeout),
        Ok(CallResult::SenderError) => Err(CallFailure::Unavailable(
            "actor dropped the request".to_string(),
        )),
        Err(e) => Err(CallFailure::Unavailable(e.to_string())),
    }
}

impl From<CallFailure> for QueueError {
    fn from(failure: CallFailure) -> Self {
        match failure {
            CallFailure::Timeout => QueueError::Timeout,
            CallFailure::Unavailable(reason) => QueueError::Unavailable(reason),
        }
    }
}

/// Narrow interface to the durable queue: enqueue, reserve, ack.
#[derive(Debug, Clone)]
pub struct QueueClient {
    actor: ActorRef<QueueMessage>,
}

impl QueueClient {
    pub fn new(actor: ActorRef<QueueMessage>) -> Self {
        Self { actor }
    }

    /// The underlying queue actor.
    pub fn actor(&self) -> &ActorRef<QueueMessage> {
        &self.actor
    }

    /// Durably insert a job.
    pub async fn enqueue(&self, payload: ShardJob) -> Result<Job, QueueError> {
        call(&self.actor, |reply| QueueMessage::Enqueue {
            payload: Box::new(payload),
            reply,
        })
        .await?
    }

    /// Enqueue one job per chunk of `split_factor`, each carrying `fields`.
    pub async fn enqueue_shards(
        &self,
        split_factor: u32,
        fields: Map<String, Value>,
    ) -> Result<Vec<Job>, QueueError> {
        let shards = ShardJob::all_shards(split_factor)?;
        try_join_all(
            shards
                .into_iter()
                .map(|shard| self.enqueue(shard.with_fields(fields.clone()))),
        )
        .await
    }

    /// Reserve the next deliverable job for `worker_id`.
    pub async fn reserve(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        let worker_id = worker_id.to_string();
        call(&self.actor, |reply| QueueMessage::Reserve { worker_id, reply }).await?
    }

    /// Acknowledge a job reserved by `worker_id`.
    pub async fn ack(&self, job_id: JobId, worker_id: &str) -> Result<Job, QueueError> {
        let worker_id = worker_id.to_string();
        call(&self.actor, |reply| QueueMessage::Ack {
            job_id,
            worker_id,
            reply,
        })
        .await?
    }

    /// Look up a job, including acknowledged and dead-lettered ones.
    pub async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        call(&self.actor, |reply| QueueMessage::GetJob { job_id, reply }).await?
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        call(&self.actor, |reply| QueueMessage::GetStats { reply }).await?
    }

    pub fn shutdown(&self) {
        let _ = self.actor.send_message(QueueMessage::Shutdown);
    }
}
