//! Worker actor for scanning shards.

use std::sync::Arc;
use std::time::Duration;

use pool_core::{Dataset, Job, JobId, ScanFailurePolicy, WorkerId, partition};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use serde_json::{Map, Value};

use crate::client::QueueClient;
use crate::messages::WorkerMessage;
use crate::scanner::{EventSink, ScanContext, ScanError, ScanReport, Scanner};

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID.
    pub worker_id: WorkerId,
    /// Consumer name used for reservations, unique across pools.
    consumer: String,
    /// Job currently being scanned.
    pub current_job: Option<JobId>,
    queue: QueueClient,
    events: EventSink,
    scanner: Arc<dyn Scanner>,
    dataset: Arc<dyn Dataset>,
    params: Arc<Map<String, Value>>,
    poll_interval: Duration,
    on_scan_failure: ScanFailurePolicy,
}

impl WorkerActorState {
    /// Check if the worker is idle.
    pub fn is_idle(&self) -> bool {
        self.current_job.is_none()
    }

    /// Partition, scan and acknowledge one job.
    ///
    /// Errors leave the job unacknowledged; the queue redelivers it once
    /// the reservation expires.
    async fn run_job(&mut self, job: Job) -> Result<ScanReport, ScanError> {
        let slice = partition(
            self.dataset.as_ref(),
            job.payload.chunk_index,
            job.payload.split_factor,
        )?;

        tracing::debug!(
            "Worker {} scanning job {} items {}..{}",
            self.worker_id,
            job.id,
            slice.start,
            slice.end
        );

        let ctx = ScanContext {
            job_id: job.id,
            attempt: job.attempts,
            job: job.payload,
            slice,
            params: self.params.clone(),
            events: self.events.clone(),
        };
        let report = self.scanner.scan(ctx).await?;

        // A lost reservation means another worker owns the job now.
        if let Err(e) = self.queue.ack(job.id, &self.consumer).await {
            tracing::warn!(
                "Worker {} could not ack job {}: {}",
                self.worker_id,
                job.id,
                e
            );
        }

        Ok(report)
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: WorkerId,
    pub consumer: String,
    pub queue: QueueClient,
    pub events: EventSink,
    pub scanner: Arc<dyn Scanner>,
    pub dataset: Arc<dyn Dataset>,
    pub params: Arc<Map<String, Value>>,
    pub poll_interval: Duration,
    pub on_scan_failure: ScanFailurePolicy,
}

fn schedule_poll(myself: &ActorRef<WorkerMessage>, after: Duration) {
    let myself = myself.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let _ = myself.send_message(WorkerMessage::Poll);
    });
}

/// Worker actor that consumes jobs from the queue one at a time.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        myself.send_message(WorkerMessage::Poll)?;

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            consumer: args.consumer,
            current_job: None,
            queue: args.queue,
            events: args.events,
            scanner: args.scanner,
            dataset: args.dataset,
            params: args.params,
            poll_interval: args.poll_interval,
            on_scan_failure: args.on_scan_failure,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if !state.is_idle() {
                    return Ok(());
                }

                match state.queue.reserve(&state.consumer).await {
                    Ok(Some(job)) => {
                        myself.send_message(WorkerMessage::ProcessJob { job: Box::new(job) })?;
                    }
                    Ok(None) => schedule_poll(&myself, state.poll_interval),
                    Err(e) => {
                        tracing::warn!("Worker {} failed to reserve: {}", state.worker_id, e);
                        schedule_poll(&myself, state.poll_interval);
                    }
                }
            }

            WorkerMessage::ProcessJob { job } => {
                let job_id = job.id;
                state.current_job = Some(job_id);
                let result = state.run_job(*job).await;
                state.current_job = None;

                match result {
                    Ok(report) => {
                        tracing::info!(
                            "Worker {} finished job {}: {} scanned, {} findings",
                            state.worker_id,
                            job_id,
                            report.scanned,
                            report.findings
                        );
                    }
                    Err(e) => {
                        tracing::warn!("Worker {} failed job {}: {}", state.worker_id, job_id, e);
                        state.events.error(format!("job {}: {}", job_id, e));

                        if state.on_scan_failure == ScanFailurePolicy::TerminateWorker {
                            return Err(ActorProcessingErr::from(format!(
                                "scan of job {} failed: {}",
                                job_id, e
                            )));
                        }
                    }
                }

                myself.send_message(WorkerMessage::Poll)?;
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.worker_id);
                myself.stop(None);
            }
        }

        Ok(())
    }
}
