//! Coordinator actor: owns the queue and a fixed pool of workers.
//!
//! Worker events are forwarded to the pool's outward channel unchanged.
//! Worker exits are reported and never stop the coordinator. Failures on
//! the coordination channel itself (an injected coordination error, the
//! queue actor dying, a failed respawn) abort the coordinator. Only a
//! requested shutdown counts as a clean stop.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use db::repositories::JobRepository;
use db::DbConfig;
use pool_core::{
    Dataset, PoolConfig, PoolEvent, RespawnPolicy, WorkerExit, WorkerHandle, WorkerId,
};
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::client::{QueueClient, call, CallFailure};
use crate::messages::{CoordinatorError, CoordinatorMessage, WorkerMessage};
use crate::queue_actor::{QueueArgs, spawn_linked_queue};
use crate::scanner::{EventSink, Scanner};
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Coordinator actor arguments.
pub struct CoordinatorArgs {
    pub config: PoolConfig,
    pub store: JobRepository,
    pub scanner: Arc<dyn Scanner>,
    pub dataset: Arc<dyn Dataset>,
    pub events: mpsc::UnboundedSender<PoolEvent>,
    /// Receives `Ok` on requested shutdown and the error on abort.
    pub outcome: oneshot::Sender<Result<(), CoordinatorError>>,
}

/// State for the coordinator actor.
pub struct CoordinatorState {
    /// Prefix of this pool's consumer names on the shared broker.
    pool_id: String,
    config: PoolConfig,
    queue: QueueClient,
    scanner: Arc<dyn Scanner>,
    dataset: Arc<dyn Dataset>,
    params: Arc<Map<String, Value>>,
    /// Every worker ever spawned, by ID.
    workers: BTreeMap<WorkerId, WorkerHandle>,
    /// Live worker actors.
    running: HashMap<ActorId, (WorkerId, ActorRef<WorkerMessage>)>,
    events: mpsc::UnboundedSender<PoolEvent>,
    outcome: Option<oneshot::Sender<Result<(), CoordinatorError>>>,
    /// Worker counter for unique IDs.
    worker_counter: u32,
    shutting_down: bool,
}

impl CoordinatorState {
    /// Generate a unique worker ID.
    fn next_worker_id(&mut self) -> WorkerId {
        self.worker_counter += 1;
        WorkerId(self.worker_counter)
    }

    fn forward(&self, event: PoolEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Pool event receiver dropped");
        }
    }

    fn finish(&mut self, outcome: Result<(), CoordinatorError>) {
        if let Some(sender) = self.outcome.take() {
            let _ = sender.send(outcome);
        }
    }

    fn stop_children(&mut self, reason: &str) {
        self.shutting_down = true;
        for (_, worker) in self.running.values() {
            worker.stop(Some(reason.to_string()));
        }
        self.queue.actor().stop(Some(reason.to_string()));
    }

    /// Stop everything and hand `error` to whoever waits on the pool.
    fn abort(&mut self, error: CoordinatorError) -> ActorProcessingErr {
        tracing::error!("Coordinator aborting: {}", error);
        self.stop_children("coordinator aborted");
        let message = error.to_string();
        self.finish(Err(error));
        ActorProcessingErr::from(message)
    }

    async fn on_child_exit(
        &mut self,
        myself: &ActorRef<CoordinatorMessage>,
        actor_id: ActorId,
        exit: WorkerExit,
    ) -> Result<(), ActorProcessingErr> {
        if actor_id == self.queue.actor().get_id() {
            if self.shutting_down {
                return Ok(());
            }
            let detail = exit
                .detail
                .or(exit.signal)
                .unwrap_or_else(|| "stopped".to_string());
            return Err(self.abort(CoordinatorError::Fatal(format!(
                "queue actor exited: {}",
                detail
            ))));
        }

        let Some((worker_id, _)) = self.running.remove(&actor_id) else {
            return Ok(());
        };

        if let Some(handle) = self.workers.get_mut(&worker_id)
            && handle.mark_exited(exit.clone())
        {
            tracing::warn!("worker {} died: {:?}", worker_id, exit);
            self.forward(PoolEvent::WorkerExited { worker_id, exit });
        }

        if self.config.respawn == RespawnPolicy::Always
            && !self.shutting_down
            && let Err(e) = spawn_worker(myself, self).await
        {
            return Err(self.abort(CoordinatorError::Fatal(format!(
                "failed to replace worker {}: {}",
                worker_id, e
            ))));
        }

        Ok(())
    }
}

async fn spawn_worker(
    myself: &ActorRef<CoordinatorMessage>,
    state: &mut CoordinatorState,
) -> Result<WorkerId, ActorProcessingErr> {
    let worker_id = state.next_worker_id();
    let args = WorkerArgs {
        worker_id,
        consumer: format!("{}/{}", state.pool_id, worker_id),
        queue: state.queue.clone(),
        events: EventSink::new(worker_id, myself.clone()),
        scanner: state.scanner.clone(),
        dataset: state.dataset.clone(),
        params: state.params.clone(),
        poll_interval: state.config.poll_interval,
        on_scan_failure: state.config.on_scan_failure,
    };

    let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    state
        .running
        .insert(worker.get_id(), (worker_id, worker));
    state.workers.insert(worker_id, WorkerHandle::new(worker_id));

    Ok(worker_id)
}

/// Coordinator actor that manages the worker pool.
pub struct Coordinator;

impl Actor for Coordinator {
    type Msg = CoordinatorMessage;
    type State = CoordinatorState;
    type Arguments = CoordinatorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting coordinator with {} workers on queue {}",
            args.config.num_workers,
            args.config.broker.queue_name
        );

        let queue_args = QueueArgs {
            queue: args.config.broker.queue_name.clone(),
            redelivery: args.config.broker.redelivery.clone(),
            sweep_interval: args.config.broker.sweep_interval,
            store: args.store,
        };
        let queue = spawn_linked_queue(queue_args, myself.get_cell()).await?;

        let mut state = CoordinatorState {
            pool_id: Ulid::new().to_string(),
            params: Arc::new(args.config.scan_params.clone()),
            config: args.config,
            queue: QueueClient::new(queue),
            scanner: args.scanner,
            dataset: args.dataset,
            workers: BTreeMap::new(),
            running: HashMap::new(),
            events: args.events,
            outcome: Some(args.outcome),
            worker_counter: 0,
            shutting_down: false,
        };

        for _ in 0..state.config.num_workers {
            spawn_worker(&myself, &mut state).await?;
        }

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CoordinatorMessage::Worker { worker_id, event } => {
                state.forward(PoolEvent::Worker { worker_id, event });
            }

            CoordinatorMessage::CoordinationError { error } => {
                return Err(state.abort(CoordinatorError::Fatal(error)));
            }

            CoordinatorMessage::GetWorkers { reply } => {
                let _ = reply.send(state.workers.values().cloned().collect());
            }

            CoordinatorMessage::GetQueue { reply } => {
                let _ = reply.send(state.queue.clone());
            }

            CoordinatorMessage::TerminateWorker { worker_id, reply } => {
                let worker = state
                    .running
                    .values()
                    .find(|(id, _)| *id == worker_id)
                    .map(|(_, worker)| worker.clone());
                match worker {
                    Some(worker) => {
                        tracing::info!("Killing worker {}", worker_id);
                        worker.kill();
                        let _ = reply.send(Ok(()));
                    }
                    None => {
                        let _ = reply.send(Err(CoordinatorError::WorkerNotRunning(worker_id)));
                    }
                }
            }

            CoordinatorMessage::Shutdown => {
                tracing::info!("Shutting down coordinator");
                state.stop_children("pool shutdown");
                state.finish(Ok(()));
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if !state.shutting_down {
            tracing::warn!("Coordinator stopped without a shutdown request");
            state.stop_children("coordinator stopped");
        }
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                let exit = match reason {
                    None => WorkerExit::normal(),
                    Some(reason) => WorkerExit::signalled(reason),
                };
                state.on_child_exit(&myself, cell.get_id(), exit).await
            }
            SupervisionEvent::ActorFailed(cell, err) => {
                let exit = WorkerExit::failed(err.to_string());
                state.on_child_exit(&myself, cell.get_id(), exit).await
            }
            _ => Ok(()),
        }
    }
}

/// Running pool: the coordinator, its queue and its outward event channel.
pub struct PoolHandle {
    coordinator: ActorRef<CoordinatorMessage>,
    queue: QueueClient,
    events: mpsc::UnboundedReceiver<PoolEvent>,
    outcome: oneshot::Receiver<Result<(), CoordinatorError>>,
    join: JoinHandle<()>,
}

impl PoolHandle {
    pub fn coordinator(&self) -> &ActorRef<CoordinatorMessage> {
        &self.coordinator
    }

    /// Client for the pool's queue, for producers and inspection.
    pub fn queue(&self) -> &QueueClient {
        &self.queue
    }

    /// Next event from the pool. `None` once the coordinator is gone.
    pub async fn next_event(&mut self) -> Option<PoolEvent> {
        self.events.recv().await
    }

    pub async fn workers(&self) -> Result<Vec<WorkerHandle>, CoordinatorError> {
        call(&self.coordinator, |reply| CoordinatorMessage::GetWorkers { reply })
            .await
            .map_err(CoordinatorError::from)
    }

    /// Kill one worker, as a signal would kill a worker process.
    pub async fn terminate_worker(&self, worker_id: WorkerId) -> Result<(), CoordinatorError> {
        call(&self.coordinator, |reply| CoordinatorMessage::TerminateWorker {
            worker_id,
            reply,
        })
        .await?
    }

    /// Raise a fatal error on the coordination channel.
    pub fn raise_coordination_error(&self, error: impl Into<String>) -> Result<(), CoordinatorError> {
        self.coordinator
            .send_message(CoordinatorMessage::CoordinationError {
                error: error.into(),
            })
            .map_err(|e| CoordinatorError::Unavailable(e.to_string()))
    }

    pub fn shutdown(&self) {
        let _ = self.coordinator.send_message(CoordinatorMessage::Shutdown);
    }

    /// Whether the coordinator is still running.
    pub fn is_alive(&self) -> bool {
        !self.join.is_finished()
    }

    /// Wait for the coordinator to stop.
    ///
    /// `Ok` only after a requested shutdown. An abort returns its error and
    /// any other stop (a panic, a direct actor stop) is reported as fatal.
    pub async fn wait(self) -> Result<(), CoordinatorError> {
        self.join
            .await
            .map_err(|e| CoordinatorError::Unavailable(e.to_string()))?;
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => Err(CoordinatorError::Fatal(
                "coordinator stopped without a shutdown request".to_string(),
            )),
        }
    }
}

impl From<CallFailure> for CoordinatorError {
    fn from(failure: CallFailure) -> Self {
        match failure {
            CallFailure::Timeout => CoordinatorError::Unavailable("timeout".to_string()),
            CallFailure::Unavailable(reason) => CoordinatorError::Unavailable(reason),
        }
    }
}

/// Connect to the configured broker and start the pool.
pub async fn start_pool(
    config: PoolConfig,
    scanner: Arc<dyn Scanner>,
    dataset: Arc<dyn Dataset>,
) -> Result<PoolHandle, CoordinatorError> {
    let db = db::init(&DbConfig::from(&config.broker))
        .await
        .map_err(|e| CoordinatorError::Store(e.to_string()))?;
    start_pool_with_store(config, JobRepository::new(db), scanner, dataset).await
}

/// Start the pool on an already connected job store.
pub async fn start_pool_with_store(
    config: PoolConfig,
    store: JobRepository,
    scanner: Arc<dyn Scanner>,
    dataset: Arc<dyn Dataset>,
) -> Result<PoolHandle, CoordinatorError> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (outcome_tx, outcome_rx) = oneshot::channel();

    let args = CoordinatorArgs {
        config,
        store,
        scanner,
        dataset,
        events: events_tx,
        outcome: outcome_tx,
    };
    let (coordinator, join) = Actor::spawn(None, Coordinator, args)
        .await
        .map_err(|e| CoordinatorError::Spawn(e.to_string()))?;

    let queue = call(&coordinator, |reply| CoordinatorMessage::GetQueue { reply })
        .await
        .map_err(CoordinatorError::from)?;

    Ok(PoolHandle {
        coordinator,
        queue,
        events: events_rx,
        outcome: outcome_rx,
        join,
    })
}
