//! Worker pool supervisor: owns every worker actor and runs housekeeping.

use std::collections::HashMap;
use std::sync::Arc;

use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};

use crate::handler::JobHandlerRegistry;
use crate::manager::{QueueError, QueueManager};
use crate::messages::{PoolMessage, WorkerInfo, WorkerMessage};
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// A worker the pool is responsible for.
struct WorkerSlot {
    worker_id: String,
    queue_name: String,
    restarts: u32,
    actor: ActorRef<WorkerMessage>,
}

/// State for the pool supervisor.
pub struct WorkerPoolState {
    manager: Arc<QueueManager>,
    /// Handlers per running queue, kept for restarts.
    queues: HashMap<String, Arc<JobHandlerRegistry>>,
    workers: HashMap<ActorId, WorkerSlot>,
    /// Worker counter for unique IDs.
    worker_counter: u64,
    /// Set by `Shutdown`; the pool stops once its last worker has.
    shutting_down: bool,
}

impl WorkerPoolState {
    fn new(manager: Arc<QueueManager>) -> Self {
        Self {
            manager,
            queues: HashMap::new(),
            workers: HashMap::new(),
            worker_counter: 0,
            shutting_down: false,
        }
    }

    fn next_worker_id(&mut self, queue_name: &str) -> String {
        self.worker_counter += 1;
        format!("{}-worker-{}", queue_name, self.worker_counter)
    }

    fn worker_infos(&self) -> Vec<WorkerInfo> {
        let mut infos: Vec<WorkerInfo> = self
            .workers
            .values()
            .map(|slot| WorkerInfo {
                worker_id: slot.worker_id.clone(),
                queue_name: slot.queue_name.clone(),
                restarts: slot.restarts,
            })
            .collect();
        infos.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        infos
    }
}

async fn spawn_worker(
    myself: &ActorRef<PoolMessage>,
    state: &mut WorkerPoolState,
    worker_id: String,
    queue_name: String,
    restarts: u32,
) -> Result<(), ActorProcessingErr> {
    let Some(handlers) = state.queues.get(&queue_name).cloned() else {
        return Err(ActorProcessingErr::from(format!(
            "Queue {} is not running",
            queue_name
        )));
    };
    let args = WorkerArgs {
        worker_id: worker_id.clone(),
        queue_name: queue_name.clone(),
        manager: state.manager.clone(),
        handlers,
    };

    let (actor, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    state.workers.insert(
        actor.get_id(),
        WorkerSlot {
            worker_id,
            queue_name,
            restarts,
            actor,
        },
    );
    Ok(())
}

/// Supervisor actor that manages worker actors for any number of queues.
pub struct WorkerPool;

impl Actor for WorkerPool {
    type Msg = PoolMessage;
    type State = WorkerPoolState;
    type Arguments = Arc<QueueManager>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        manager: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker pool");
        manager.initialize().await?;

        // Start periodic tick
        let interval = manager.config().housekeeping_interval();
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                interval.tick().await;
                if myself_clone.send_message(PoolMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(WorkerPoolState::new(manager))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PoolMessage::StartQueue {
                queue_name,
                concurrency,
                handlers,
                reply,
            } => {
                if state.shutting_down {
                    let _ = reply.send(Err("Worker pool is shutting down".to_string()));
                    return Ok(());
                }
                if state.queues.contains_key(&queue_name) {
                    let _ = reply.send(Err(format!("Queue '{}' already has workers", queue_name)));
                    return Ok(());
                }
                state.queues.insert(queue_name.clone(), Arc::new(handlers));

                let mut started = Vec::new();
                for _ in 0..concurrency.max(1) {
                    let worker_id = state.next_worker_id(&queue_name);
                    if let Err(e) =
                        spawn_worker(&myself, state, worker_id.clone(), queue_name.clone(), 0).await
                    {
                        tracing::error!("{}", e);
                        continue;
                    }
                    started.push(worker_id);
                }

                tracing::info!("Started {} workers on {}", started.len(), queue_name);
                let _ = reply.send(Ok(started));
            }

            PoolMessage::StopQueue { queue_name, reply } => {
                let stopped = state.queues.remove(&queue_name).is_some();
                for slot in state.workers.values().filter(|s| s.queue_name == queue_name) {
                    slot.actor.stop(None);
                }
                if stopped {
                    tracing::info!("Stopping workers on {}", queue_name);
                }
                let _ = reply.send(stopped);
            }

            PoolMessage::ListWorkers { reply } => {
                let _ = reply.send(state.worker_infos());
            }

            PoolMessage::Tick => {
                let manager = &state.manager;
                if let Err(e) = manager.expire_overdue_jobs().await {
                    tracing::warn!("Failed to expire overdue jobs: {}", e);
                }
                if let Err(e) = manager.cleanup_expired_metrics().await {
                    tracing::warn!("Failed to sweep metrics: {}", e);
                }
                let retention = manager.config().completed_retention_hours;
                if let Err(e) = manager.clean_completed_jobs(retention).await {
                    tracing::warn!("Failed to purge finished jobs: {}", e);
                }
            }

            PoolMessage::Shutdown => {
                tracing::info!(
                    "Shutting down worker pool, waiting for {} workers",
                    state.workers.len()
                );
                state.shutting_down = true;
                state.queues.clear();
                for slot in state.workers.values() {
                    slot.actor.stop(None);
                }
                if state.workers.is_empty() {
                    myself.stop(None);
                }
            }
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
            SupervisionEvent::ActorTerminated(cell, _, _) => {
                if let Some(slot) = state.workers.remove(&cell.get_id()) {
                    tracing::debug!("Worker {} stopped", slot.worker_id);
                }
            }
            SupervisionEvent::ActorFailed(cell, err) => {
                let Some(slot) = state.workers.remove(&cell.get_id()) else {
                    return Ok(());
                };
                tracing::warn!("Worker {} failed: {}", slot.worker_id, err);
                if !state.shutting_down && state.queues.contains_key(&slot.queue_name) {
                    spawn_worker(
                        &myself,
                        state,
                        slot.worker_id,
                        slot.queue_name,
                        slot.restarts + 1,
                    )
                    .await?;
                }
            }
            _ => {}
        }
        if state.shutting_down && state.workers.is_empty() {
            tracing::info!("All workers stopped");
            myself.stop(None);
        }
        Ok(())
    }
}

/// Start a worker pool over `manager`.
pub async fn start_worker_pool(
    manager: Arc<QueueManager>,
) -> Result<(ActorRef<PoolMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    Actor::spawn(None, WorkerPool, manager).await
}

fn call_failed<T>(result: ractor::rpc::CallResult<T>) -> Result<T, QueueError> {
    match result {
        ractor::rpc::CallResult::Success(value) => Ok(value),
        ractor::rpc::CallResult::Timeout => Err(QueueError::Actor("worker pool timed out".into())),
        ractor::rpc::CallResult::SenderError => {
            Err(QueueError::Actor("worker pool dropped the reply".into()))
        }
    }
}

/// Start `concurrency` workers on `queue_name` running `handlers`.
///
/// Returns the new worker ids.
pub async fn run(
    pool: &ActorRef<PoolMessage>,
    queue_name: &str,
    concurrency: u32,
    handlers: JobHandlerRegistry,
) -> Result<Vec<String>, QueueError> {
    let queue_name = queue_name.to_string();
    let result = ractor::rpc::call(
        pool,
        |reply| PoolMessage::StartQueue {
            queue_name,
            concurrency,
            handlers,
            reply,
        },
        None,
    )
    .await
    .map_err(|e| QueueError::Actor(e.to_string()))?;
    call_failed(result)?.map_err(QueueError::Actor)
}

pub async fn list_workers(pool: &ActorRef<PoolMessage>) -> Result<Vec<WorkerInfo>, QueueError> {
    let result = ractor::rpc::call(pool, |reply| PoolMessage::ListWorkers { reply }, None)
        .await
        .map_err(|e| QueueError::Actor(e.to_string()))?;
    call_failed(result)
}

pub async fn stop_queue(pool: &ActorRef<PoolMessage>, queue_name: &str) -> Result<bool, QueueError> {
    let queue_name = queue_name.to_string();
    let result = ractor::rpc::call(
        pool,
        |reply| PoolMessage::StopQueue { queue_name, reply },
        None,
    )
    .await
    .map_err(|e| QueueError::Actor(e.to_string()))?;
    call_failed(result)
}
