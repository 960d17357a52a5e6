//! Worker actor for executing jobs.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::FutureExt;
use queue_core::{FailureCode, Job, ProcessingError};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tracing::Instrument;

use crate::handler::JobHandlerRegistry;
use crate::manager::QueueManager;
use crate::messages::WorkerMessage;

/// State for the worker actor.
pub struct WorkerActorState {
    pub worker_id: String,
    pub queue_name: String,
    pub manager: Arc<QueueManager>,
    pub handlers: Arc<JobHandlerRegistry>,
    /// Set while a `Poll` sits in the mailbox, so at most one is queued.
    pub poll_pending: Arc<AtomicBool>,
    /// Jobs this worker has finished, successfully or not.
    pub processed: u64,
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub queue_name: String,
    pub manager: Arc<QueueManager>,
    pub handlers: Arc<JobHandlerRegistry>,
}

/// Worker actor that claims jobs from one queue and runs them.
///
/// An idle worker polls at the queue's poll interval. After finishing a job it
/// polls again at once, so a backlog drains without waiting for the timer.
/// Stopping the actor lets the running job finish and drops queued polls.
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
        tracing::info!("Starting worker {} on {}", args.worker_id, args.queue_name);

        // Start the work loop
        let interval = args.manager.config().poll_interval();
        let poll_pending = Arc::new(AtomicBool::new(false));
        let myself_clone = myself.clone();
        let pending = poll_pending.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !request_poll(&myself_clone, &pending) {
                    break;
                }
            }
        });

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            queue_name: args.queue_name,
            manager: args.manager,
            handlers: args.handlers,
            poll_pending,
            processed: 0,
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
                state.poll_pending.store(false, Ordering::SeqCst);

                match state
                    .manager
                    .claim_next(&state.queue_name, &state.worker_id)
                    .await
                {
                    Ok(Some(job)) => {
                        run_job(state, job).await;
                        state.processed += 1;
                        request_poll(&myself, &state.poll_pending);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(
                            worker_id = %state.worker_id,
                            queue = %state.queue_name,
                            "Failed to claim job: {}",
                            e
                        );
                    }
                }
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            "Worker {} stopped after {} jobs",
            state.worker_id,
            state.processed
        );
        Ok(())
    }
}

/// Queue a `Poll` unless one is already waiting.
///
/// Returns false once the actor is gone.
fn request_poll(worker: &ActorRef<WorkerMessage>, pending: &AtomicBool) -> bool {
    if pending.swap(true, Ordering::SeqCst) {
        return true;
    }
    worker.send_message(WorkerMessage::Poll).is_ok()
}

/// Run one claimed job and report the outcome to the manager.
///
/// Handler errors, panics and timeouts all become job outcomes; none of them
/// stop the worker.
async fn run_job(state: &WorkerActorState, job: Job) {
    let span = tracing::info_span!(
        "job",
        job_id = %job.id,
        queue = %job.queue_name,
        tenant = %job.tenant_id,
        worker_id = %state.worker_id,
    );

    async {
        let job_id = job.id;
        let timeout = state.manager.config().job_timeout();
        let handlers = state.handlers.clone();
        let execution = AssertUnwindSafe(async move { handlers.dispatch(&job).await }).catch_unwind();

        let report = match tokio::time::timeout(timeout, execution).await {
            Ok(Ok(Ok(result))) => state
                .manager
                .on_job_completed(job_id, result)
                .await
                .map(|outcome| tracing::debug!("Completion recorded: {:?}", outcome)),
            Ok(Ok(Err(error))) => state
                .manager
                .on_job_failed(job_id, error)
                .await
                .map(|outcome| tracing::debug!("Failure recorded: {:?}", outcome)),
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Handler panicked: {}", message);
                state
                    .manager
                    .on_job_failed(
                        job_id,
                        ProcessingError::fatal(FailureCode::HandlerPanic, message),
                    )
                    .await
                    .map(|_| ())
            }
            Err(_) => state
                .manager
                .on_job_failed(
                    job_id,
                    ProcessingError::retryable(format!(
                        "timed out after {}s",
                        timeout.as_secs()
                    )),
                )
                .await
                .map(|_| ()),
        };

        if let Err(e) = report {
            tracing::error!("Failed to record job outcome: {}", e);
        }
    }
    .instrument(span)
    .await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
