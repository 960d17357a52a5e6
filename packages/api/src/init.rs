//! Server initialization for the job queue system.

use std::sync::Arc;

use actors::{
    ActorRef, JobHandlerRegistry, PoolMessage, QueueError, QueueManager, WorkerInfo, list_workers,
    run, start_worker_pool,
};
use billing::CreditsLedger;
use db::{Database, DbError, SurrealJobStore, SurrealMetricStore};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::Settings;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("worker pool error: {0}")]
    Pool(String),
}

/// A running queue system: database session, queue manager and worker pool.
pub struct JobQueueSystem {
    manager: Arc<QueueManager>,
    pool: ActorRef<PoolMessage>,
    pool_handle: JoinHandle<()>,
    db: Database,
}

impl JobQueueSystem {
    pub fn manager(&self) -> &Arc<QueueManager> {
        &self.manager
    }

    pub fn pool(&self) -> &ActorRef<PoolMessage> {
        &self.pool
    }

    /// Start `concurrency` workers on another queue.
    pub async fn start_queue(
        &self,
        queue_name: &str,
        concurrency: u32,
        handlers: JobHandlerRegistry,
    ) -> Result<Vec<String>, InitError> {
        Ok(run(&self.pool, queue_name, concurrency, handlers).await?)
    }

    pub async fn workers(&self) -> Result<Vec<WorkerInfo>, InitError> {
        Ok(list_workers(&self.pool).await?)
    }

    /// Stop the pool, wait for it to exit, then close the database session.
    ///
    /// Workers stop claiming at once. The pool exits after every running job
    /// has finished and its outcome is stored.
    pub async fn shutdown(self) -> Result<(), InitError> {
        tracing::info!("Shutting down job queue system");
        self.pool
            .send_message(PoolMessage::Shutdown)
            .map_err(|e| InitError::Pool(e.to_string()))?;
        self.pool_handle
            .await
            .map_err(|e| InitError::Pool(e.to_string()))?;
        self.db.close().await?;
        Ok(())
    }
}

/// Initialize the job queue system.
///
/// Connects to the database and aborts if it is unreachable, then builds the
/// queue manager from `settings` and starts `settings.queue.concurrency`
/// workers on the default queue. Call once at startup.
pub async fn init_job_queue(
    settings: &Settings,
    ledger: Arc<dyn CreditsLedger>,
    handlers: JobHandlerRegistry,
) -> Result<JobQueueSystem, InitError> {
    tracing::info!("Initializing job queue system...");

    let db = db::init(&settings.database).await?;

    let manager = QueueManager::new(
        Arc::new(SurrealJobStore::new(db.clone())),
        Arc::new(SurrealMetricStore::new(db.clone())),
        ledger,
        Arc::new(settings.surge.clone()),
    )
    .with_config(settings.queue.clone())
    .with_admission_config(settings.admission.clone())
    .with_retry_strategy(Arc::new(settings.retry_strategy()))
    .with_metric_retention(settings.metric_retention());
    let manager = Arc::new(manager);
    manager.initialize().await?;

    let (pool, pool_handle) = start_worker_pool(manager.clone())
        .await
        .map_err(|e| InitError::Pool(e.to_string()))?;

    let queue = &settings.queue;
    let workers = run(&pool, &queue.queue_name, queue.concurrency, handlers).await?;
    tracing::info!(
        "Job queue system initialized: {} workers on {}",
        workers.len(),
        queue.queue_name
    );

    Ok(JobQueueSystem {
        manager,
        pool,
        pool_handle,
        db,
    })
}
