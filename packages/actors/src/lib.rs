//! Queue management and the actor system that runs jobs.
//!
//! # Architecture
//!
//! - `QueueManager` - Admission, state transitions, billing and metrics over a `JobStore`
//! - `WorkerPool` - Supervisor actor that owns workers and runs housekeeping
//! - `WorkerActor` - Claims jobs from one queue and runs their handler
//!
//! # Usage
//!
//! ```ignore
//! use actors::{JobHandlerRegistry, QueueManager, run, start_worker_pool};
//!
//! let manager = Arc::new(QueueManager::new(jobs, metrics, ledger, pricing));
//! let (pool, handle) = start_worker_pool(manager.clone()).await?;
//! run(&pool, "ocr-processing", 4, handlers).await?;
//! ```

mod handler;
mod manager;
mod messages;
mod metrics;
mod supervisor;
mod worker_actor;

pub use handler::{FnHandler, HandlerFuture, HandlerResult, JobHandler, JobHandlerRegistry};
pub use manager::{
    CompletionOutcome, EnqueueOutcome, FailureOutcome, JobRequest, QueueError, QueueManager,
};
pub use messages::{PoolMessage, WorkerInfo, WorkerMessage};
pub use metrics::MetricsCollector;
pub use supervisor::{WorkerPool, list_workers, run, start_worker_pool, stop_queue};
pub use worker_actor::WorkerActor;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
