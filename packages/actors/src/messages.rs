//! Message types for actor communication.

use ractor::RpcReplyPort;
use serde::{Deserialize, Serialize};

use crate::handler::JobHandlerRegistry;

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Try to claim and run the next job.
    Poll,
}

/// Messages for the WorkerPool supervisor.
#[derive(Debug)]
pub enum PoolMessage {
    /// Start `concurrency` workers on a queue.
    StartQueue {
        queue_name: String,
        concurrency: u32,
        handlers: JobHandlerRegistry,
        reply: RpcReplyPort<Result<Vec<String>, String>>,
    },

    /// Stop every worker of a queue. Replies `false` if none were running.
    StopQueue {
        queue_name: String,
        reply: RpcReplyPort<bool>,
    },

    /// List running workers.
    ListWorkers { reply: RpcReplyPort<Vec<WorkerInfo>> },

    /// Periodic housekeeping.
    Tick,

    /// Stop all workers and the pool.
    Shutdown,
}

/// A running worker as reported by the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub queue_name: String,
    /// Times this worker slot was restarted after a crash.
    pub restarts: u32,
}
