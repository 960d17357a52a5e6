//! Server API for the job queue system.
//!
//! This crate contains the transport-agnostic surface:
//! - Settings loaded from the environment
//! - Bootstrap of the database, queue manager and worker pool
//! - Job operations (enqueue, status, cancel, retry, stats, metrics)
//! - Real-time events (SSE formatting)

mod config;
mod init;
mod jobs;
mod realtime;

pub use config::{ConfigError, Settings};
pub use init::{InitError, JobQueueSystem, init_job_queue};
pub use jobs::*;
pub use realtime::*;

// Re-export core types for convenience
pub use queue_core::{
    Credits, Job, JobEvent, JobId, JobState, JobStatus, OperationType, Priority, QueueStats,
    TenantId,
};
