//! Event types for real-time updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credits::{Credits, TenantId};
use crate::error::FailureCode;
use crate::job::JobId;

/// Events emitted by the job queue system for real-time updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A job passed admission and was stored.
    JobEnqueued {
        job_id: JobId,
        queue_name: String,
        tenant_id: TenantId,
        priority_score: i32,
        reserved_cost: Credits,
        timestamp: DateTime<Utc>,
    },
    /// Admission refused a submission.
    JobRejected {
        tenant_id: TenantId,
        code: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker claimed a job.
    JobStarted {
        job_id: JobId,
        queue_name: String,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A job completed and billing ran.
    JobCompleted {
        job_id: JobId,
        queue_name: String,
        duration_ms: u64,
        charged: Option<Credits>,
        timestamp: DateTime<Utc>,
    },
    /// A job failed permanently.
    JobFailed {
        job_id: JobId,
        queue_name: String,
        code: FailureCode,
        error: String,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },
    /// A job went back to waiting after a failure.
    JobRetrying {
        job_id: JobId,
        queue_name: String,
        attempt: u32,
        available_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    /// A job was cancelled.
    JobCancelled {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// Overdue jobs were failed as expired.
    JobsExpired { count: u64, timestamp: DateTime<Utc> },
    /// Old terminal jobs were purged.
    JobsCleaned { count: u64, timestamp: DateTime<Utc> },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobEnqueued { timestamp, .. }
            | JobEvent::JobRejected { timestamp, .. }
            | JobEvent::JobStarted { timestamp, .. }
            | JobEvent::JobCompleted { timestamp, .. }
            | JobEvent::JobFailed { timestamp, .. }
            | JobEvent::JobRetrying { timestamp, .. }
            | JobEvent::JobCancelled { timestamp, .. }
            | JobEvent::JobsExpired { timestamp, .. }
            | JobEvent::JobsCleaned { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobEnqueued { job_id, .. }
            | JobEvent::JobStarted { job_id, .. }
            | JobEvent::JobCompleted { job_id, .. }
            | JobEvent::JobFailed { job_id, .. }
            | JobEvent::JobRetrying { job_id, .. }
            | JobEvent::JobCancelled { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobEnqueued {
                job_id,
                queue_name,
                reserved_cost,
                ..
            } => format!("Job {job_id} enqueued on {queue_name} ({reserved_cost} credits)"),
            JobEvent::JobRejected {
                tenant_id, reason, ..
            } => format!("Submission from {tenant_id} rejected: {reason}"),
            JobEvent::JobStarted {
                job_id, worker_id, ..
            } => format!("Job {job_id} started by {worker_id}"),
            JobEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => format!("Job {job_id} completed in {duration_ms}ms"),
            JobEvent::JobFailed {
                job_id, code, error, ..
            } => format!("Job {job_id} failed ({code}): {error}"),
            JobEvent::JobRetrying {
                job_id, attempt, ..
            } => format!("Job {job_id} retrying (attempt {attempt})"),
            JobEvent::JobCancelled { job_id, .. } => format!("Job {job_id} cancelled"),
            JobEvent::JobsExpired { count, .. } => format!("{count} jobs expired"),
            JobEvent::JobsCleaned { count, .. } => format!("{count} finished jobs removed"),
        }
    }
}
