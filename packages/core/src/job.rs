//! Job domain types for work items in the queue.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::clock::saturating_after;
use crate::credits::{Credits, OperationType, TenantId};
use crate::error::JobError;
use crate::priority::Priority;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// WAITING -> ACTIVE -> COMPLETED | FAILED
/// WAITING | ACTIVE -> CANCELLED
/// ACTIVE -> WAITING        (automatic retry after backoff)
/// FAILED -> WAITING        (explicit bounded retry)
/// WAITING | ACTIVE -> FAILED(EXPIRED) once past expire_at
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Waiting,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
        JobState::Cancelled,
    ];

    pub const TERMINAL: [JobState; 3] = [JobState::Completed, JobState::Failed, JobState::Cancelled];

    /// Check if the job is in a terminal state.
    ///
    /// A failed job may still be moved back to waiting by an explicit retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for JobState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// Result of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Human-readable summary of the result.
    pub summary: String,
    /// Optional structured output data as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl JobResult {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            output: None,
        }
    }

    pub fn with_output(summary: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            summary: summary.into(),
            output: Some(output),
        }
    }
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TTL_HOURS: i64 = 1;

/// A job represents a unit of billable work admitted into a queue.
///
/// Priority, reserved cost and multiplier are fixed at admission and never
/// change afterwards. Billing at completion uses `reserved_cost` as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// The queue this job belongs to.
    pub queue_name: String,
    /// Tenant debited when the job completes.
    pub tenant_id: TenantId,
    /// Operation performed, used to route to a handler.
    pub operation: OperationType,
    /// Job payload as JSON.
    pub payload: serde_json::Value,
    /// Tier the caller asked for.
    pub priority: Priority,
    /// Effective score after surge escalation.
    pub priority_score: i32,
    /// Current state.
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Set on every terminal transition.
    pub completed_at: Option<DateTime<Utc>>,
    /// Earliest time a waiting job may be claimed. Moves forward on retry backoff.
    pub available_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Cost reserved at admission.
    pub reserved_cost: Credits,
    /// Pricing multiplier in effect at admission.
    pub multiplier: f64,
    /// Amount actually debited, once billing succeeded.
    pub charged_cost: Option<Credits>,
    /// Worker currently or last holding the job.
    pub worker_id: Option<String>,
    pub error: Option<JobError>,
    pub result: Option<JobResult>,
}

impl Job {
    /// Create a new waiting job with default priority, retry limit and TTL.
    pub fn new(
        queue_name: impl Into<String>,
        tenant_id: TenantId,
        operation: OperationType,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            queue_name: queue_name.into(),
            tenant_id,
            operation,
            payload,
            priority: Priority::Normal,
            priority_score: Priority::Normal.score(),
            state: JobState::Waiting,
            created_at: now,
            started_at: None,
            completed_at: None,
            available_at: now,
            expire_at: now + Duration::hours(DEFAULT_TTL_HOURS),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            reserved_cost: Credits::ZERO,
            multiplier: 1.0,
            charged_cost: None,
            worker_id: None,
            error: None,
            result: None,
        }
    }

    /// Set the requested tier and the effective score.
    pub fn with_priority(mut self, priority: Priority, priority_score: i32) -> Self {
        self.priority = priority;
        self.priority_score = priority_score;
        self
    }

    /// Record the admission-time cost.
    pub fn with_cost(mut self, reserved_cost: Credits, multiplier: f64) -> Self {
        self.reserved_cost = reserved_cost;
        self.multiplier = multiplier;
        self
    }

    /// Set the max retries for this job.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Expire the job `ttl` after its creation time.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expire_at = saturating_after(self.created_at, ttl);
        self
    }

    /// Move the creation time, keeping availability and TTL relative to it.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        let ttl = self.expire_at - self.created_at;
        self.created_at = created_at;
        self.available_at = created_at;
        self.expire_at = saturating_after(created_at, ttl);
        self
    }

    /// Keep the job unclaimable until the store releases it.
    pub fn held(mut self) -> Self {
        self.available_at = self.expire_at;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }

    /// Whether a worker may claim this job at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Waiting && self.available_at <= now && !self.is_expired(now)
    }

    /// Whether another retry is allowed.
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Time spent between claim and the terminal transition.
    pub fn processing_time(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }
}

/// Read-only view of a job returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub queue_name: String,
    pub tenant_id: TenantId,
    pub operation: OperationType,
    pub state: JobState,
    pub priority: Priority,
    pub priority_score: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub reserved_cost: Credits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charged_cost: Option<Credits>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub expire_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

impl From<&Job> for JobStatus {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            queue_name: job.queue_name.clone(),
            tenant_id: job.tenant_id.clone(),
            operation: job.operation,
            state: job.state,
            priority: job.priority,
            priority_score: job.priority_score,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            reserved_cost: job.reserved_cost,
            charged_cost: job.charged_cost,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            expire_at: job.expire_at,
            error: job.error.clone(),
            result: job.result.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            "ocr-processing",
            TenantId::new("tenant-a"),
            OperationType::Ocr,
            serde_json::json!({"document_id": "doc-1"}),
        )
    }

    #[test]
    fn new_job_waits_with_defaults() {
        let job = job();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(job.expire_at - job.created_at, Duration::hours(DEFAULT_TTL_HOURS));
        assert!(job.is_claimable(job.created_at));
    }

    #[test]
    fn expired_or_backed_off_jobs_are_not_claimable() {
        let job = job();
        assert!(!job.is_claimable(job.expire_at));

        let mut delayed = job.clone();
        delayed.available_at = job.created_at + Duration::seconds(30);
        assert!(!delayed.is_claimable(job.created_at + Duration::seconds(10)));
        assert!(delayed.is_claimable(job.created_at + Duration::seconds(30)));
    }

    #[test]
    fn held_jobs_are_never_claimable_and_huge_ttls_saturate() {
        let held = job().held();
        assert!(!held.is_claimable(held.created_at));
        assert!(!held.is_claimable(held.expire_at));

        let forever = job().with_ttl(Duration::MAX);
        assert_eq!(forever.expire_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn with_created_at_keeps_ttl() {
        let at = Utc::now() - Duration::hours(5);
        let job = job().with_ttl(Duration::hours(2)).with_created_at(at);
        assert_eq!(job.created_at, at);
        assert_eq!(job.expire_at, at + Duration::hours(2));
        assert!(job.is_expired(Utc::now()));
    }

    #[test]
    fn state_strings_round_trip() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Active.is_terminal());
    }
}
