//! Storage contracts shared by the SurrealDB and in-memory backends.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use queue_core::{
    Credits, Job, JobError, JobId, JobResult, MetricSample, MetricType, Priority, QueueStats,
};

use crate::DbError;

/// A job eligible for claiming, in claim order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimCandidate {
    pub id: JobId,
    pub priority_score: i32,
}

/// Durable job table with atomic state transitions.
///
/// Every transition method is a conditional update on the job's current state
/// and returns `true` only when this call performed the change. Concurrent
/// callers racing on the same job see exactly one `true`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Prepare tables and indexes. Safe to call more than once.
    async fn init(&self) -> Result<(), DbError>;

    async fn insert(&self, job: &Job) -> Result<(), DbError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, DbError>;

    /// Waiting jobs of `queue` that are available and unexpired at `now`,
    /// ordered by priority score (desc) then creation time (asc).
    async fn claimable(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ClaimCandidate>, DbError>;

    /// Make a WAITING job claimable from `now`.
    ///
    /// Jobs are inserted unavailable and released once their enqueue has been
    /// announced. Returns `false` if the job is no longer WAITING.
    async fn release(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, DbError>;

    /// WAITING -> ACTIVE, only if the job is still claimable at `now`.
    async fn try_claim(&self, id: JobId, worker_id: &str, now: DateTime<Utc>)
    -> Result<bool, DbError>;

    /// ACTIVE -> COMPLETED. This is the gate checked before billing.
    async fn complete(
        &self,
        id: JobId,
        result: &JobResult,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError>;

    /// Record the amount debited for a completed job.
    async fn record_charge(&self, id: JobId, amount: Credits) -> Result<(), DbError>;

    /// ACTIVE -> FAILED with `error`. `retry_count` is left unchanged.
    async fn fail(&self, id: JobId, error: &JobError, now: DateTime<Utc>) -> Result<bool, DbError>;

    /// ACTIVE -> WAITING with `retry_count + 1`, claimable again at `available_at`.
    ///
    /// Only applies while `retry_count == expected_retry_count`.
    async fn schedule_retry(
        &self,
        id: JobId,
        expected_retry_count: u32,
        available_at: DateTime<Utc>,
    ) -> Result<bool, DbError>;

    /// WAITING | ACTIVE -> CANCELLED.
    async fn cancel(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, DbError>;

    /// FAILED -> WAITING with `retry_count + 1` and a fresh expiry.
    ///
    /// Only applies while `retry_count == expected_retry_count` and the job has
    /// retries left.
    async fn requeue_failed(
        &self,
        id: JobId,
        expected_retry_count: u32,
        expire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError>;

    /// Fail every WAITING or ACTIVE job whose expiry is at or before `now`.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, DbError>;

    /// ACTIVE jobs of `queue`.
    async fn count_active(&self, queue: &str) -> Result<u64, DbError>;

    /// Job counts by state for every queue.
    async fn count_by_queue(&self) -> Result<BTreeMap<String, QueueStats>, DbError>;

    /// Waiting jobs grouped by effective tier.
    async fn waiting_by_priority(
        &self,
        queue: Option<&str>,
    ) -> Result<BTreeMap<Priority, u64>, DbError>;

    /// Delete COMPLETED, FAILED and CANCELLED jobs finished before `cutoff`.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DbError>;

    /// Job counts by state for one queue or all of them.
    async fn count_by_state(&self, queue: Option<&str>) -> Result<QueueStats, DbError> {
        let by_queue = self.count_by_queue().await?;
        let mut totals = QueueStats::default();
        for (name, stats) in by_queue {
            if queue.is_some_and(|q| q != name) {
                continue;
            }
            totals.waiting += stats.waiting;
            totals.active += stats.active;
            totals.completed += stats.completed;
            totals.failed += stats.failed;
            totals.cancelled += stats.cancelled;
        }
        Ok(totals)
    }
}

/// TTL-bounded metric samples.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Prepare tables and indexes. Safe to call more than once.
    async fn init(&self) -> Result<(), DbError>;

    async fn insert(&self, sample: &MetricSample) -> Result<(), DbError>;

    /// Unexpired samples of `metric_type` taken at or after `since`, newest first.
    async fn query(
        &self,
        metric_type: MetricType,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MetricSample>, DbError>;

    /// Delete samples whose expiry is at or before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DbError>;
}
