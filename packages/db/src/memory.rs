//! In-memory stores for tests and single-process runs.
//!
//! A write lock around the whole table makes each conditional transition
//! atomic, which is the same guarantee the SurrealDB backend gets from a
//! conditional `UPDATE`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use queue_core::{
    Credits, Job, JobError, JobId, JobResult, JobState, MetricSample, MetricType, Priority,
    QueueStats,
};

use crate::store::{ClaimCandidate, JobStore, MetricStore};
use crate::DbError;

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Apply `change` if `guard` accepts the job's current value.
    async fn transition(
        &self,
        id: JobId,
        guard: impl FnOnce(&Job) -> bool + Send,
        change: impl FnOnce(&mut Job) + Send,
    ) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if guard(job) => {
                change(job);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn init(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn insert(&self, job: &Job) -> Result<(), DbError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(DbError::Duplicate(format!("job {}", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, DbError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn claimable(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ClaimCandidate>, DbError> {
        let jobs = self.jobs.read().await;
        let mut candidates: Vec<&Job> = jobs
            .values()
            .filter(|job| job.queue_name == queue && job.is_claimable(now))
            .collect();
        candidates.sort_by(|a, b| {
            b.priority_score
                .cmp(&a.priority_score)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(candidates
            .into_iter()
            .take(limit)
            .map(|job| ClaimCandidate {
                id: job.id,
                priority_score: job.priority_score,
            })
            .collect())
    }

    async fn release(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, DbError> {
        Ok(self
            .transition(
                id,
                |job| job.state == JobState::Waiting,
                |job| job.available_at = now,
            )
            .await)
    }

    async fn try_claim(
        &self,
        id: JobId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let worker_id = worker_id.to_string();
        Ok(self
            .transition(
                id,
                |job| job.is_claimable(now),
                |job| {
                    job.state = JobState::Active;
                    job.started_at = Some(now);
                    job.worker_id = Some(worker_id);
                },
            )
            .await)
    }

    async fn complete(
        &self,
        id: JobId,
        result: &JobResult,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let result = result.clone();
        Ok(self
            .transition(
                id,
                |job| job.state == JobState::Active,
                |job| {
                    job.state = JobState::Completed;
                    job.completed_at = Some(now);
                    job.result = Some(result);
                },
            )
            .await)
    }

    async fn record_charge(&self, id: JobId, amount: Credits) -> Result<(), DbError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("job {id}")))?;
        job.charged_cost = Some(amount);
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &JobError, now: DateTime<Utc>) -> Result<bool, DbError> {
        let error = error.clone();
        Ok(self
            .transition(
                id,
                |job| job.state == JobState::Active,
                |job| {
                    job.state = JobState::Failed;
                    job.completed_at = Some(now);
                    job.error = Some(error);
                },
            )
            .await)
    }

    async fn schedule_retry(
        &self,
        id: JobId,
        expected_retry_count: u32,
        available_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        Ok(self
            .transition(
                id,
                |job| job.state == JobState::Active && job.retry_count == expected_retry_count,
                |job| {
                    job.state = JobState::Waiting;
                    job.retry_count += 1;
                    job.available_at = available_at;
                    job.started_at = None;
                    job.worker_id = None;
                },
            )
            .await)
    }

    async fn cancel(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, DbError> {
        Ok(self
            .transition(
                id,
                |job| matches!(job.state, JobState::Waiting | JobState::Active),
                |job| {
                    job.state = JobState::Cancelled;
                    job.completed_at = Some(now);
                },
            )
            .await)
    }

    async fn requeue_failed(
        &self,
        id: JobId,
        expected_retry_count: u32,
        expire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        Ok(self
            .transition(
                id,
                |job| {
                    job.state == JobState::Failed
                        && job.retry_count == expected_retry_count
                        && job.has_retries_left()
                },
                |job| {
                    job.state = JobState::Waiting;
                    job.retry_count += 1;
                    job.available_at = now;
                    job.expire_at = expire_at;
                    job.started_at = None;
                    job.completed_at = None;
                    job.worker_id = None;
                    job.error = None;
                    job.result = None;
                },
            )
            .await)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
        let mut jobs = self.jobs.write().await;
        let mut expired = 0;
        for job in jobs.values_mut() {
            if matches!(job.state, JobState::Waiting | JobState::Active) && job.is_expired(now) {
                job.state = JobState::Failed;
                job.completed_at = Some(now);
                job.error = Some(JobError::expired());
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn count_active(&self, queue: &str) -> Result<u64, DbError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|job| job.queue_name == queue && job.state == JobState::Active)
            .count() as u64)
    }

    async fn count_by_queue(&self) -> Result<BTreeMap<String, QueueStats>, DbError> {
        let jobs = self.jobs.read().await;
        let mut by_queue: BTreeMap<String, QueueStats> = BTreeMap::new();
        for job in jobs.values() {
            by_queue
                .entry(job.queue_name.clone())
                .or_default()
                .add(job.state, 1);
        }
        Ok(by_queue)
    }

    async fn waiting_by_priority(
        &self,
        queue: Option<&str>,
    ) -> Result<BTreeMap<Priority, u64>, DbError> {
        let jobs = self.jobs.read().await;
        let mut counts = BTreeMap::new();
        for job in jobs.values() {
            if job.state != JobState::Waiting || queue.is_some_and(|q| q != job.queue_name) {
                continue;
            }
            *counts.entry(Priority::from_score(job.priority_score)).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.state.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - jobs.len()) as u64)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMetricStore {
    samples: RwLock<Vec<MetricSample>>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn len(&self) -> usize {
        self.samples.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.samples.read().await.is_empty()
    }
}

#[async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn init(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn insert(&self, sample: &MetricSample) -> Result<(), DbError> {
        self.samples.write().await.push(sample.clone());
        Ok(())
    }

    async fn query(
        &self,
        metric_type: MetricType,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MetricSample>, DbError> {
        let samples = self.samples.read().await;
        let mut matching: Vec<MetricSample> = samples
            .iter()
            .filter(|s| s.metric_type == metric_type && s.timestamp >= since && !s.is_expired(now))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
        let mut samples = self.samples.write().await;
        let before = samples.len();
        samples.retain(|s| !s.is_expired(now));
        Ok((before - samples.len()) as u64)
    }
}
