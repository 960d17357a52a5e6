//! Queue manager: the façade over admission, the job store, billing and metrics.
//!
//! Every worker shares one `Arc<QueueManager>`. The manager holds no mutable
//! job state of its own; all coordination goes through the store's conditional
//! transitions, so several managers over the same store behave like one.

use std::sync::Arc;

use billing::{
    AdmissionConfig, AdmissionController, AdmissionDecision, AdmissionError, CreditsLedger,
    LedgerError, PricingOracle,
};
use chrono::Utc;
use db::{DbError, JobStore, MetricStore};
use queue_core::{
    Credits, DetailedQueueStats, ExponentialBackoff, FailureCode, Job, JobError, JobEvent, JobId,
    JobResult, JobState, JobStatus, MetricType, OperationType, PerformanceMetrics, Priority,
    ProcessingError, QueueConfig, QueueStats, RetryStrategy, TenantId, clock,
};
use serde_json::json;
use tokio::sync::{OnceCell, broadcast};

use crate::metrics::MetricsCollector;

/// Candidates fetched per claim attempt.
const CLAIM_BATCH: usize = 16;
/// Re-reads allowed when every candidate of the best tier was taken by others.
const CLAIM_ROUNDS: usize = 5;
/// Window used for the performance section of detailed stats.
const STATS_WINDOW_HOURS: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Actor error: {0}")]
    Actor(String),
}

/// A submission before admission.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub tenant_id: TenantId,
    pub operation: OperationType,
    pub payload: serde_json::Value,
    pub priority: Priority,
    /// Queue to use instead of the configured default.
    pub queue_name: Option<String>,
    /// Retry limit to use instead of the configured default.
    pub max_retries: Option<u32>,
}

impl JobRequest {
    pub fn new(tenant_id: TenantId, operation: OperationType, payload: serde_json::Value) -> Self {
        Self {
            tenant_id,
            operation,
            payload,
            priority: Priority::Normal,
            queue_name: None,
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn on_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Accepted {
        job_id: JobId,
        decision: AdmissionDecision,
    },
    Rejected(AdmissionError),
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            EnqueueOutcome::Accepted { job_id, .. } => Some(*job_id),
            EnqueueOutcome::Rejected(_) => None,
        }
    }
}

/// What happened when a worker reported success.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// The job completed and the tenant was debited.
    Charged {
        amount: Credits,
        new_balance: Credits,
    },
    /// The job was not ACTIVE (already completed, cancelled, expired). Nothing was debited.
    AlreadyFinished { state: JobState },
    /// The job completed but the ledger refused or did not answer. The work is not redone.
    ChargeFailed { reason: String },
    NotFound,
}

/// What happened when a worker reported an error.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    Retrying {
        attempt: u32,
        available_at: chrono::DateTime<Utc>,
    },
    Failed { code: FailureCode },
    /// The job was no longer ACTIVE, or another report won the race.
    Ignored,
}

pub struct QueueManager {
    jobs: Arc<dyn JobStore>,
    metrics: MetricsCollector,
    ledger: Arc<dyn CreditsLedger>,
    pricing: Arc<dyn PricingOracle>,
    admission: AdmissionController,
    retry: Arc<dyn RetryStrategy>,
    config: QueueConfig,
    events: broadcast::Sender<JobEvent>,
    initialized: OnceCell<()>,
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl QueueManager {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        metrics: Arc<dyn MetricStore>,
        ledger: Arc<dyn CreditsLedger>,
        pricing: Arc<dyn PricingOracle>,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        let admission =
            AdmissionController::new(ledger.clone(), pricing.clone(), AdmissionConfig::default());
        Self {
            jobs,
            metrics: MetricsCollector::new(metrics),
            ledger,
            pricing,
            admission,
            retry: Arc::new(ExponentialBackoff::default()),
            config: QueueConfig::default(),
            events,
            initialized: OnceCell::new(),
        }
    }

    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_admission_config(mut self, config: AdmissionConfig) -> Self {
        self.admission = AdmissionController::new(self.ledger.clone(), self.pricing.clone(), config);
        self
    }

    pub fn with_retry_strategy(mut self, retry: Arc<dyn RetryStrategy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metric_retention(mut self, retention: chrono::Duration) -> Self {
        self.metrics = self.metrics.with_retention(retention);
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Prepare the stores. Later calls return immediately.
    pub async fn initialize(&self) -> Result<(), QueueError> {
        self.initialized
            .get_or_try_init(|| async {
                self.jobs.init().await?;
                self.metrics.init().await?;
                tracing::info!("Queue manager initialized for {}", self.config.queue_name);
                Ok::<(), QueueError>(())
            })
            .await?;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn broadcast(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }

    /// Admit and enqueue a job, or say why not.
    pub async fn submit_job(&self, request: JobRequest) -> Result<EnqueueOutcome, QueueError> {
        self.initialize().await?;
        let now = Utc::now();

        let decision = match self
            .admission
            .admit_at(&request.tenant_id, request.operation, request.priority, now)
            .await
        {
            Ok(decision) => decision,
            Err(rejection) => {
                tracing::debug!(
                    tenant = %request.tenant_id,
                    code = rejection.code(),
                    "Submission rejected: {}",
                    rejection
                );
                self.broadcast(JobEvent::JobRejected {
                    tenant_id: request.tenant_id,
                    code: rejection.code().to_string(),
                    reason: rejection.to_string(),
                    timestamp: now,
                });
                return Ok(EnqueueOutcome::Rejected(rejection));
            }
        };

        let queue_name = request
            .queue_name
            .unwrap_or_else(|| self.config.queue_name.clone());
        let job = Job::new(
            queue_name,
            request.tenant_id,
            request.operation,
            request.payload,
        )
        .with_priority(decision.requested_priority, decision.priority_score)
        .with_cost(decision.reserved_cost, decision.multiplier)
        .with_max_retries(
            request
                .max_retries
                .unwrap_or(self.config.default_max_retries),
        )
        .with_created_at(now)
        .with_ttl(self.config.job_ttl())
        .held();

        // Workers cannot see the job until it is released, so its
        // `JobEnqueued` event goes out before any `JobStarted`.
        self.jobs.insert(&job).await?;

        tracing::info!(
            job_id = %job.id,
            queue = %job.queue_name,
            tenant = %job.tenant_id,
            "Job enqueued at score {} for {} credits",
            job.priority_score,
            job.reserved_cost
        );
        self.broadcast(JobEvent::JobEnqueued {
            job_id: job.id,
            queue_name: job.queue_name.clone(),
            tenant_id: job.tenant_id.clone(),
            priority_score: job.priority_score,
            reserved_cost: job.reserved_cost,
            timestamp: now,
        });

        if let Err(e) = self.jobs.release(job.id, Utc::now()).await {
            tracing::error!(job_id = %job.id, "Failed to release job: {}", e);
            if let Err(e) = self.cancel_job(job.id).await {
                tracing::warn!(job_id = %job.id, "Failed to cancel unreleased job: {}", e);
            }
            return Err(e.into());
        }

        Ok(EnqueueOutcome::Accepted {
            job_id: job.id,
            decision,
        })
    }

    /// Like [`submit_job`](Self::submit_job), with rejection reduced to `None`.
    pub async fn add_job(&self, request: JobRequest) -> Result<Option<JobId>, QueueError> {
        Ok(self.submit_job(request).await?.job_id())
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        self.initialize().await?;
        Ok(self.jobs.get(id).await?)
    }

    /// `None` means the job does not exist (never did, or was purged). It does not mean failed.
    pub async fn get_job_status(&self, id: JobId) -> Result<Option<JobStatus>, QueueError> {
        Ok(self.get_job(id).await?.as_ref().map(JobStatus::from))
    }

    /// Cancel a waiting or active job. Returns `false` if it was already terminal.
    ///
    /// An active job's handler is not interrupted; its completion is refused
    /// and it is never billed.
    pub async fn cancel_job(&self, id: JobId) -> Result<bool, QueueError> {
        self.initialize().await?;
        let now = Utc::now();
        let cancelled = self.jobs.cancel(id, now).await?;
        if cancelled {
            tracing::info!(job_id = %id, "Job cancelled");
            self.broadcast(JobEvent::JobCancelled {
                job_id: id,
                timestamp: now,
            });
        }
        Ok(cancelled)
    }

    /// Put a failed job back in the queue if it has retries left.
    pub async fn retry_failed_job(&self, id: JobId) -> Result<Option<JobId>, QueueError> {
        self.initialize().await?;
        let Some(job) = self.jobs.get(id).await? else {
            return Ok(None);
        };
        if job.state != JobState::Failed || !job.has_retries_left() {
            return Ok(None);
        }

        let now = Utc::now();
        let expire_at = clock::saturating_after(now, self.config.job_ttl());
        if !self
            .jobs
            .requeue_failed(id, job.retry_count, expire_at, now)
            .await?
        {
            return Ok(None);
        }

        let attempt = job.retry_count + 1;
        tracing::info!(job_id = %id, "Failed job requeued (retry {})", attempt);
        self.broadcast(JobEvent::JobRetrying {
            job_id: id,
            queue_name: job.queue_name,
            attempt,
            available_at: now,
            timestamp: now,
        });
        Ok(Some(id))
    }

    /// Counts by state for one queue, or all queues when `queue` is `None`.
    pub async fn get_queue_stats(&self, queue: Option<&str>) -> Result<QueueStats, QueueError> {
        self.initialize().await?;
        Ok(self.jobs.count_by_state(queue).await?)
    }

    pub async fn get_detailed_queue_stats(&self) -> Result<DetailedQueueStats, QueueError> {
        self.initialize().await?;
        let by_queue = self.jobs.count_by_queue().await?;
        let waiting_by_priority = self.jobs.waiting_by_priority(None).await?;
        let performance = self.metrics.performance(STATS_WINDOW_HOURS).await?;

        let mut totals = QueueStats::default();
        for stats in by_queue.values() {
            for state in JobState::ALL {
                totals.add(state, stats.count(state));
            }
        }
        totals.avg_duration_ms = performance.avg_processing_ms;
        totals.throughput_per_min = Some(performance.throughput_per_minute);

        Ok(DetailedQueueStats {
            totals,
            by_queue,
            waiting_by_priority,
            performance,
            generated_at: Utc::now(),
        })
    }

    pub async fn get_performance_metrics(
        &self,
        window_hours: u32,
    ) -> Result<PerformanceMetrics, QueueError> {
        self.initialize().await?;
        Ok(self.metrics.performance(window_hours).await?)
    }

    /// Delete terminal jobs that finished more than `older_than_hours` ago.
    pub async fn clean_completed_jobs(&self, older_than_hours: u32) -> Result<u64, QueueError> {
        self.initialize().await?;
        let now = Utc::now();
        let cutoff = clock::saturating_before(now, clock::hours(i64::from(older_than_hours)));
        let removed = self.jobs.delete_terminal_before(cutoff).await?;
        if removed > 0 {
            tracing::info!("Removed {} finished jobs older than {}h", removed, older_than_hours);
            self.broadcast(JobEvent::JobsCleaned {
                count: removed,
                timestamp: now,
            });
        }
        Ok(removed)
    }

    /// Fail every waiting or active job past its expiry.
    pub async fn expire_overdue_jobs(&self) -> Result<u64, QueueError> {
        self.initialize().await?;
        let now = Utc::now();
        let expired = self.jobs.expire_overdue(now).await?;
        if expired > 0 {
            tracing::info!("Expired {} overdue jobs", expired);
            self.broadcast(JobEvent::JobsExpired {
                count: expired,
                timestamp: now,
            });
        }
        Ok(expired)
    }

    pub async fn cleanup_expired_metrics(&self) -> Result<u64, QueueError> {
        self.initialize().await?;
        Ok(self.metrics.cleanup_expired().await?)
    }

    /// Claim the best waiting job of `queue` for `worker_id`.
    ///
    /// Only the top tier of each candidate batch is tried. If every one of
    /// them was taken by another worker the batch is read again, so a stale
    /// batch never hands out a lower tier while a higher one is waiting.
    pub async fn claim_next(&self, queue: &str, worker_id: &str) -> Result<Option<Job>, QueueError> {
        self.initialize().await?;

        for _ in 0..CLAIM_ROUNDS {
            if self.config.max_in_flight > 0 {
                let active = self.jobs.count_active(queue).await?;
                if active >= u64::from(self.config.max_in_flight) {
                    tracing::debug!(queue, "In-flight limit reached ({} active)", active);
                    return Ok(None);
                }
            }

            let now = Utc::now();
            let candidates = self.jobs.claimable(queue, now, CLAIM_BATCH).await?;
            let Some(best) = candidates.first().map(|c| c.priority_score) else {
                return Ok(None);
            };

            for candidate in candidates.iter().take_while(|c| c.priority_score == best) {
                if !self.jobs.try_claim(candidate.id, worker_id, now).await? {
                    tracing::debug!(job_id = %candidate.id, worker_id, "Lost claim race");
                    continue;
                }
                let Some(job) = self.jobs.get(candidate.id).await? else {
                    continue;
                };
                tracing::debug!(job_id = %job.id, queue, worker_id, "Job claimed");
                self.broadcast(JobEvent::JobStarted {
                    job_id: job.id,
                    queue_name: job.queue_name.clone(),
                    worker_id: worker_id.to_string(),
                    timestamp: now,
                });
                return Ok(Some(job));
            }
        }

        Ok(None)
    }

    /// Record success and bill the tenant the cost reserved at admission.
    ///
    /// The ACTIVE -> COMPLETED transition is checked first, so repeated calls
    /// for the same job debit at most once.
    pub async fn on_job_completed(
        &self,
        id: JobId,
        result: JobResult,
    ) -> Result<CompletionOutcome, QueueError> {
        self.initialize().await?;
        let now = Utc::now();

        if !self.jobs.complete(id, &result, now).await? {
            return Ok(match self.jobs.get(id).await? {
                Some(job) => {
                    tracing::debug!(job_id = %id, "Completion ignored, job is {}", job.state);
                    CompletionOutcome::AlreadyFinished { state: job.state }
                }
                None => CompletionOutcome::NotFound,
            });
        }

        let Some(job) = self.jobs.get(id).await? else {
            return Ok(CompletionOutcome::NotFound);
        };
        let amount = job.reserved_cost;
        let duration_ms = job
            .processing_time()
            .map_or(0, |d| d.num_milliseconds().max(0) as u64);

        let outcome = match tokio::time::timeout(
            self.admission.config().call_timeout,
            self.ledger.debit(&job.tenant_id, amount, id),
        )
        .await
        {
            Ok(Ok(receipt)) => {
                self.jobs.record_charge(id, amount).await?;
                CompletionOutcome::Charged {
                    amount,
                    new_balance: receipt.new_balance,
                }
            }
            Ok(Err(LedgerError::DuplicateDebit(_))) => {
                tracing::warn!(job_id = %id, "Ledger already holds a debit for this job");
                self.jobs.record_charge(id, amount).await?;
                CompletionOutcome::AlreadyFinished {
                    state: JobState::Completed,
                }
            }
            Ok(Err(err)) => {
                tracing::error!(job_id = %id, tenant = %job.tenant_id, "Debit failed: {}", err);
                CompletionOutcome::ChargeFailed {
                    reason: err.to_string(),
                }
            }
            Err(_) => {
                tracing::error!(job_id = %id, tenant = %job.tenant_id, "Debit timed out");
                CompletionOutcome::ChargeFailed {
                    reason: "ledger did not answer in time".to_string(),
                }
            }
        };

        let metadata = json!({
            "job_id": id.to_string(),
            "queue": job.queue_name,
            "operation": job.operation.as_str(),
        });
        if let Err(e) = self
            .metrics
            .record(MetricType::ProcessingTime, duration_ms as f64, metadata.clone())
            .await
        {
            tracing::warn!("Failed to record processing time: {}", e);
        }
        if let Err(e) = self.metrics.record(MetricType::Throughput, 1.0, metadata).await {
            tracing::warn!("Failed to record throughput: {}", e);
        }

        tracing::info!(job_id = %id, queue = %job.queue_name, "Job completed in {}ms", duration_ms);
        self.broadcast(JobEvent::JobCompleted {
            job_id: id,
            queue_name: job.queue_name,
            duration_ms,
            charged: matches!(outcome, CompletionOutcome::Charged { .. }).then_some(amount),
            timestamp: now,
        });

        Ok(outcome)
    }

    /// Classify a handler error: back off and retry, or fail the job.
    pub async fn on_job_failed(
        &self,
        id: JobId,
        error: ProcessingError,
    ) -> Result<FailureOutcome, QueueError> {
        self.initialize().await?;
        let Some(job) = self.jobs.get(id).await? else {
            return Ok(FailureOutcome::Ignored);
        };
        if job.state != JobState::Active {
            tracing::debug!(job_id = %id, "Failure report ignored, job is {}", job.state);
            return Ok(FailureOutcome::Ignored);
        }

        let now = Utc::now();
        let metadata = json!({
            "job_id": id.to_string(),
            "queue": job.queue_name,
            "retryable": error.is_retryable(),
            "message": error.message(),
        });
        if let Err(e) = self.metrics.record(MetricType::Error, 1.0, metadata).await {
            tracing::warn!("Failed to record error metric: {}", e);
        }

        let job_error = match error {
            ProcessingError::Retryable { message } if job.has_retries_left() => {
                let attempt = job.retry_count + 1;
                let delay = self.retry.delay_for(attempt);
                let available_at = clock::saturating_after(
                    now,
                    chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX),
                );
                if !self
                    .jobs
                    .schedule_retry(id, job.retry_count, available_at)
                    .await?
                {
                    return Ok(FailureOutcome::Ignored);
                }
                tracing::warn!(
                    job_id = %id,
                    "Job failed ({}), retry {} of {} in {:?}",
                    message,
                    attempt,
                    job.max_retries,
                    delay
                );
                self.broadcast(JobEvent::JobRetrying {
                    job_id: id,
                    queue_name: job.queue_name,
                    attempt,
                    available_at,
                    timestamp: now,
                });
                return Ok(FailureOutcome::Retrying {
                    attempt,
                    available_at,
                });
            }
            ProcessingError::Retryable { message } => {
                JobError::new(FailureCode::RetriesExhausted, message)
            }
            ProcessingError::Fatal { code, message } => JobError::new(code, message),
        };

        if !self.jobs.fail(id, &job_error, now).await? {
            return Ok(FailureOutcome::Ignored);
        }
        tracing::warn!(job_id = %id, code = %job_error.code, "Job failed: {}", job_error.message);
        self.broadcast(JobEvent::JobFailed {
            job_id: id,
            queue_name: job.queue_name,
            code: job_error.code,
            error: job_error.message,
            retry_count: job.retry_count,
            timestamp: now,
        });
        Ok(FailureOutcome::Failed {
            code: job_error.code,
        })
    }
}
