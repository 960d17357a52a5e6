//! SurrealDB-backed job store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use queue_core::{
    Credits, FailureCode, Job, JobError, JobId, JobResult, JobState, OperationType, Priority,
    QueueStats, TenantId,
};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Datetime;

use crate::store::{ClaimCandidate, JobStore};
use crate::{Database, DbError, init_schema};

/// Column list used by every read, so rows map onto [`JobRow`].
const JOB_FIELDS: &str = "meta::id(id) AS id, queue_name, tenant_id, operation, payload, \
    priority, priority_score, state, created_at, started_at, completed_at, available_at, \
    expire_at, retry_count, max_retries, reserved_cost, multiplier, charged_cost, worker_id, \
    error_code, error_message, result";

/// Repository for job persistence operations.
#[derive(Debug, Clone)]
pub struct SurrealJobStore {
    db: Database,
}

impl SurrealJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// Record content written on insert.
#[derive(Debug, Serialize)]
struct JobContent {
    queue_name: String,
    tenant_id: String,
    operation: String,
    payload: serde_json::Value,
    priority: String,
    priority_score: i64,
    state: String,
    created_at: Datetime,
    started_at: Option<Datetime>,
    completed_at: Option<Datetime>,
    available_at: Datetime,
    expire_at: Datetime,
    retry_count: i64,
    max_retries: i64,
    reserved_cost: i64,
    multiplier: f64,
    charged_cost: Option<i64>,
    worker_id: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    result: Option<JobResult>,
}

impl From<&Job> for JobContent {
    fn from(job: &Job) -> Self {
        Self {
            queue_name: job.queue_name.clone(),
            tenant_id: job.tenant_id.to_string(),
            operation: job.operation.as_str().to_string(),
            payload: job.payload.clone(),
            priority: job.priority.as_str().to_string(),
            priority_score: i64::from(job.priority_score),
            state: job.state.as_str().to_string(),
            created_at: Datetime::from(job.created_at),
            started_at: job.started_at.map(Datetime::from),
            completed_at: job.completed_at.map(Datetime::from),
            available_at: Datetime::from(job.available_at),
            expire_at: Datetime::from(job.expire_at),
            retry_count: i64::from(job.retry_count),
            max_retries: i64::from(job.max_retries),
            reserved_cost: job.reserved_cost.millis(),
            multiplier: job.multiplier,
            charged_cost: job.charged_cost.map(Credits::millis),
            worker_id: job.worker_id.clone(),
            error_code: job.error.as_ref().map(|e| e.code.as_str().to_string()),
            error_message: job.error.as_ref().map(|e| e.message.clone()),
            result: job.result.clone(),
        }
    }
}

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct JobRow {
    id: String,
    queue_name: String,
    tenant_id: String,
    operation: String,
    #[serde(default)]
    payload: serde_json::Value,
    priority: String,
    priority_score: i64,
    state: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    available_at: DateTime<Utc>,
    expire_at: DateTime<Utc>,
    retry_count: i64,
    max_retries: i64,
    reserved_cost: i64,
    multiplier: f64,
    charged_cost: Option<i64>,
    worker_id: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    result: Option<JobResult>,
}

fn corrupt(field: &str, value: impl std::fmt::Display) -> DbError {
    DbError::Serialization(format!("invalid {field} in job row: {value}"))
}

fn to_u32(field: &str, value: i64) -> Result<u32, DbError> {
    u32::try_from(value).map_err(|_| corrupt(field, value))
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let error = match row.error_code {
            Some(code) => Some(JobError {
                code: FailureCode::parse(&code).ok_or_else(|| corrupt("error_code", &code))?,
                message: row.error_message.unwrap_or_default(),
            }),
            None => None,
        };

        Ok(Job {
            id: JobId::parse(&row.id).map_err(|e| corrupt("id", e))?,
            queue_name: row.queue_name,
            tenant_id: TenantId::new(row.tenant_id),
            operation: row
                .operation
                .parse::<OperationType>()
                .map_err(|e| corrupt("operation", e))?,
            payload: row.payload,
            priority: row
                .priority
                .parse::<Priority>()
                .map_err(|e| corrupt("priority", e))?,
            priority_score: i32::try_from(row.priority_score)
                .map_err(|_| corrupt("priority_score", row.priority_score))?,
            state: row
                .state
                .parse::<JobState>()
                .map_err(|e| corrupt("state", e))?,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            available_at: row.available_at,
            expire_at: row.expire_at,
            retry_count: to_u32("retry_count", row.retry_count)?,
            max_retries: to_u32("max_retries", row.max_retries)?,
            reserved_cost: Credits::from_millis(row.reserved_cost),
            multiplier: row.multiplier,
            charged_cost: row.charged_cost.map(Credits::from_millis),
            worker_id: row.worker_id,
            error,
            result: row.result,
        })
    }
}

/// Row returned by conditional updates. One row means the update applied.
#[derive(Debug, Deserialize)]
struct Changed {}

#[derive(Debug, Deserialize)]
struct CandidateRow {
    id: String,
    priority_score: i64,
}

#[derive(Debug, Deserialize)]
struct QueueStateCount {
    queue_name: String,
    state: String,
    count: i64,
}

#[derive(Debug, Deserialize)]
struct Count {
    count: i64,
}

#[derive(Debug, Deserialize)]
struct ScoreCount {
    priority_score: i64,
    count: i64,
}

fn applied(rows: Vec<Changed>) -> bool {
    !rows.is_empty()
}

#[async_trait]
impl JobStore for SurrealJobStore {
    async fn init(&self) -> Result<(), DbError> {
        init_schema(&self.db).await
    }

    async fn insert(&self, job: &Job) -> Result<(), DbError> {
        let existing = self.get(job.id).await?;
        if existing.is_some() {
            return Err(DbError::Duplicate(format!("job {}", job.id)));
        }

        self.db
            .client()
            .query("CREATE type::thing('job', $id) CONTENT $content RETURN NONE")
            .bind(("id", job.id.to_string()))
            .bind(("content", JobContent::from(job)))
            .await?
            .check()?;

        tracing::debug!(job_id = %job.id, queue = %job.queue_name, "Job stored");
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let query = format!("SELECT {JOB_FIELDS} FROM type::thing('job', $id)");
        let mut result = self
            .db
            .client()
            .query(&query)
            .bind(("id", id.to_string()))
            .await?;

        let rows: Vec<JobRow> = result.take(0)?;
        rows.into_iter().next().map(Job::try_from).transpose()
    }

    async fn claimable(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ClaimCandidate>, DbError> {
        let mut result = self
            .db
            .client()
            .query(
                r#"
                SELECT meta::id(id) AS id, priority_score, created_at FROM job
                WHERE queue_name = $queue
                    AND state = "waiting"
                    AND available_at <= $now
                    AND expire_at > $now
                ORDER BY priority_score DESC, created_at ASC
                LIMIT $limit
                "#,
            )
            .bind(("queue", queue.to_string()))
            .bind(("now", Datetime::from(now)))
            .bind(("limit", limit as i64))
            .await?;

        let rows: Vec<CandidateRow> = result.take(0)?;
        rows.into_iter()
            .map(|row| {
                Ok(ClaimCandidate {
                    id: JobId::parse(&row.id).map_err(|e| corrupt("id", e))?,
                    priority_score: i32::try_from(row.priority_score)
                        .map_err(|_| corrupt("priority_score", row.priority_score))?,
                })
            })
            .collect()
    }

    async fn release(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, DbError> {
        let mut result = self
            .db
            .client()
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET available_at = $now
                WHERE state = "waiting"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("now", Datetime::from(now)))
            .await?;

        Ok(applied(result.take(0)?))
    }

    async fn try_claim(
        &self,
        id: JobId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut result = self
            .db
            .client()
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET state = "active", started_at = $now, worker_id = $worker_id
                WHERE state = "waiting" AND available_at <= $now AND expire_at > $now
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("now", Datetime::from(now)))
            .await?;

        Ok(applied(result.take(0)?))
    }

    async fn complete(
        &self,
        id: JobId,
        result: &JobResult,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut response = self
            .db
            .client()
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET state = "completed", completed_at = $now, result = $result
                WHERE state = "active"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("result", result.clone()))
            .bind(("now", Datetime::from(now)))
            .await?;

        Ok(applied(response.take(0)?))
    }

    async fn record_charge(&self, id: JobId, amount: Credits) -> Result<(), DbError> {
        let mut result = self
            .db
            .client()
            .query("UPDATE type::thing('job', $id) SET charged_cost = $amount RETURN AFTER")
            .bind(("id", id.to_string()))
            .bind(("amount", amount.millis()))
            .await?;

        if applied(result.take(0)?) {
            Ok(())
        } else {
            Err(DbError::NotFound(format!("job {id}")))
        }
    }

    async fn fail(&self, id: JobId, error: &JobError, now: DateTime<Utc>) -> Result<bool, DbError> {
        let mut result = self
            .db
            .client()
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET state = "failed", completed_at = $now,
                    error_code = $code, error_message = $message
                WHERE state = "active"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("code", error.code.as_str().to_string()))
            .bind(("message", error.message.clone()))
            .bind(("now", Datetime::from(now)))
            .await?;

        Ok(applied(result.take(0)?))
    }

    async fn schedule_retry(
        &self,
        id: JobId,
        expected_retry_count: u32,
        available_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut result = self
            .db
            .client()
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET state = "waiting", retry_count += 1, available_at = $available_at,
                    started_at = NONE, worker_id = NONE
                WHERE state = "active" AND retry_count = $expected
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("expected", i64::from(expected_retry_count)))
            .bind(("available_at", Datetime::from(available_at)))
            .await?;

        Ok(applied(result.take(0)?))
    }

    async fn cancel(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, DbError> {
        let mut result = self
            .db
            .client()
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET state = "cancelled", completed_at = $now
                WHERE state IN ["waiting", "active"]
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("now", Datetime::from(now)))
            .await?;

        Ok(applied(result.take(0)?))
    }

    async fn requeue_failed(
        &self,
        id: JobId,
        expected_retry_count: u32,
        expire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut result = self
            .db
            .client()
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET state = "waiting", retry_count += 1, available_at = $now,
                    expire_at = $expire_at, started_at = NONE, completed_at = NONE,
                    worker_id = NONE, error_code = NONE, error_message = NONE, result = NONE
                WHERE state = "failed"
                    AND retry_count = $expected
                    AND retry_count < max_retries
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("expected", i64::from(expected_retry_count)))
            .bind(("expire_at", Datetime::from(expire_at)))
            .bind(("now", Datetime::from(now)))
            .await?;

        Ok(applied(result.take(0)?))
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
        let expired = JobError::expired();
        let mut result = self
            .db
            .client()
            .query(
                r#"
                UPDATE job
                SET state = "failed", completed_at = $now,
                    error_code = $code, error_message = $message
                WHERE state IN ["waiting", "active"] AND expire_at <= $now
                RETURN AFTER
                "#,
            )
            .bind(("code", expired.code.as_str().to_string()))
            .bind(("message", expired.message))
            .bind(("now", Datetime::from(now)))
            .await?;

        let rows: Vec<Changed> = result.take(0)?;
        Ok(rows.len() as u64)
    }

    async fn count_active(&self, queue: &str) -> Result<u64, DbError> {
        let mut result = self
            .db
            .client()
            .query(
                r#"
                SELECT count() AS count FROM job
                WHERE queue_name = $queue AND state = "active"
                GROUP ALL
                "#,
            )
            .bind(("queue", queue.to_string()))
            .await?;

        let rows: Vec<Count> = result.take(0)?;
        Ok(rows.first().map_or(0, |row| row.count.max(0) as u64))
    }

    async fn count_by_queue(&self) -> Result<BTreeMap<String, QueueStats>, DbError> {
        let mut result = self
            .db
            .client()
            .query(
                r#"
                SELECT queue_name, state, count() AS count
                FROM job
                GROUP BY queue_name, state
                "#,
            )
            .await?;

        let counts: Vec<QueueStateCount> = result.take(0)?;

        let mut by_queue: BTreeMap<String, QueueStats> = BTreeMap::new();
        for row in counts {
            let state = row
                .state
                .parse::<JobState>()
                .map_err(|e| corrupt("state", e))?;
            by_queue
                .entry(row.queue_name)
                .or_default()
                .add(state, row.count.max(0) as u64);
        }
        Ok(by_queue)
    }

    async fn waiting_by_priority(
        &self,
        queue: Option<&str>,
    ) -> Result<BTreeMap<Priority, u64>, DbError> {
        let query = match queue {
            Some(_) => {
                r#"
                SELECT priority_score, count() AS count FROM job
                WHERE state = "waiting" AND queue_name = $queue
                GROUP BY priority_score
                "#
            }
            None => {
                r#"
                SELECT priority_score, count() AS count FROM job
                WHERE state = "waiting"
                GROUP BY priority_score
                "#
            }
        };

        let mut result = self
            .db
            .client()
            .query(query)
            .bind(("queue", queue.unwrap_or_default().to_string()))
            .await?;

        let counts: Vec<ScoreCount> = result.take(0)?;

        let mut by_priority = BTreeMap::new();
        for row in counts {
            let score = i32::try_from(row.priority_score)
                .map_err(|_| corrupt("priority_score", row.priority_score))?;
            *by_priority.entry(Priority::from_score(score)).or_insert(0) +=
                row.count.max(0) as u64;
        }
        Ok(by_priority)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
        let mut result = self
            .db
            .client()
            .query(
                r#"
                DELETE job
                WHERE state IN ["completed", "failed", "cancelled"]
                    AND completed_at != NONE
                    AND completed_at < $cutoff
                RETURN BEFORE
                "#,
            )
            .bind(("cutoff", Datetime::from(cutoff)))
            .await?;

        let rows: Vec<Changed> = result.take(0)?;
        tracing::debug!(deleted = rows.len(), "Removed finished jobs");
        Ok(rows.len() as u64)
    }
}
