#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use db::{DbConfig, DbError, InMemoryJobStore, InMemoryMetricStore, SurrealJobStore, SurrealMetricStore};
use queue_core::{Credits, Job, JobId, OperationType, Priority, TenantId, priority_score};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub const QUEUE: &str = "ocr-processing";

/// Each call opens its own namespace, so tests never see each other's rows.
async fn surreal_db() -> Result<db::Database, DbError> {
    let config = DbConfig::memory().with_namespace(format!("test_{}", JobId::new()));
    db::init(&config).await
}

pub async fn surreal_job_store() -> Result<SurrealJobStore, DbError> {
    Ok(SurrealJobStore::new(surreal_db().await?))
}

pub async fn memory_job_store() -> Result<InMemoryJobStore, DbError> {
    Ok(InMemoryJobStore::new())
}

pub async fn surreal_metric_store() -> Result<SurrealMetricStore, DbError> {
    Ok(SurrealMetricStore::new(surreal_db().await?))
}

pub async fn memory_metric_store() -> Result<InMemoryMetricStore, DbError> {
    Ok(InMemoryMetricStore::new())
}

/// A waiting OCR job admitted at `created_at` with the given tier.
pub fn job_at(priority: Priority, created_at: DateTime<Utc>) -> Job {
    Job::new(
        QUEUE,
        TenantId::new("tenant-a"),
        OperationType::Ocr,
        json!({"document_id": "doc-1", "pages": [1, 2]}),
    )
    .with_priority(priority, priority_score(priority, false))
    .with_cost(Credits::from_millis(100), 1.0)
    .with_created_at(created_at)
}

pub fn job(priority: Priority) -> Job {
    job_at(priority, Utc::now() - Duration::seconds(1))
}
