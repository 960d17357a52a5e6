//! SurrealDB-backed metric sample store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use queue_core::{MetricSample, MetricType};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Datetime;

use crate::store::MetricStore;
use crate::{Database, DbError, init_schema};

#[derive(Debug, Clone)]
pub struct SurrealMetricStore {
    db: Database,
}

impl SurrealMetricStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[derive(Debug, Serialize)]
struct MetricContent {
    metric_type: MetricType,
    value: f64,
    metadata: serde_json::Value,
    timestamp: Datetime,
    expires_at: Datetime,
}

#[derive(Debug, Deserialize)]
struct MetricRow {
    id: String,
    metric_type: MetricType,
    value: f64,
    #[serde(default)]
    metadata: serde_json::Value,
    timestamp: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<MetricRow> for MetricSample {
    fn from(row: MetricRow) -> Self {
        Self {
            id: row.id,
            metric_type: row.metric_type,
            value: row.value,
            metadata: row.metadata,
            timestamp: row.timestamp,
            expires_at: row.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Deleted {}

#[async_trait]
impl MetricStore for SurrealMetricStore {
    async fn init(&self) -> Result<(), DbError> {
        init_schema(&self.db).await
    }

    async fn insert(&self, sample: &MetricSample) -> Result<(), DbError> {
        self.db
            .client()
            .query("CREATE type::thing('metric', $id) CONTENT $content RETURN NONE")
            .bind(("id", sample.id.clone()))
            .bind((
                "content",
                MetricContent {
                    metric_type: sample.metric_type,
                    value: sample.value,
                    metadata: sample.metadata.clone(),
                    timestamp: Datetime::from(sample.timestamp),
                    expires_at: Datetime::from(sample.expires_at),
                },
            ))
            .await?
            .check()?;
        Ok(())
    }

    async fn query(
        &self,
        metric_type: MetricType,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MetricSample>, DbError> {
        let mut result = self
            .db
            .client()
            .query(
                r#"
                SELECT meta::id(id) AS id, metric_type, value, metadata, timestamp, expires_at
                FROM metric
                WHERE metric_type = $metric_type
                    AND timestamp >= $since
                    AND expires_at > $now
                ORDER BY timestamp DESC
                LIMIT $limit
                "#,
            )
            .bind(("metric_type", metric_type.as_str().to_string()))
            .bind(("since", Datetime::from(since)))
            .bind(("now", Datetime::from(now)))
            .bind(("limit", limit as i64))
            .await?;

        let rows: Vec<MetricRow> = result.take(0)?;
        Ok(rows.into_iter().map(MetricSample::from).collect())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
        let mut result = self
            .db
            .client()
            .query("DELETE metric WHERE expires_at <= $now RETURN BEFORE")
            .bind(("now", Datetime::from(now)))
            .await?;

        let rows: Vec<Deleted> = result.take(0)?;
        Ok(rows.len() as u64)
    }
}
