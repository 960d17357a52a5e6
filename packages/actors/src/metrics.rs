//! Metric recording and on-read aggregation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use db::{DbError, MetricStore};
use queue_core::{
    DEFAULT_METRIC_RETENTION_DAYS, MetricSample, MetricType, PerformanceMetrics, clock,
};

/// Upper bound on samples read for one aggregate.
const AGGREGATE_SAMPLE_LIMIT: usize = 100_000;

/// Writes TTL-bounded samples and computes aggregates from them on read.
#[derive(Clone)]
pub struct MetricsCollector {
    store: Arc<dyn MetricStore>,
    retention: Duration,
}

impl MetricsCollector {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self {
            store,
            retention: Duration::days(DEFAULT_METRIC_RETENTION_DAYS),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub async fn init(&self) -> Result<(), DbError> {
        self.store.init().await
    }

    pub async fn record(
        &self,
        metric_type: MetricType,
        value: f64,
        metadata: serde_json::Value,
    ) -> Result<MetricSample, DbError> {
        self.record_at(metric_type, value, metadata, Utc::now()).await
    }

    pub async fn record_at(
        &self,
        metric_type: MetricType,
        value: f64,
        metadata: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<MetricSample, DbError> {
        let sample = MetricSample::new(metric_type, value, metadata, at, self.retention);
        self.store.insert(&sample).await?;
        Ok(sample)
    }

    /// Samples of `metric_type` from the last `window_hours`, newest first.
    pub async fn query(
        &self,
        metric_type: MetricType,
        window_hours: u32,
        limit: usize,
    ) -> Result<Vec<MetricSample>, DbError> {
        let now = Utc::now();
        let since = clock::saturating_before(now, clock::hours(i64::from(window_hours)));
        self.store.query(metric_type, since, now, limit).await
    }

    /// Delete expired samples. Safe to run alongside writers.
    pub async fn cleanup_expired(&self) -> Result<u64, DbError> {
        let removed = self.store.delete_expired(Utc::now()).await?;
        if removed > 0 {
            tracing::debug!("Removed {} expired metric samples", removed);
        }
        Ok(removed)
    }

    pub async fn performance(&self, window_hours: u32) -> Result<PerformanceMetrics, DbError> {
        let times = self
            .query(MetricType::ProcessingTime, window_hours, AGGREGATE_SAMPLE_LIMIT)
            .await?;
        let throughput = self
            .query(MetricType::Throughput, window_hours, AGGREGATE_SAMPLE_LIMIT)
            .await?;
        let errors = self
            .query(MetricType::Error, window_hours, AGGREGATE_SAMPLE_LIMIT)
            .await?;
        Ok(PerformanceMetrics::from_samples(
            window_hours,
            &times,
            &throughput,
            &errors,
        ))
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::InMemoryMetricStore;
    use serde_json::json;

    #[tokio::test]
    async fn aggregates_on_read() {
        let collector = MetricsCollector::new(InMemoryMetricStore::arc());
        collector
            .record(MetricType::ProcessingTime, 100.0, json!({}))
            .await
            .unwrap();
        collector
            .record(MetricType::ProcessingTime, 300.0, json!({}))
            .await
            .unwrap();
        collector
            .record(MetricType::Throughput, 1.0, json!({}))
            .await
            .unwrap();
        collector
            .record(MetricType::Throughput, 1.0, json!({}))
            .await
            .unwrap();
        collector
            .record(MetricType::Error, 1.0, json!({"code": "UNPROCESSABLE"}))
            .await
            .unwrap();

        let perf = collector.performance(1).await.unwrap();
        assert_eq!(perf.avg_processing_ms, Some(200.0));
        assert_eq!(perf.completed, 2);
        assert_eq!(perf.errors, 1);
        assert_eq!(perf.error_rate, Some(1.0 / 3.0));
    }

    #[tokio::test]
    async fn old_samples_fall_out_of_the_window() {
        let collector = MetricsCollector::new(InMemoryMetricStore::arc());
        collector
            .record_at(
                MetricType::Throughput,
                1.0,
                json!({}),
                Utc::now() - Duration::hours(3),
            )
            .await
            .unwrap();
        collector
            .record(MetricType::Throughput, 1.0, json!({}))
            .await
            .unwrap();

        assert_eq!(
            collector.query(MetricType::Throughput, 1, 10).await.unwrap().len(),
            1
        );
        assert_eq!(
            collector.query(MetricType::Throughput, 4, 10).await.unwrap().len(),
            2
        );
        assert_eq!(
            collector
                .query(MetricType::Throughput, u32::MAX, 10)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn cleanup_drops_only_expired_samples() {
        let collector =
            MetricsCollector::new(InMemoryMetricStore::arc()).with_retention(Duration::hours(1));
        collector
            .record_at(
                MetricType::Error,
                1.0,
                json!({}),
                Utc::now() - Duration::hours(2),
            )
            .await
            .unwrap();
        collector
            .record(MetricType::Error, 1.0, json!({}))
            .await
            .unwrap();

        assert_eq!(collector.cleanup_expired().await.unwrap(), 1);
        assert_eq!(collector.query(MetricType::Error, 24, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unbounded_retention_keeps_samples() {
        let collector =
            MetricsCollector::new(InMemoryMetricStore::arc()).with_retention(Duration::MAX);
        collector
            .record(MetricType::Error, 1.0, json!({}))
            .await
            .unwrap();

        assert_eq!(collector.cleanup_expired().await.unwrap(), 0);
        assert_eq!(collector.query(MetricType::Error, 1, 10).await.unwrap().len(), 1);
    }
}
