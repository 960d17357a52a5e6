//! Metric samples and the aggregates computed from them.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::clock::saturating_after;

pub const DEFAULT_METRIC_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Milliseconds between claim and completion.
    ProcessingTime,
    /// One sample per completed job.
    Throughput,
    /// One sample per failed attempt.
    Error,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::ProcessingTime => "processing_time",
            MetricType::Throughput => "throughput",
            MetricType::Error => "error",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw metric sample. Expires `expires_at` and is then swept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: String,
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(
        metric_type: MetricType,
        value: f64,
        metadata: serde_json::Value,
        timestamp: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            metric_type,
            value,
            metadata,
            timestamp,
            expires_at: saturating_after(timestamp, ttl),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Aggregates over a trailing window, computed on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub window_hours: u32,
    /// Mean processing time in milliseconds, if any job completed.
    pub avg_processing_ms: Option<f64>,
    pub throughput_per_minute: f64,
    /// Errors divided by (errors + completions), if anything was processed.
    pub error_rate: Option<f64>,
    pub completed: u64,
    pub errors: u64,
}

impl PerformanceMetrics {
    pub fn from_samples(
        window_hours: u32,
        processing_times: &[MetricSample],
        throughput: &[MetricSample],
        errors: &[MetricSample],
    ) -> Self {
        let avg_processing_ms = if processing_times.is_empty() {
            None
        } else {
            let total: f64 = processing_times.iter().map(|s| s.value).sum();
            Some(total / processing_times.len() as f64)
        };

        let completed = throughput.len() as u64;
        let error_count = errors.len() as u64;
        let minutes = f64::from(window_hours.max(1)) * 60.0;
        let processed = completed + error_count;

        Self {
            window_hours,
            avg_processing_ms,
            throughput_per_minute: completed as f64 / minutes,
            error_rate: (processed > 0).then(|| error_count as f64 / processed as f64),
            completed,
            errors: error_count,
        }
    }
}
