//! Queue configuration and statistics.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock;
use crate::job::{DEFAULT_MAX_RETRIES, DEFAULT_TTL_HOURS, JobState};
use crate::metrics::PerformanceMetrics;
use crate::priority::Priority;

pub const DEFAULT_QUEUE: &str = "ocr-processing";

/// Configuration for queue behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue used when a submission does not name one.
    pub queue_name: String,
    /// Number of concurrent workers per queue.
    pub concurrency: u32,
    /// Active jobs allowed per queue before workers stop claiming.
    pub max_in_flight: u32,
    /// Max retries for new jobs.
    pub default_max_retries: u32,
    /// Time from admission until a job expires.
    pub job_ttl_hours: i64,
    /// Handler execution timeout (seconds).
    pub job_timeout_secs: u64,
    /// How often an idle worker polls for work (milliseconds).
    pub poll_interval_ms: u64,
    /// How often the pool expires overdue jobs and sweeps metrics (seconds).
    pub housekeeping_interval_secs: u64,
    /// Terminal jobs older than this are purged by housekeeping.
    pub completed_retention_hours: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE.to_string(),
            concurrency: 4,
            max_in_flight: 16,
            default_max_retries: DEFAULT_MAX_RETRIES,
            job_ttl_hours: DEFAULT_TTL_HOURS,
            job_timeout_secs: 300,
            poll_interval_ms: 5_000,
            housekeeping_interval_secs: 30,
            completed_retention_hours: 24,
        }
    }
}

impl QueueConfig {
    pub fn job_ttl(&self) -> chrono::Duration {
        clock::hours(self.job_ttl_hours)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs)
    }
}

/// Job counts by state, computed on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Average job duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_duration_ms: Option<f64>,
    /// Jobs processed per minute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput_per_min: Option<f64>,
}

impl QueueStats {
    pub fn add(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Waiting => self.waiting += count,
            JobState::Active => self.active += count,
            JobState::Completed => self.completed += count,
            JobState::Failed => self.failed += count,
            JobState::Cancelled => self.cancelled += count,
        }
    }

    pub fn count(&self, state: JobState) -> u64 {
        match state {
            JobState::Waiting => self.waiting,
            JobState::Active => self.active,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Cancelled => self.cancelled,
        }
    }

    /// Jobs not yet finished (waiting + active).
    pub fn in_flight(&self) -> u64 {
        self.waiting + self.active
    }

    /// Total processed jobs.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    pub fn total(&self) -> u64 {
        self.in_flight() + self.processed() + self.cancelled
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }
}

/// Stats broken down per queue and per effective tier, plus recent performance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailedQueueStats {
    pub totals: QueueStats,
    pub by_queue: BTreeMap<String, QueueStats>,
    /// Waiting jobs by effective priority tier.
    pub waiting_by_priority: BTreeMap<Priority, u64>,
    pub performance: PerformanceMetrics,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_derive_totals() {
        let mut stats = QueueStats::default();
        stats.add(JobState::Waiting, 3);
        stats.add(JobState::Active, 1);
        stats.add(JobState::Completed, 6);
        stats.add(JobState::Failed, 2);
        stats.add(JobState::Cancelled, 1);

        assert_eq!(stats.in_flight(), 4);
        assert_eq!(stats.processed(), 8);
        assert_eq!(stats.total(), 13);
        assert_eq!(stats.success_rate(), Some(75.0));
        assert_eq!(stats.count(JobState::Cancelled), 1);
    }

    #[test]
    fn config_durations() {
        let config = QueueConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.job_ttl(), chrono::Duration::hours(1));
        assert_eq!(config.queue_name, DEFAULT_QUEUE);

        let forever = QueueConfig {
            job_ttl_hours: i64::MAX,
            ..QueueConfig::default()
        };
        assert_eq!(forever.job_ttl(), chrono::Duration::MAX);
    }
}
