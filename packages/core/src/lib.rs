//! Core domain types for the credit-gated job queue.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobState and JobStatus for work items
//! - Priority tiers and surge escalation
//! - Credits, tenants and billable operations
//! - Failure classification and retry strategies
//! - Queue configuration, stats and metric samples
//! - Events for real-time updates

pub mod clock;
mod credits;
mod error;
mod events;
mod job;
mod metrics;
mod pricing;
mod priority;
mod queue;
mod retry;

pub use credits::{
    Credits, CreditsParseError, MILLIS_PER_CREDIT, OperationType, TenantId, UnknownOperation,
};
pub use error::{FailureCode, JobError, ProcessingError};
pub use events::JobEvent;
pub use job::{
    DEFAULT_MAX_RETRIES, DEFAULT_TTL_HOURS, Job, JobId, JobResult, JobState, JobStatus,
    UnknownState,
};
pub use metrics::{DEFAULT_METRIC_RETENTION_DAYS, MetricSample, MetricType, PerformanceMetrics};
pub use pricing::PricingSnapshot;
pub use priority::{Priority, UnknownPriority, effective_priority, priority_score};
pub use queue::{DEFAULT_QUEUE, DetailedQueueStats, QueueConfig, QueueStats};
pub use retry::{ExponentialBackoff, FixedDelay, RetryStrategy};
