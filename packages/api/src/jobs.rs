//! Job management operations for the HTTP layer.
//!
//! Requests and responses are plain serializable data. Routing, auth and
//! status codes belong to whatever transport wraps these functions.

use actors::{EnqueueOutcome, JobRequest, QueueError, QueueManager};
use billing::AdmissionError;
use queue_core::{
    Credits, DetailedQueueStats, JobId, JobStatus, OperationType, PerformanceMetrics, Priority,
    QueueStats, TenantId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Window used when a metrics request does not name one.
pub const DEFAULT_METRICS_WINDOW_HOURS: u32 = 1;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl ApiError {
    /// Stable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::Queue(_) => "INTERNAL_ERROR",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Request type for submitting a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueJobRequest {
    pub tenant_id: String,
    /// `ocr`, `emission_calculation` or `report_generation`.
    pub operation: String,
    #[serde(default)]
    pub payload: JsonValue,
    /// `normal`, `high` or `urgent`. Defaults to normal.
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub queue_name: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl EnqueueJobRequest {
    fn into_job_request(self) -> Result<JobRequest, ApiError> {
        let tenant_id = self.tenant_id.trim();
        if tenant_id.is_empty() {
            return Err(ApiError::InvalidRequest("tenant_id is required".into()));
        }
        let operation: OperationType = self
            .operation
            .parse()
            .map_err(|e| ApiError::InvalidRequest(format!("{e}")))?;
        let priority = match self.priority.as_deref() {
            None => Priority::Normal,
            Some(p) => p
                .parse()
                .map_err(|e| ApiError::InvalidRequest(format!("{e}")))?,
        };

        let mut request = JobRequest::new(TenantId::new(tenant_id), operation, self.payload)
            .with_priority(priority);
        if let Some(queue_name) = self.queue_name.filter(|q| !q.trim().is_empty()) {
            request = request.on_queue(queue_name);
        }
        if let Some(max_retries) = self.max_retries {
            request = request.with_max_retries(max_retries);
        }
        Ok(request)
    }
}

/// Result of a submission. A rejection is an answer, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnqueueJobResponse {
    Accepted {
        job_id: JobId,
        priority: Priority,
        priority_score: i32,
        reserved_cost: Credits,
        multiplier: f64,
        surge_active: bool,
        /// Pricing could not be read and standard pricing was assumed.
        pricing_fallback: bool,
    },
    Rejected {
        /// `INSUFFICIENT_CREDITS`, `RATE_LIMITED` or `LEDGER_UNAVAILABLE`.
        code: String,
        message: String,
        /// Whether resubmitting later may succeed without a top-up.
        retryable: bool,
    },
}

impl From<EnqueueOutcome> for EnqueueJobResponse {
    fn from(outcome: EnqueueOutcome) -> Self {
        match outcome {
            EnqueueOutcome::Accepted { job_id, decision } => EnqueueJobResponse::Accepted {
                job_id,
                priority: decision.priority,
                priority_score: decision.priority_score,
                reserved_cost: decision.reserved_cost,
                multiplier: decision.multiplier,
                surge_active: decision.pricing.is_surge_active,
                pricing_fallback: decision.pricing.fallback,
            },
            EnqueueOutcome::Rejected(error) => rejection(&error),
        }
    }
}

fn rejection(error: &AdmissionError) -> EnqueueJobResponse {
    EnqueueJobResponse::Rejected {
        code: error.code().to_string(),
        message: error.to_string(),
        retryable: error.is_transient(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub job_id: JobId,
    /// False when the job was already finished or does not exist.
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryJobResponse {
    pub job_id: JobId,
    /// False unless the job was FAILED with retries left.
    pub requeued: bool,
}

fn parse_job_id(id: &str) -> Result<JobId, ApiError> {
    JobId::parse(id.trim()).map_err(|e| ApiError::InvalidRequest(format!("invalid job id: {e}")))
}

/// Submit a job through admission control.
pub async fn enqueue_job(
    manager: &QueueManager,
    request: EnqueueJobRequest,
) -> Result<EnqueueJobResponse, ApiError> {
    let request = request.into_job_request()?;
    Ok(manager.submit_job(request).await?.into())
}

/// `None` when no such job exists.
pub async fn get_job_status(
    manager: &QueueManager,
    id: &str,
) -> Result<Option<JobStatus>, ApiError> {
    let job_id = parse_job_id(id)?;
    Ok(manager.get_job_status(job_id).await?)
}

pub async fn cancel_job(manager: &QueueManager, id: &str) -> Result<CancelJobResponse, ApiError> {
    let job_id = parse_job_id(id)?;
    let cancelled = manager.cancel_job(job_id).await?;
    Ok(CancelJobResponse { job_id, cancelled })
}

pub async fn retry_failed_job(
    manager: &QueueManager,
    id: &str,
) -> Result<RetryJobResponse, ApiError> {
    let job_id = parse_job_id(id)?;
    let requeued = manager.retry_failed_job(job_id).await?.is_some();
    Ok(RetryJobResponse { job_id, requeued })
}

/// Counts for one queue, or every queue when `queue` is `None`.
pub async fn get_queue_stats(
    manager: &QueueManager,
    queue: Option<&str>,
) -> Result<QueueStats, ApiError> {
    Ok(manager.get_queue_stats(queue).await?)
}

pub async fn get_detailed_queue_stats(
    manager: &QueueManager,
) -> Result<DetailedQueueStats, ApiError> {
    Ok(manager.get_detailed_queue_stats().await?)
}

pub async fn get_performance_metrics(
    manager: &QueueManager,
    window_hours: Option<u32>,
) -> Result<PerformanceMetrics, ApiError> {
    let window_hours = window_hours
        .unwrap_or(DEFAULT_METRICS_WINDOW_HOURS)
        .max(1);
    Ok(manager.get_performance_metrics(window_hours).await?)
}

#[cfg(test)]
mod tests {
    use queue_core::PricingSnapshot;
    use serde_json::json;

    use super::*;

    fn request(operation: &str, priority: Option<&str>) -> EnqueueJobRequest {
        EnqueueJobRequest {
            tenant_id: "tenant-a".into(),
            operation: operation.into(),
            payload: json!({}),
            priority: priority.map(str::to_string),
            queue_name: None,
            max_retries: None,
        }
    }

    #[test]
    fn request_fields_are_validated() {
        assert!(request("ocr", Some("urgent")).into_job_request().is_ok());
        assert!(request("ocr", None).into_job_request().is_ok());
        assert!(matches!(
            request("translate", None).into_job_request(),
            Err(ApiError::InvalidRequest(_))
        ));
        assert!(matches!(
            request("ocr", Some("asap")).into_job_request(),
            Err(ApiError::InvalidRequest(_))
        ));

        let mut blank = request("ocr", None);
        blank.tenant_id = "  ".into();
        assert_eq!(blank.into_job_request().unwrap_err().code(), "INVALID_REQUEST");
    }

    #[test]
    fn missing_fields_deserialize_to_defaults() {
        let parsed: EnqueueJobRequest =
            serde_json::from_value(json!({"tenant_id": "t", "operation": "ocr"})).unwrap();
        assert_eq!(parsed.payload, JsonValue::Null);
        assert_eq!(parsed.priority, None);
    }

    #[test]
    fn rejections_keep_stable_codes() {
        let response = rejection(&AdmissionError::InsufficientCredits {
            required: Credits::from_millis(200),
            available: Credits::from_millis(150),
        });
        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(body["status"], "rejected");
        assert_eq!(body["code"], "INSUFFICIENT_CREDITS");
        assert_eq!(body["retryable"], false);

        let response = rejection(&AdmissionError::LedgerUnavailable("timeout".into()));
        assert!(matches!(
            response,
            EnqueueJobResponse::Rejected { retryable: true, .. }
        ));
    }

    #[test]
    fn accepted_response_flags_pricing_fallback() {
        let now = chrono::Utc::now();
        let decision = billing::AdmissionDecision {
            tenant_id: TenantId::new("t"),
            operation: OperationType::Ocr,
            requested_priority: Priority::Normal,
            priority: Priority::Normal,
            priority_score: Priority::Normal.score(),
            base_cost: Credits::from_millis(100),
            reserved_cost: Credits::from_millis(100),
            multiplier: 1.0,
            pricing: PricingSnapshot::fallback(now, "timeout"),
        };
        let job_id = JobId::new();
        let response = EnqueueJobResponse::from(EnqueueOutcome::Accepted { job_id, decision });
        assert!(matches!(
            response,
            EnqueueJobResponse::Accepted {
                pricing_fallback: true,
                surge_active: false,
                ..
            }
        ));
    }

    #[test]
    fn bad_job_ids_are_invalid_requests() {
        assert!(matches!(parse_job_id("nope"), Err(ApiError::InvalidRequest(_))));
        let id = JobId::new();
        assert_eq!(parse_job_id(&id.to_string()).unwrap(), id);
    }
}
