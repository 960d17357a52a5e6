#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use actors::{JobRequest, QueueManager};
use async_trait::async_trait;
use billing::{AdmissionConfig, InMemoryCreditsLedger, PricingError, PricingOracle, SurgeSchedule};
use chrono::{DateTime, Utc};
use db::{InMemoryJobStore, InMemoryMetricStore};
use queue_core::{
    Credits, FixedDelay, OperationType, Priority, QueueConfig, RetryStrategy, TenantId,
};
use serde_json::json;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub const QUEUE: &str = "ocr-processing";

pub fn tenant() -> TenantId {
    TenantId::new("tenant-a")
}

/// Pricing whose surge flag can be flipped mid-test.
#[derive(Debug)]
pub struct SwitchablePricing {
    surge: AtomicBool,
    multiplier: f64,
}

impl SwitchablePricing {
    pub fn new(multiplier: f64, surge: bool) -> Arc<Self> {
        Arc::new(Self {
            surge: AtomicBool::new(surge),
            multiplier,
        })
    }

    pub fn set_surge(&self, surge: bool) {
        self.surge.store(surge, Ordering::SeqCst);
    }
}

#[async_trait]
impl PricingOracle for SwitchablePricing {
    async fn multiplier(&self, _at: DateTime<Utc>) -> Result<f64, PricingError> {
        Ok(if self.surge.load(Ordering::SeqCst) {
            self.multiplier
        } else {
            1.0
        })
    }

    async fn is_surge_active(&self, _at: DateTime<Utc>) -> Result<bool, PricingError> {
        Ok(self.surge.load(Ordering::SeqCst))
    }
}

pub struct Harness {
    pub manager: Arc<QueueManager>,
    pub ledger: Arc<InMemoryCreditsLedger>,
    pub jobs: Arc<InMemoryJobStore>,
    pub metrics: Arc<InMemoryMetricStore>,
}

pub fn test_config() -> QueueConfig {
    QueueConfig {
        queue_name: QUEUE.to_string(),
        poll_interval_ms: 20,
        ..QueueConfig::default()
    }
}

pub struct HarnessBuilder {
    config: QueueConfig,
    pricing: Arc<dyn PricingOracle>,
    retry: Arc<dyn RetryStrategy>,
    balance: Credits,
}

impl HarnessBuilder {
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pricing(mut self, pricing: Arc<dyn PricingOracle>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn retry(mut self, retry: Arc<dyn RetryStrategy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn balance(mut self, balance: Credits) -> Self {
        self.balance = balance;
        self
    }

    pub async fn build(self) -> Harness {
        let jobs = InMemoryJobStore::arc();
        let metrics = InMemoryMetricStore::arc();
        let ledger = InMemoryCreditsLedger::arc();
        ledger.set_balance(&tenant(), self.balance).await;

        let admission = AdmissionConfig {
            rate_limit: None,
            call_timeout: Duration::from_millis(500),
            ..AdmissionConfig::default()
        };
        let manager = QueueManager::new(jobs.clone(), metrics.clone(), ledger.clone(), self.pricing)
            .with_config(self.config)
            .with_admission_config(admission)
            .with_retry_strategy(self.retry);

        Harness {
            manager: Arc::new(manager),
            ledger,
            jobs,
            metrics,
        }
    }
}

/// Standard pricing, immediate retries, 10 credits for `tenant()`.
pub fn harness() -> HarnessBuilder {
    HarnessBuilder {
        config: test_config(),
        pricing: Arc::new(SurgeSchedule::default()),
        retry: Arc::new(FixedDelay(Duration::ZERO)),
        balance: Credits::whole(10),
    }
}

pub fn ocr(priority: Priority) -> JobRequest {
    JobRequest::new(
        tenant(),
        OperationType::Ocr,
        json!({"document_id": "doc-1", "emission_volume_tons": 1}),
    )
    .with_priority(priority)
}

/// Poll `check` every 20ms until it returns true or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
