//! Admission control: turn a submission into a priced, prioritised decision.
//!
//! Admission only reads. The balance check is advisory; the debit at
//! completion is authoritative.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{
    Credits, OperationType, PricingSnapshot, Priority, TenantId, effective_priority,
};
use serde::{Deserialize, Serialize};

use crate::ledger::CreditsLedger;
use crate::pricing::{PricingError, PricingOracle};
use crate::rate_limit::{RateLimit, SlidingWindowLimiter};

/// Base cost of each billable operation before the pricing multiplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostTable(BTreeMap<OperationType, Credits>);

impl Default for CostTable {
    fn default() -> Self {
        Self(BTreeMap::from([
            (OperationType::Ocr, Credits::from_millis(100)),
            (OperationType::EmissionCalculation, Credits::from_millis(250)),
            (OperationType::ReportGeneration, Credits::whole(1)),
        ]))
    }
}

impl CostTable {
    pub fn with(mut self, operation: OperationType, cost: Credits) -> Self {
        self.0.insert(operation, cost);
        self
    }

    pub fn base_cost(&self, operation: OperationType) -> Credits {
        self.0.get(&operation).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid operation cost '{0}' (expected op=amount)")]
pub struct CostTableParseError(pub String);

impl FromStr for CostTable {
    type Err = CostTableParseError;

    /// Parses `ocr=0.1,report_generation=1.0`. Unlisted operations keep
    /// their default cost.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut table = CostTable::default();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let err = || CostTableParseError(entry.to_string());
            let (op, cost) = entry.split_once('=').ok_or_else(err)?;
            let op: OperationType = op.trim().parse().map_err(|_| err())?;
            let cost: Credits = cost.trim().parse().map_err(|_| err())?;
            if cost.is_negative() {
                return Err(err());
            }
            table = table.with(op, cost);
        }
        Ok(table)
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub costs: CostTable,
    /// Upper bound for each ledger or pricing call.
    pub call_timeout: Duration,
    pub rate_limit: Option<RateLimit>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            costs: CostTable::default(),
            call_timeout: Duration::from_secs(2),
            rate_limit: Some(RateLimit {
                window: Duration::from_secs(60),
                max: 100,
            }),
        }
    }
}

/// An approved admission. Never persisted; the job copies what it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub tenant_id: TenantId,
    pub operation: OperationType,
    pub requested_priority: Priority,
    /// Tier after surge escalation.
    pub priority: Priority,
    pub priority_score: i32,
    pub base_cost: Credits,
    pub reserved_cost: Credits,
    pub multiplier: f64,
    pub pricing: PricingSnapshot,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdmissionError {
    #[error("insufficient credits: {required} required, {available} available")]
    InsufficientCredits {
        required: Credits,
        available: Credits,
    },
    #[error("too many submissions: at most {max} per {window_secs}s")]
    RateLimited {
        max: u32,
        window_secs: u64,
        retry_after_secs: u64,
    },
    #[error("credit balance unavailable: {0}")]
    LedgerUnavailable(String),
}

impl AdmissionError {
    /// Stable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            AdmissionError::RateLimited { .. } => "RATE_LIMITED",
            AdmissionError::LedgerUnavailable(_) => "LEDGER_UNAVAILABLE",
        }
    }

    /// Whether submitting again later may succeed without a top-up.
    pub fn is_transient(&self) -> bool {
        !matches!(self, AdmissionError::InsufficientCredits { .. })
    }
}

pub struct AdmissionController {
    ledger: Arc<dyn CreditsLedger>,
    pricing: Arc<dyn PricingOracle>,
    config: AdmissionConfig,
    limiter: Option<SlidingWindowLimiter>,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AdmissionController {
    pub fn new(
        ledger: Arc<dyn CreditsLedger>,
        pricing: Arc<dyn PricingOracle>,
        config: AdmissionConfig,
    ) -> Self {
        let limiter = config.rate_limit.map(SlidingWindowLimiter::new);
        Self {
            ledger,
            pricing,
            config,
            limiter,
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    pub async fn admit(
        &self,
        tenant: &TenantId,
        operation: OperationType,
        requested: Priority,
    ) -> Result<AdmissionDecision, AdmissionError> {
        self.admit_at(tenant, operation, requested, Utc::now()).await
    }

    /// Admission as of `at`.
    pub async fn admit_at(
        &self,
        tenant: &TenantId,
        operation: OperationType,
        requested: Priority,
        at: DateTime<Utc>,
    ) -> Result<AdmissionDecision, AdmissionError> {
        let balance = match tokio::time::timeout(
            self.config.call_timeout,
            self.ledger.get_balance(tenant),
        )
        .await
        {
            Ok(Ok(balance)) => balance,
            Ok(Err(err)) => return Err(AdmissionError::LedgerUnavailable(err.to_string())),
            Err(_) => {
                return Err(AdmissionError::LedgerUnavailable(format!(
                    "no answer within {}ms",
                    self.config.call_timeout.as_millis()
                )));
            }
        };

        let pricing = self.pricing_at(at).await;
        let base_cost = self.config.costs.base_cost(operation);
        let reserved_cost = base_cost.scale(pricing.multiplier);

        if balance < reserved_cost {
            tracing::debug!(
                tenant = %tenant,
                %balance,
                required = %reserved_cost,
                "Admission rejected: insufficient credits"
            );
            return Err(AdmissionError::InsufficientCredits {
                required: reserved_cost,
                available: balance,
            });
        }

        if let Some(limiter) = &self.limiter {
            if let Err(retry_after) = limiter.try_acquire(tenant, at).await {
                let limit = limiter.limit();
                return Err(AdmissionError::RateLimited {
                    max: limit.max,
                    window_secs: limit.window.as_secs(),
                    retry_after_secs: retry_after.as_secs().max(1),
                });
            }
        }

        let priority = effective_priority(requested, pricing.is_surge_active);
        Ok(AdmissionDecision {
            tenant_id: tenant.clone(),
            operation,
            requested_priority: requested,
            priority,
            priority_score: priority.score(),
            base_cost,
            reserved_cost,
            multiplier: pricing.multiplier,
            pricing,
        })
    }

    /// Current pricing, or standard pricing when the oracle fails, times out or
    /// returns a nonsensical multiplier.
    pub async fn pricing_at(&self, at: DateTime<Utc>) -> PricingSnapshot {
        let snapshot = match tokio::time::timeout(self.config.call_timeout, self.pricing.snapshot(at))
            .await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(err)) => return self.fallback(at, err),
            Err(_) => return self.fallback(at, "timed out"),
        };

        if !snapshot.multiplier.is_finite() || snapshot.multiplier <= 0.0 {
            return self.fallback(at, PricingError::InvalidMultiplier(snapshot.multiplier));
        }
        snapshot
    }

    fn fallback(&self, at: DateTime<Utc>, cause: impl std::fmt::Display) -> PricingSnapshot {
        tracing::warn!("Pricing unavailable, using standard pricing: {}", cause);
        PricingSnapshot::fallback(at, cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InMemoryCreditsLedger, LedgerError};
    use crate::pricing::SurgeSchedule;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use queue_core::JobId;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 31, hour, 15, 0).unwrap()
    }

    async fn controller_with_balance(
        balance: Credits,
        pricing: Arc<dyn PricingOracle>,
        config: AdmissionConfig,
    ) -> (AdmissionController, TenantId) {
        let ledger = InMemoryCreditsLedger::arc();
        let tenant = TenantId::new("tenant-a");
        ledger.set_balance(&tenant, balance).await;
        (AdmissionController::new(ledger, pricing, config), tenant)
    }

    fn surge_schedule() -> Arc<dyn PricingOracle> {
        Arc::new(SurgeSchedule::parse("08:00-10:00@2.0").unwrap())
    }

    #[tokio::test]
    async fn surge_doubles_reserved_cost_and_promotes() {
        let (controller, tenant) =
            controller_with_balance(Credits::whole(1), surge_schedule(), AdmissionConfig::default())
                .await;

        let inside = controller
            .admit_at(&tenant, OperationType::Ocr, Priority::Normal, at(9))
            .await
            .unwrap();
        assert_eq!(inside.reserved_cost, "0.2".parse().unwrap());
        assert_eq!(inside.multiplier, 2.0);
        assert_eq!(inside.priority, Priority::High);
        assert!(inside.pricing.is_surge_active);

        let outside = controller
            .admit_at(&tenant, OperationType::Ocr, Priority::Normal, at(11))
            .await
            .unwrap();
        assert_eq!(outside.reserved_cost, "0.1".parse().unwrap());
        assert_eq!(outside.priority, Priority::Normal);
        assert_eq!(outside.priority_score, Priority::Normal.score());
    }

    #[tokio::test]
    async fn rejects_when_balance_is_short() {
        let (controller, tenant) = controller_with_balance(
            "0.15".parse().unwrap(),
            surge_schedule(),
            AdmissionConfig::default(),
        )
        .await;

        let err = controller
            .admit_at(&tenant, OperationType::Ocr, Priority::Urgent, at(9))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AdmissionError::InsufficientCredits {
                required: Credits::from_millis(200),
                available: Credits::from_millis(150),
            }
        );
        assert_eq!(err.code(), "INSUFFICIENT_CREDITS");
        assert!(!err.is_transient());
    }

    #[derive(Debug)]
    struct BrokenPricing;

    #[async_trait]
    impl PricingOracle for BrokenPricing {
        async fn multiplier(&self, _at: DateTime<Utc>) -> Result<f64, PricingError> {
            Err(PricingError::Unavailable("upstream 503".into()))
        }

        async fn is_surge_active(&self, _at: DateTime<Utc>) -> Result<bool, PricingError> {
            Err(PricingError::Unavailable("upstream 503".into()))
        }
    }

    #[tokio::test]
    async fn pricing_failure_falls_back_to_standard() {
        let (controller, tenant) = controller_with_balance(
            Credits::whole(1),
            Arc::new(BrokenPricing),
            AdmissionConfig::default(),
        )
        .await;

        let decision = controller
            .admit_at(&tenant, OperationType::Ocr, Priority::Normal, at(9))
            .await
            .unwrap();
        assert_eq!(decision.multiplier, 1.0);
        assert_eq!(decision.reserved_cost, Credits::from_millis(100));
        assert!(decision.pricing.fallback);
        assert!(decision.pricing.reason.contains("upstream 503"));
    }

    #[derive(Debug)]
    struct NegativePricing;

    #[async_trait]
    impl PricingOracle for NegativePricing {
        async fn multiplier(&self, _at: DateTime<Utc>) -> Result<f64, PricingError> {
            Ok(-3.0)
        }

        async fn is_surge_active(&self, _at: DateTime<Utc>) -> Result<bool, PricingError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn invalid_multiplier_is_treated_as_unavailable() {
        let (controller, tenant) = controller_with_balance(
            Credits::whole(1),
            Arc::new(NegativePricing),
            AdmissionConfig::default(),
        )
        .await;

        let decision = controller
            .admit_at(&tenant, OperationType::Ocr, Priority::High, at(9))
            .await
            .unwrap();
        assert_eq!(decision.multiplier, 1.0);
        assert_eq!(decision.priority, Priority::High);
        assert!(decision.pricing.fallback);
    }

    #[derive(Debug)]
    struct SlowLedger;

    #[async_trait]
    impl CreditsLedger for SlowLedger {
        async fn get_balance(&self, _tenant: &TenantId) -> Result<Credits, LedgerError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Credits::whole(100))
        }

        async fn debit(
            &self,
            _tenant: &TenantId,
            _amount: Credits,
            _reference: JobId,
        ) -> Result<crate::ledger::DebitReceipt, LedgerError> {
            Err(LedgerError::Unavailable("slow".into()))
        }
    }

    #[tokio::test]
    async fn slow_ledger_rejects_as_transient() {
        let config = AdmissionConfig {
            call_timeout: Duration::from_millis(50),
            ..AdmissionConfig::default()
        };
        let controller = AdmissionController::new(Arc::new(SlowLedger), surge_schedule(), config);

        let err = controller
            .admit_at(&TenantId::new("t"), OperationType::Ocr, Priority::Normal, at(9))
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::LedgerUnavailable(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn rate_limit_counts_only_approved_admissions() {
        let config = AdmissionConfig {
            rate_limit: Some(RateLimit {
                window: Duration::from_secs(60),
                max: 1,
            }),
            ..AdmissionConfig::default()
        };
        let (controller, tenant) =
            controller_with_balance(Credits::from_millis(150), surge_schedule(), config).await;

        // Rejected for balance during surge; does not use up the window.
        assert!(
            controller
                .admit_at(&tenant, OperationType::Ocr, Priority::Normal, at(9))
                .await
                .is_err()
        );
        assert!(
            controller
                .admit_at(&tenant, OperationType::Ocr, Priority::Normal, at(11))
                .await
                .is_ok()
        );
        let err = controller
            .admit_at(&tenant, OperationType::Ocr, Priority::Normal, at(11))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RATE_LIMITED");
    }

    #[test]
    fn parses_cost_overrides() {
        let table: CostTable = "ocr=0.05, report_generation=2".parse().unwrap();
        assert_eq!(table.base_cost(OperationType::Ocr), Credits::from_millis(50));
        assert_eq!(table.base_cost(OperationType::ReportGeneration), Credits::whole(2));
        assert_eq!(
            table.base_cost(OperationType::EmissionCalculation),
            Credits::from_millis(250)
        );
        assert!("ocr".parse::<CostTable>().is_err());
        assert!("fax=1".parse::<CostTable>().is_err());
        assert!("ocr=-1".parse::<CostTable>().is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn reserved_cost_grows_with_multiplier(base in 0i64..10_000, m1 in 0.1f64..5.0, m2 in 0.1f64..5.0) {
                let base = Credits::from_millis(base);
                let (lo, hi) = if m1 <= m2 { (m1, m2) } else { (m2, m1) };
                prop_assert!(base.scale(lo) <= base.scale(hi));
            }
        }
    }
}
