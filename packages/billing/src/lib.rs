//! Credits, pricing and admission control for the job queue.

pub mod admission;
pub mod ledger;
pub mod pricing;
pub mod rate_limit;

pub use admission::{
    AdmissionConfig, AdmissionController, AdmissionDecision, AdmissionError, CostTable,
    CostTableParseError,
};
pub use ledger::{CreditsLedger, DebitReceipt, InMemoryCreditsLedger, LedgerError};
pub use pricing::{PricingError, PricingOracle, SurgeSchedule, SurgeWindow, SurgeWindowParseError};
pub use rate_limit::{RateLimit, SlidingWindowLimiter};
