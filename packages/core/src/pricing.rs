//! Pricing snapshot shared between admission and reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Multiplier and surge status at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    pub multiplier: f64,
    pub is_surge_active: bool,
    pub reason: String,
    pub valid_at: DateTime<Utc>,
    /// True when the pricing source could not be read and defaults were used.
    #[serde(default)]
    pub fallback: bool,
}

impl PricingSnapshot {
    /// Off-peak pricing.
    pub fn standard(at: DateTime<Utc>) -> Self {
        Self {
            multiplier: 1.0,
            is_surge_active: false,
            reason: "standard pricing".to_string(),
            valid_at: at,
            fallback: false,
        }
    }

    pub fn surge(multiplier: f64, reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            multiplier,
            is_surge_active: true,
            reason: reason.into(),
            valid_at: at,
            fallback: false,
        }
    }

    /// Used when the pricing source fails. Never blocks admission.
    pub fn fallback(at: DateTime<Utc>, cause: impl std::fmt::Display) -> Self {
        Self {
            multiplier: 1.0,
            is_surge_active: false,
            reason: format!("pricing unavailable: {cause}"),
            valid_at: at,
            fallback: true,
        }
    }
}
