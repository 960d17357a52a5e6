//! Tenant, operation and credit amount types used for billing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of the tenant that owns a job and pays for it.
///
/// Tenants are issued by the account system, so the value is kept opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Billable operation a job performs. Each one has a base cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Text extraction from an uploaded document.
    Ocr,
    /// Emission figures computed from extracted activity data.
    EmissionCalculation,
    /// Rendering of the regulatory report.
    ReportGeneration,
}

impl OperationType {
    pub const ALL: [OperationType; 3] = [
        OperationType::Ocr,
        OperationType::EmissionCalculation,
        OperationType::ReportGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Ocr => "ocr",
            OperationType::EmissionCalculation => "emission_calculation",
            OperationType::ReportGeneration => "report_generation",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation type: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for OperationType {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationType::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperation(s.to_string()))
    }
}

/// A credit amount stored as an integer number of milli-credits.
///
/// `Credits::from_millis(150)` is 0.15 credits. Integer storage keeps
/// balance arithmetic exact across admission and debit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Credits(i64);

pub const MILLIS_PER_CREDIT: i64 = 1_000;

impl Credits {
    pub const ZERO: Credits = Credits(0);

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn whole(credits: i64) -> Self {
        Self(credits * MILLIS_PER_CREDIT)
    }

    pub const fn millis(self) -> i64 {
        self.0
    }

    /// Multiply by a pricing multiplier, rounding to the nearest milli-credit.
    pub fn scale(self, multiplier: f64) -> Self {
        Self((self.0 as f64 * multiplier).round() as i64)
    }

    pub fn checked_sub(self, other: Credits) -> Option<Credits> {
        self.0.checked_sub(other.0).map(Credits)
    }

    pub fn checked_add(self, other: Credits) -> Option<Credits> {
        self.0.checked_add(other.0).map(Credits)
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl std::ops::Add for Credits {
    type Output = Credits;

    fn add(self, rhs: Credits) -> Credits {
        Credits(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Credits {
    type Output = Credits;

    fn sub(self, rhs: Credits) -> Credits {
        Credits(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Credits {
    fn sum<I: Iterator<Item = Credits>>(iter: I) -> Credits {
        iter.fold(Credits::ZERO, |acc, c| acc + c)
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / MILLIS_PER_CREDIT as u64;
        let frac = abs % MILLIS_PER_CREDIT as u64;
        if frac == 0 {
            write!(f, "{sign}{whole}")
        } else {
            let digits = format!("{frac:03}");
            write!(f, "{sign}{whole}.{}", digits.trim_end_matches('0'))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreditsParseError {
    #[error("empty credit amount")]
    Empty,
    #[error("invalid credit amount: {0}")]
    Invalid(String),
    #[error("credit amount {0} has more than 3 decimal places")]
    TooPrecise(String),
}

impl FromStr for Credits {
    type Err = CreditsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CreditsParseError::Empty);
        }
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(CreditsParseError::Invalid(s.to_string()));
        }
        if frac.len() > 3 {
            return Err(CreditsParseError::TooPrecise(s.to_string()));
        }
        let all_digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if !all_digits(whole) || !all_digits(frac) {
            return Err(CreditsParseError::Invalid(s.to_string()));
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| CreditsParseError::Invalid(s.to_string()))?
        };
        let frac: i64 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<3}")
                .parse()
                .map_err(|_| CreditsParseError::Invalid(s.to_string()))?
        };

        let millis = whole
            .checked_mul(MILLIS_PER_CREDIT)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(|| CreditsParseError::Invalid(s.to_string()))?;
        Ok(Credits(if negative { -millis } else { millis }))
    }
}
