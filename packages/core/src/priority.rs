//! Priority tiers and surge escalation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Priority tier requested by the caller.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::Normal, Priority::High, Priority::Urgent];

    /// Score stored on the job row. Workers claim higher scores first.
    pub const fn score(self) -> i32 {
        self as i32 * 10
    }

    /// Tier whose score band contains `score`.
    pub fn from_score(score: i32) -> Priority {
        if score >= Priority::Urgent.score() {
            Priority::Urgent
        } else if score >= Priority::High.score() {
            Priority::High
        } else {
            Priority::Normal
        }
    }

    /// The next tier up, saturating at urgent.
    pub fn promoted(self) -> Priority {
        match self {
            Priority::Normal => Priority::High,
            Priority::High | Priority::Urgent => Priority::Urgent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown priority: {0} (expected normal, high or urgent)")]
pub struct UnknownPriority(pub String);

impl FromStr for Priority {
    type Err = UnknownPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            _ => Err(UnknownPriority(s.to_string())),
        }
    }
}

/// Effective priority score for a job admitted at `requested` tier.
///
/// While surge pricing is active every non-urgent request moves up one tier so
/// that jobs paying the surge price keep their SLA. Urgent stays urgent.
pub fn priority_score(requested: Priority, surge_active: bool) -> i32 {
    effective_priority(requested, surge_active).score()
}

pub fn effective_priority(requested: Priority, surge_active: bool) -> Priority {
    if surge_active {
        requested.promoted()
    } else {
        requested
    }
}
