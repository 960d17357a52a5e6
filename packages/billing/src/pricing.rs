//! Surge pricing.
//!
//! Pricing is a pure function of wall-clock time: a list of daily UTC windows,
//! each with a multiplier. Outside every window the multiplier is 1.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use queue_core::PricingSnapshot;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PricingError {
    #[error("pricing source unavailable: {0}")]
    Unavailable(String),
    #[error("invalid multiplier {0}")]
    InvalidMultiplier(f64),
}

#[async_trait]
pub trait PricingOracle: Send + Sync {
    async fn multiplier(&self, at: DateTime<Utc>) -> Result<f64, PricingError>;

    async fn is_surge_active(&self, at: DateTime<Utc>) -> Result<bool, PricingError>;

    /// Both readings at `at`, with a human readable reason.
    async fn snapshot(&self, at: DateTime<Utc>) -> Result<PricingSnapshot, PricingError> {
        let multiplier = self.multiplier(at).await?;
        if self.is_surge_active(at).await? {
            Ok(PricingSnapshot::surge(multiplier, "surge pricing", at))
        } else {
            Ok(PricingSnapshot {
                multiplier,
                ..PricingSnapshot::standard(at)
            })
        }
    }
}

/// A daily window `[start, end)` in UTC. Wraps midnight when `end < start`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurgeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub multiplier: f64,
}

impl SurgeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime, multiplier: f64) -> Self {
        Self {
            start,
            end,
            multiplier,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let time = at.time();
        if self.start <= self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

impl fmt::Display for SurgeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}@{}",
            self.start.hour(),
            self.start.minute(),
            self.end.hour(),
            self.end.minute(),
            self.multiplier
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid surge window '{input}': {reason}")]
pub struct SurgeWindowParseError {
    pub input: String,
    pub reason: &'static str,
}

impl FromStr for SurgeWindow {
    type Err = SurgeWindowParseError;

    /// Parses `HH:MM-HH:MM@multiplier`, e.g. `08:00-10:00@2.0`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| SurgeWindowParseError {
            input: s.to_string(),
            reason,
        };
        let (range, multiplier) = s.trim().split_once('@').ok_or_else(|| err("missing '@'"))?;
        let (start, end) = range.split_once('-').ok_or_else(|| err("missing '-'"))?;
        let start = NaiveTime::parse_from_str(start.trim(), "%H:%M")
            .map_err(|_| err("start is not HH:MM"))?;
        let end = NaiveTime::parse_from_str(end.trim(), "%H:%M")
            .map_err(|_| err("end is not HH:MM"))?;
        let multiplier: f64 = multiplier
            .trim()
            .parse()
            .map_err(|_| err("multiplier is not a number"))?;
        if start == end {
            return Err(err("window is empty"));
        }
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(err("multiplier must be positive"));
        }
        Ok(SurgeWindow::new(start, end, multiplier))
    }
}

/// Time-of-day surge schedule. With no windows, pricing is always standard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurgeSchedule {
    windows: Vec<SurgeWindow>,
}

impl SurgeSchedule {
    pub fn new(windows: Vec<SurgeWindow>) -> Self {
        Self { windows }
    }

    /// Parse a comma separated list of windows. Empty input means no surge.
    pub fn parse(list: &str) -> Result<Self, SurgeWindowParseError> {
        let windows = list
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<SurgeWindow>, _>>()?;
        Ok(Self::new(windows))
    }

    pub fn windows(&self) -> &[SurgeWindow] {
        &self.windows
    }

    /// The most expensive window covering `at`.
    pub fn active_window(&self, at: DateTime<Utc>) -> Option<&SurgeWindow> {
        self.windows
            .iter()
            .filter(|w| w.contains(at))
            .max_by(|a, b| a.multiplier.total_cmp(&b.multiplier))
    }

    /// Pricing at `at`, computed without I/O.
    pub fn snapshot_at(&self, at: DateTime<Utc>) -> PricingSnapshot {
        match self.active_window(at) {
            Some(window) => {
                PricingSnapshot::surge(window.multiplier, format!("surge window {window}"), at)
            }
            None => PricingSnapshot::standard(at),
        }
    }
}

impl FromStr for SurgeSchedule {
    type Err = SurgeWindowParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[async_trait]
impl PricingOracle for SurgeSchedule {
    async fn multiplier(&self, at: DateTime<Utc>) -> Result<f64, PricingError> {
        Ok(self.active_window(at).map_or(1.0, |w| w.multiplier))
    }

    async fn is_surge_active(&self, at: DateTime<Utc>) -> Result<bool, PricingError> {
        Ok(self.active_window(at).is_some())
    }

    async fn snapshot(&self, at: DateTime<Utc>) -> Result<PricingSnapshot, PricingError> {
        Ok(self.snapshot_at(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 31, hour, minute, 0).unwrap()
    }

    #[test]
    fn parses_window_list() {
        let schedule = SurgeSchedule::parse("08:00-10:00@2.0, 17:30-19:00@1.5").unwrap();
        assert_eq!(schedule.windows().len(), 2);
        assert_eq!(schedule.windows()[1].multiplier, 1.5);
        assert_eq!(schedule.windows()[0].to_string(), "08:00-10:00@2");
        assert!(SurgeSchedule::parse("").unwrap().windows().is_empty());
    }

    #[test]
    fn rejects_malformed_windows() {
        assert!("08:00-10:00".parse::<SurgeWindow>().is_err());
        assert!("8-10@2".parse::<SurgeWindow>().is_err());
        assert!("08:00-08:00@2".parse::<SurgeWindow>().is_err());
        assert!("08:00-10:00@-1".parse::<SurgeWindow>().is_err());
        assert!("08:00-10:00@lots".parse::<SurgeWindow>().is_err());
    }

    #[test]
    fn window_bounds_are_half_open() {
        let schedule = SurgeSchedule::parse("08:00-10:00@2.0").unwrap();
        assert!(!schedule.snapshot_at(at(7, 59)).is_surge_active);
        assert!(schedule.snapshot_at(at(8, 0)).is_surge_active);
        assert!(schedule.snapshot_at(at(9, 59)).is_surge_active);
        assert!(!schedule.snapshot_at(at(10, 0)).is_surge_active);
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let schedule = SurgeSchedule::parse("22:00-02:00@1.5").unwrap();
        assert!(schedule.snapshot_at(at(23, 0)).is_surge_active);
        assert!(schedule.snapshot_at(at(1, 30)).is_surge_active);
        assert!(!schedule.snapshot_at(at(12, 0)).is_surge_active);
    }

    #[test]
    fn overlapping_windows_use_highest_multiplier() {
        let schedule = SurgeSchedule::parse("08:00-12:00@1.5,09:00-10:00@3").unwrap();
        let snapshot = schedule.snapshot_at(at(9, 30));
        assert_eq!(snapshot.multiplier, 3.0);
        assert!(snapshot.reason.contains("09:00-10:00"));
    }

    #[tokio::test]
    async fn oracle_matches_pure_snapshot() {
        let schedule = SurgeSchedule::parse("08:00-10:00@2.0").unwrap();
        assert_eq!(schedule.multiplier(at(9, 0)).await.unwrap(), 2.0);
        assert!(schedule.is_surge_active(at(9, 0)).await.unwrap());
        assert_eq!(schedule.multiplier(at(11, 0)).await.unwrap(), 1.0);
        assert!(!schedule.is_surge_active(at(11, 0)).await.unwrap());
    }
}
