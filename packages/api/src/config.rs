//! Environment-sourced settings.
//!
//! Every variable has a default, so an empty environment yields a working
//! local setup: in-memory SurrealDB, standard pricing, one `ocr-processing`
//! queue. A value that is present but malformed is an error naming the
//! variable; startup should abort on it.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use billing::{AdmissionConfig, CostTable, RateLimit, SurgeSchedule};
use db::DbConfig;
use queue_core::{ExponentialBackoff, QueueConfig};
use thiserror::Error;

/// Longest accepted job expiry, one century.
const MAX_JOB_EXPIRY_HOURS: u64 = 24 * 365 * 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} and {1} must be set together")]
    Incomplete(&'static str, &'static str),
}

impl ConfigError {
    /// The variable at fault.
    pub fn var(&self) -> &'static str {
        match self {
            ConfigError::Invalid { var, .. } => var,
            ConfigError::Incomplete(var, _) => var,
        }
    }
}

/// Everything needed to bootstrap the queue system.
#[derive(Debug, Clone)]
pub struct Settings {
    pub queue: QueueConfig,
    pub admission: AdmissionConfig,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub metrics_retention_days: u32,
    pub surge: SurgeSchedule,
    pub database: DbConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            admission: AdmissionConfig::default(),
            retry_base: Duration::from_secs(2),
            retry_max: Duration::from_secs(300),
            metrics_retention_days: 7,
            surge: SurgeSchedule::default(),
            database: DbConfig::default(),
        }
    }
}

/// Reads variables through a lookup function. Blank values count as unset.
struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.raw(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(var) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    /// Like `parse`, rejecting zero.
    fn positive(&self, var: &'static str, default: u64) -> Result<u64, ConfigError> {
        let value = self.parse(var, default)?;
        if value == 0 {
            return Err(ConfigError::Invalid {
                var,
                value: value.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    /// Like `positive`, also rejecting values above `max`.
    fn bounded(&self, var: &'static str, default: u64, max: u64) -> Result<u64, ConfigError> {
        let value = self.positive(var, default)?;
        if value > max {
            return Err(ConfigError::Invalid {
                var,
                value: value.to_string(),
                reason: format!("must be at most {max}"),
            });
        }
        Ok(value)
    }
}

fn to_u32(var: &'static str, value: u64) -> Result<u32, ConfigError> {
    u32::try_from(value).map_err(|e| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

impl Settings {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load through `lookup`, which returns a variable's value if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = QueueConfig::default();

        let queue = QueueConfig {
            queue_name: env.string("QUEUE_NAME", &defaults.queue_name),
            concurrency: to_u32(
                "WORKER_CONCURRENCY",
                env.positive("WORKER_CONCURRENCY", defaults.concurrency.into())?,
            )?,
            max_in_flight: to_u32(
                "MAX_IN_FLIGHT_JOBS",
                env.positive("MAX_IN_FLIGHT_JOBS", defaults.max_in_flight.into())?,
            )?,
            default_max_retries: env.parse("JOB_RETRY_LIMIT", defaults.default_max_retries)?,
            job_ttl_hours: env.bounded("JOB_EXPIRY_HOURS", 1, MAX_JOB_EXPIRY_HOURS)? as i64,
            job_timeout_secs: env.positive("JOB_TIMEOUT_SECS", defaults.job_timeout_secs)?,
            poll_interval_ms: env
                .positive("QUEUE_POLL_INTERVAL_SECS", 5)?
                .saturating_mul(1_000),
            housekeeping_interval_secs: env.positive(
                "HOUSEKEEPING_INTERVAL_SECS",
                defaults.housekeeping_interval_secs,
            )?,
            completed_retention_hours: env.parse(
                "COMPLETED_JOB_RETENTION_HOURS",
                defaults.completed_retention_hours,
            )?,
        };

        let retry_base = Duration::from_secs(env.parse("RETRY_BASE_DELAY_SECS", 2)?);
        let retry_max = Duration::from_secs(env.parse("RETRY_MAX_DELAY_SECS", 300)?);
        if retry_max < retry_base {
            return Err(ConfigError::Invalid {
                var: "RETRY_MAX_DELAY_SECS",
                value: retry_max.as_secs().to_string(),
                reason: "must not be below RETRY_BASE_DELAY_SECS".to_string(),
            });
        }

        // A max of zero turns the limiter off.
        let rate_window = env.positive("ADMISSION_RATE_LIMIT_WINDOW_SECS", 60)?;
        let rate_max: u32 = env.parse("ADMISSION_RATE_LIMIT_MAX", 100)?;
        let rate_limit = (rate_max > 0).then(|| RateLimit {
            window: Duration::from_secs(rate_window),
            max: rate_max,
        });

        let admission = AdmissionConfig {
            costs: env.parse("OPERATION_COSTS", CostTable::default())?,
            call_timeout: Duration::from_millis(env.positive("EXTERNAL_CALL_TIMEOUT_MS", 2_000)?),
            rate_limit,
        };

        let metrics_retention_days = to_u32(
            "METRICS_RETENTION_DAYS",
            env.positive("METRICS_RETENTION_DAYS", 7)?,
        )?;
        let surge = env.parse("SURGE_WINDOWS", SurgeSchedule::default())?;

        let db_defaults = DbConfig::default();
        let mut database = DbConfig::default()
            .with_endpoint(env.string("DATABASE_URL", &db_defaults.endpoint))
            .with_namespace(env.string("DATABASE_NAMESPACE", &db_defaults.namespace))
            .with_database(env.string("DATABASE_NAME", &db_defaults.database));
        match (env.raw("DATABASE_USER"), env.raw("DATABASE_PASSWORD")) {
            (Some(user), Some(password)) => database = database.with_credentials(user, password),
            (None, None) => {}
            (Some(_), None) => {
                return Err(ConfigError::Incomplete("DATABASE_PASSWORD", "DATABASE_USER"));
            }
            (None, Some(_)) => {
                return Err(ConfigError::Incomplete("DATABASE_USER", "DATABASE_PASSWORD"));
            }
        }

        Ok(Self {
            queue,
            admission,
            retry_base,
            retry_max,
            metrics_retention_days,
            surge,
            database,
        })
    }

    pub fn retry_strategy(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.retry_base, self.retry_max)
    }

    pub fn metric_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.metrics_retention_days))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use queue_core::{Credits, OperationType};

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let settings = load(&[]).unwrap();
        assert_eq!(settings.queue, QueueConfig::default());
        assert_eq!(settings.database, DbConfig::default());
        assert_eq!(settings.metrics_retention_days, 7);
        assert_eq!(settings.admission.call_timeout, Duration::from_secs(2));
        assert_eq!(
            settings.admission.rate_limit,
            Some(RateLimit {
                window: Duration::from_secs(60),
                max: 100
            })
        );
        assert!(settings.surge.windows().is_empty());
        assert_eq!(settings.retry_strategy(), ExponentialBackoff::default());
    }

    #[test]
    fn values_override_defaults() {
        let settings = load(&[
            ("QUEUE_NAME", "reports"),
            ("WORKER_CONCURRENCY", "8"),
            ("QUEUE_POLL_INTERVAL_SECS", "2"),
            ("JOB_EXPIRY_HOURS", "6"),
            ("SURGE_WINDOWS", "08:00-10:00@2.0, 17:00-19:00@1.5"),
            ("OPERATION_COSTS", "ocr=0.2"),
            ("ADMISSION_RATE_LIMIT_MAX", "0"),
            ("DATABASE_URL", "ws://db:8000"),
            ("DATABASE_USER", "root"),
            ("DATABASE_PASSWORD", "secret"),
        ])
        .unwrap();

        assert_eq!(settings.queue.queue_name, "reports");
        assert_eq!(settings.queue.concurrency, 8);
        assert_eq!(settings.queue.poll_interval_ms, 2_000);
        assert_eq!(settings.queue.job_ttl_hours, 6);
        assert_eq!(
            load(&[("JOB_EXPIRY_HOURS", "876000")]).unwrap().queue.job_ttl_hours,
            876_000
        );
        assert_eq!(settings.surge.windows().len(), 2);
        assert_eq!(
            settings.admission.costs.base_cost(OperationType::Ocr),
            Credits::from_millis(200)
        );
        assert_eq!(
            settings.admission.costs.base_cost(OperationType::ReportGeneration),
            Credits::whole(1)
        );
        assert_eq!(settings.admission.rate_limit, None);
        assert_eq!(settings.database.endpoint, "ws://db:8000");
        assert_eq!(
            settings.database.credentials,
            Some(("root".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn blank_values_count_as_unset() {
        let settings = load(&[("WORKER_CONCURRENCY", "  "), ("SURGE_WINDOWS", "")]).unwrap();
        assert_eq!(settings.queue.concurrency, 4);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let cases = [
            ("WORKER_CONCURRENCY", "four"),
            ("WORKER_CONCURRENCY", "0"),
            ("JOB_RETRY_LIMIT", "-1"),
            ("SURGE_WINDOWS", "08:00@2.0"),
            ("OPERATION_COSTS", "ocr=-1"),
            ("EXTERNAL_CALL_TIMEOUT_MS", "0"),
            ("METRICS_RETENTION_DAYS", "soon"),
            ("JOB_EXPIRY_HOURS", "0"),
            ("JOB_EXPIRY_HOURS", "876001"),
            ("JOB_EXPIRY_HOURS", "9223372036854775807"),
        ];
        for (var, value) in cases {
            let err = load(&[(var, value)]).unwrap_err();
            assert_eq!(err.var(), var, "{var}={value}");
        }
    }

    #[test]
    fn backoff_cap_must_cover_base() {
        let err = load(&[("RETRY_BASE_DELAY_SECS", "10"), ("RETRY_MAX_DELAY_SECS", "5")])
            .unwrap_err();
        assert_eq!(err.var(), "RETRY_MAX_DELAY_SECS");
    }

    #[test]
    fn credentials_come_in_pairs() {
        let err = load(&[("DATABASE_USER", "root")]).unwrap_err();
        assert_eq!(err, ConfigError::Incomplete("DATABASE_PASSWORD", "DATABASE_USER"));
    }
}
