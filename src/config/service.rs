//! Service configuration, loadable from JSON or `LOTKEEPER_*` environment
//! variables.

use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::core::job::JobKind;
use crate::core::recurrence::RecurrenceRule;
use crate::core::retry::{Backoff, RetryPolicy};

/// Prefix shared by every environment variable.
pub const ENV_PREFIX: &str = "LOTKEEPER_";

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document did not deserialize.
    #[error("parse error: {0}")]
    Parse(String),
    /// A value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// An environment variable did not parse.
    #[error("environment variable {var}: {reason}")]
    Env {
        /// Full variable name.
        var: String,
        /// What went wrong.
        reason: String,
    },
}

/// Worker pool sizing and timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Concurrent job executions.
    pub worker_count: usize,
    /// Pending backlog ceiling.
    pub max_pending: usize,
    /// Per-execution timeout in seconds.
    pub job_timeout_secs: u64,
    /// Longest a worker idles before re-checking the queue, in milliseconds.
    pub idle_wait_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            max_pending: 1024,
            job_timeout_secs: 60,
            idle_wait_ms: 1_000,
        }
    }
}

impl WorkerPoolConfig {
    /// Defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of workers.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the pending backlog ceiling.
    #[must_use]
    pub const fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Set the per-execution timeout.
    #[must_use]
    pub const fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the idle re-check interval.
    #[must_use]
    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Per-execution timeout.
    pub const fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Idle re-check interval.
    pub const fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    /// Validate values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be greater than 0".into()));
        }
        if self.max_pending == 0 {
            return Err(ConfigError::Invalid("max_pending must be greater than 0".into()));
        }
        if self.job_timeout_secs == 0 {
            return Err(ConfigError::Invalid("job_timeout_secs must be greater than 0".into()));
        }
        if self.idle_wait_ms == 0 {
            return Err(ConfigError::Invalid("idle_wait_ms must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Backoff shape, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Same delay before every retry.
    Fixed {
        /// Delay in seconds.
        delay_secs: u64,
    },
    /// Doubling delay with a ceiling.
    Exponential {
        /// First delay in seconds.
        base_secs: u64,
        /// Ceiling in seconds.
        max_secs: u64,
    },
}

/// Retry ceiling and backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total executions per job, including the first.
    pub max_attempts: u32,
    /// Delay between executions.
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::Exponential {
                base_secs: 30,
                max_secs: 15 * 60,
            },
        }
    }
}

impl RetryConfig {
    /// Validate values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if let BackoffConfig::Exponential { base_secs, max_secs } = self.backoff {
            if base_secs > max_secs {
                return Err(ConfigError::Invalid(format!(
                    "backoff base {base_secs}s exceeds ceiling {max_secs}s"
                )));
            }
        }
        Ok(())
    }

    /// Runtime policy.
    pub const fn policy(&self) -> RetryPolicy {
        let backoff = match self.backoff {
            BackoffConfig::Fixed { delay_secs } => Backoff::Fixed {
                delay: Duration::from_secs(delay_secs),
            },
            BackoffConfig::Exponential { base_secs, max_secs } => Backoff::Exponential {
                base: Duration::from_secs(base_secs),
                max: Duration::from_secs(max_secs),
            },
        };
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff,
        }
    }
}

/// One recurring job registered at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringJobConfig {
    /// Kind of job to enqueue.
    pub kind: JobKind,
    /// Five-field rule.
    pub rule: String,
    /// Payload copied into every instance.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RecurringJobConfig {
    /// Reminder every day at 10:00.
    pub fn daily_reminder(recipient: &str, name: &str) -> Self {
        Self {
            kind: JobKind::ReminderEmail,
            rule: "0 10 * * *".into(),
            payload: json!({ "recipient": recipient, "name": name }),
        }
    }

    /// Usage report on the 1st of every month at 08:00.
    pub fn monthly_report(recipient: &str, name: &str) -> Self {
        Self {
            kind: JobKind::MonthlyReport,
            rule: "0 8 1 * *".into(),
            payload: json!({ "recipient": recipient, "name": name }),
        }
    }

    /// Parsed rule.
    pub fn parsed_rule(&self) -> Result<RecurrenceRule, ConfigError> {
        self.rule
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("{} rule: {e}", self.kind)))
    }
}

/// Recurring trigger settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Offset from UTC, in minutes, in which rules are evaluated.
    pub utc_offset_minutes: i32,
    /// Triggers registered at startup.
    pub recurring: Vec<RecurringJobConfig>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 330,
            recurring: Vec::new(),
        }
    }
}

impl ScheduleConfig {
    /// Offset as a chrono value.
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            ConfigError::Invalid(format!("utc offset {} minutes out of range", self.utc_offset_minutes))
        })
    }

    /// Validate values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.offset()?;
        for job in &self.recurring {
            job.parsed_rule()?;
        }
        Ok(())
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Worker pool.
    pub workers: WorkerPoolConfig,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Recurring triggers.
    pub schedule: ScheduleConfig,
}

impl ServiceConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.workers.validate()?;
        self.retry.validate()?;
        self.schedule.validate()
    }

    /// Parse from JSON and validate. Missing fields take defaults.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `.env` if present, then read `LOTKEEPER_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Keys include the prefix.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut cfg = Self::default();

        if let Some(v) = parse_var(&var, "WORKERS")? {
            cfg.workers.worker_count = v;
        }
        if let Some(v) = parse_var(&var, "MAX_PENDING")? {
            cfg.workers.max_pending = v;
        }
        if let Some(v) = parse_var(&var, "JOB_TIMEOUT_SECS")? {
            cfg.workers.job_timeout_secs = v;
        }
        if let Some(v) = parse_var(&var, "IDLE_WAIT_MS")? {
            cfg.workers.idle_wait_ms = v;
        }
        if let Some(v) = parse_var(&var, "RETRY_MAX_ATTEMPTS")? {
            cfg.retry.max_attempts = v;
        }
        if let Some(delay_secs) = parse_var(&var, "RETRY_FIXED_DELAY_SECS")? {
            cfg.retry.backoff = BackoffConfig::Fixed { delay_secs };
        } else {
            let base = parse_var(&var, "RETRY_BASE_SECS")?;
            let max = parse_var(&var, "RETRY_MAX_SECS")?;
            if let BackoffConfig::Exponential { base_secs, max_secs } = &mut cfg.retry.backoff {
                *base_secs = base.unwrap_or(*base_secs);
                *max_secs = max.unwrap_or(*max_secs);
            }
        }
        if let Some(v) = parse_var(&var, "UTC_OFFSET_MINUTES")? {
            cfg.schedule.utc_offset_minutes = v;
        }
        if let Some(recipient) = var("REMINDER_RECIPIENT") {
            let name = var("REMINDER_NAME").unwrap_or_else(|| recipient.clone());
            let mut job = RecurringJobConfig::daily_reminder(&recipient, &name);
            if let Some(rule) = var("REMINDER_RULE") {
                job.rule = rule;
            }
            cfg.schedule.recurring.push(job);
        }
        if let Some(recipient) = var("REPORT_RECIPIENT") {
            let name = var("REPORT_NAME").unwrap_or_else(|| recipient.clone());
            let mut job = RecurringJobConfig::monthly_report(&recipient, &name);
            if let Some(rule) = var("REPORT_RULE") {
                job.rule = rule;
            }
            cfg.schedule.recurring.push(job);
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|raw| {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
                var: format!("{ENV_PREFIX}{name}"),
                reason: e.to_string(),
            })
        })
        .transpose()
}
