//! Background job records and their lifecycle states.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a registered recurring trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(pub Uuid);

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Daily reminder email.
    ReminderEmail,
    /// Monthly usage report with an attachment.
    MonthlyReport,
    /// Reservation history export as CSV.
    HistoryExport,
    /// Free-form notification.
    Generic,
}

impl JobKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::ReminderEmail,
        Self::MonthlyReport,
        Self::HistoryExport,
        Self::Generic,
    ];

    /// Stable snake_case name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReminderEmail => "reminder_email",
            Self::MonthlyReport => "monthly_report",
            Self::HistoryExport => "history_export",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown job kind `{s}`"))
    }
}

/// How a job came to be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Schedule {
    /// Run as soon as a worker is free.
    Immediate,
    /// Run no earlier than the given instant.
    At {
        /// Earliest start.
        run_at: DateTime<Utc>,
    },
    /// Instance produced by a recurring trigger.
    Recurring {
        /// Trigger that fired.
        trigger: TriggerId,
    },
}

/// Why a job stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Will become pending again after backoff.
    Retryable,
    /// Will not run again.
    Terminal,
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for `run_at` and a free worker.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished unsuccessfully.
    Failed(FailureKind),
}

impl JobState {
    /// Whether the job will never run again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(FailureKind::Terminal))
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed(FailureKind::Retryable) => "failed (retryable)",
            Self::Failed(FailureKind::Terminal) => "failed (terminal)",
        })
    }
}

/// One unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Identity.
    pub id: JobId,
    /// Handler selector.
    pub kind: JobKind,
    /// Handler parameters.
    pub payload: serde_json::Value,
    /// Origin of the job.
    pub schedule: Schedule,
    /// Current state.
    pub state: JobState,
    /// Executions started so far.
    pub attempts: u32,
    /// Ceiling on `attempts`.
    pub max_attempts: u32,
    /// Reason of the most recent failure.
    pub last_error: Option<String>,
    /// Earliest time the job may (re)start.
    pub run_at: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A pending job.
    pub fn new(
        kind: JobKind,
        payload: serde_json::Value,
        schedule: Schedule,
        run_at: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            kind,
            payload,
            schedule,
            state: JobState::Pending,
            attempts: 0,
            max_attempts,
            last_error: None,
            run_at,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Typed result of one job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The work completed.
    Succeeded,
    /// A transient fault (delivery, timeout, panic); worth retrying.
    Retryable(String),
    /// A permanent fault (bad payload, render failure).
    Terminal(String),
}
