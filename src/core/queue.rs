//! Durable job queue seam.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::job::{Job, JobId};
use crate::core::retry::Transition;

/// Counts of jobs per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Waiting to run.
    pub pending: usize,
    /// Claimed by a worker.
    pub running: usize,
    /// Finished successfully.
    pub succeeded: usize,
    /// Waiting for backoff to expire.
    pub retryable: usize,
    /// Permanently failed.
    pub failed: usize,
}

/// Storage for jobs and their state transitions.
///
/// Every method is atomic with respect to the others, so a job is claimed by
/// at most one worker.
pub trait JobQueue: Send + Sync {
    /// Store a new pending job. Fails with [`SchedulerError::QueueFull`] when
    /// the pending backlog is at the backend's ceiling.
    fn push(&self, job: Job) -> Result<JobId, SchedulerError>;

    /// Atomically claim the pending job with the earliest `run_at <= now`,
    /// moving it to running and counting the attempt. Retryable jobs whose
    /// backoff has expired are re-armed first.
    fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<Job>, SchedulerError>;

    /// Apply the post-execution transition to a running job.
    fn finish(&self, id: JobId, transition: Transition, now: DateTime<Utc>) -> Result<Job, SchedulerError>;

    /// Mark a pending or retryable job as terminally failed.
    fn cancel(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, SchedulerError>;

    /// Snapshot of a job.
    fn get(&self, id: JobId) -> Result<Option<Job>, SchedulerError>;

    /// Snapshot of every job, oldest first.
    fn jobs(&self) -> Result<Vec<Job>, SchedulerError>;

    /// Earliest `run_at` among pending and retryable jobs.
    fn next_due_at(&self) -> Result<Option<DateTime<Utc>>, SchedulerError>;

    /// Per-state counts.
    fn stats(&self) -> Result<QueueStats, SchedulerError>;
}
