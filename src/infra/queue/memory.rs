//! In-memory job queue.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::core::error::SchedulerError;
use crate::core::job::{FailureKind, Job, JobId, JobState};
use crate::core::queue::{JobQueue, QueueStats};
use crate::core::retry::Transition;
use crate::util::clock::after;

#[derive(Default)]
struct Jobs {
    by_id: HashMap<JobId, Job>,
    order: Vec<JobId>,
}

impl Jobs {
    fn pending(&self) -> usize {
        self.by_id
            .values()
            .filter(|j| j.state == JobState::Pending)
            .count()
    }

    fn get_mut(&mut self, id: JobId) -> Result<&mut Job, SchedulerError> {
        self.by_id.get_mut(&id).ok_or(SchedulerError::JobNotFound(id))
    }
}

/// Job queue kept in process memory behind a single lock.
pub struct InMemoryJobQueue {
    max_pending: usize,
    jobs: Mutex<Jobs>,
}

impl InMemoryJobQueue {
    /// Queue accepting at most `max_pending` pending jobs.
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending,
            jobs: Mutex::new(Jobs::default()),
        }
    }
}

impl JobQueue for InMemoryJobQueue {
    fn push(&self, job: Job) -> Result<JobId, SchedulerError> {
        let mut jobs = self.jobs.lock();
        if jobs.pending() >= self.max_pending {
            return Err(SchedulerError::QueueFull(format!(
                "{} pending jobs already queued",
                self.max_pending
            )));
        }
        let id = job.id;
        jobs.order.push(id);
        jobs.by_id.insert(id, job);
        Ok(id)
    }

    fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<Job>, SchedulerError> {
        let mut jobs = self.jobs.lock();
        for job in jobs.by_id.values_mut() {
            if job.state == JobState::Failed(FailureKind::Retryable) && job.run_at <= now {
                job.state = JobState::Pending;
                job.updated_at = now;
            }
        }

        let Jobs { by_id, order } = &*jobs;
        let next = order
            .iter()
            .filter_map(|id| by_id.get(id))
            .filter(|j| j.state == JobState::Pending && j.run_at <= now)
            .min_by_key(|j| j.run_at)
            .map(|j| j.id);
        let Some(id) = next else {
            return Ok(None);
        };

        let job = jobs.get_mut(id)?;
        job.state = JobState::Running;
        job.attempts += 1;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    fn finish(&self, id: JobId, transition: Transition, now: DateTime<Utc>) -> Result<Job, SchedulerError> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(id)?;
        if job.state != JobState::Running {
            return Err(SchedulerError::InvalidTransition {
                job: id,
                from: job.state,
                action: "finish",
            });
        }
        match transition {
            Transition::Succeed => job.state = JobState::Succeeded,
            Transition::Retry { after: delay, error } => {
                job.state = JobState::Failed(FailureKind::Retryable);
                job.last_error = Some(error);
                job.run_at = after(now, delay);
            }
            Transition::Fail { error } => {
                job.state = JobState::Failed(FailureKind::Terminal);
                job.last_error = Some(error);
            }
        }
        job.updated_at = now;
        Ok(job.clone())
    }

    fn cancel(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, SchedulerError> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(id)?;
        match job.state {
            JobState::Pending | JobState::Failed(FailureKind::Retryable) => {
                job.state = JobState::Failed(FailureKind::Terminal);
                job.last_error = Some("cancelled".into());
                job.updated_at = now;
                Ok(job.clone())
            }
            from => Err(SchedulerError::InvalidTransition {
                job: id,
                from,
                action: "cancel",
            }),
        }
    }

    fn get(&self, id: JobId) -> Result<Option<Job>, SchedulerError> {
        Ok(self.jobs.lock().by_id.get(&id).cloned())
    }

    fn jobs(&self) -> Result<Vec<Job>, SchedulerError> {
        let jobs = self.jobs.lock();
        Ok(jobs
            .order
            .iter()
            .filter_map(|id| jobs.by_id.get(id).cloned())
            .collect())
    }

    fn next_due_at(&self) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        Ok(self
            .jobs
            .lock()
            .by_id
            .values()
            .filter(|j| {
                matches!(
                    j.state,
                    JobState::Pending | JobState::Failed(FailureKind::Retryable)
                )
            })
            .map(|j| j.run_at)
            .min())
    }

    fn stats(&self) -> Result<QueueStats, SchedulerError> {
        let jobs = self.jobs.lock();
        let mut stats = QueueStats::default();
        for job in jobs.by_id.values() {
            match job.state {
                JobState::Pending => stats.pending += 1,
                JobState::Running => stats.running += 1,
                JobState::Succeeded => stats.succeeded += 1,
                JobState::Failed(FailureKind::Retryable) => stats.retryable += 1,
                JobState::Failed(FailureKind::Terminal) => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
