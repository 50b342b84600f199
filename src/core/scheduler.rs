//! Job submission and the recurring-trigger clock.
//!
//! [`Scheduler::run`] sleeps until the next minute at which any registered
//! rule matches, then enqueues one fresh job per matching trigger. Workers are
//! woken through a shared [`Notify`] whenever something is enqueued.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, DurationRound, FixedOffset, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::audit::{build_audit_event, record, SharedAuditSink};
use crate::core::error::SchedulerError;
use crate::core::job::{Job, JobId, JobKind, Schedule, TriggerId};
use crate::core::queue::{JobQueue, QueueStats};
use crate::core::recurrence::RecurrenceRule;
use crate::core::retry::RetryPolicy;
use crate::util::clock::Clock;

/// Longest the trigger loop sleeps before re-evaluating.
const MAX_IDLE: Duration = Duration::from_secs(3600);

/// Something that accepts background jobs.
pub trait JobSink: Send + Sync {
    /// Queue a job to run at `run_at`, or immediately when `None`.
    fn submit(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<JobId, SchedulerError>;
}

struct Trigger {
    id: TriggerId,
    kind: JobKind,
    payload: serde_json::Value,
    rule: RecurrenceRule,
    last_fired: Option<DateTime<Utc>>,
}

/// A registered recurring trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerInfo {
    /// Trigger identity.
    pub id: TriggerId,
    /// Kind of the jobs it produces.
    pub kind: JobKind,
    /// Firing rule.
    pub rule: RecurrenceRule,
    /// Next firing instant, if the rule can still match.
    pub next_fire_at: Option<DateTime<Utc>>,
}

/// Front door of the job system.
pub struct Scheduler {
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    offset: FixedOffset,
    triggers: Mutex<Vec<Trigger>>,
    wake: Arc<Notify>,
    triggers_changed: Notify,
    audit: Option<SharedAuditSink>,
}

impl Scheduler {
    /// Scheduler evaluating rules in `offset` and waking workers via `wake`.
    pub fn new(
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        offset: FixedOffset,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            queue,
            clock,
            policy,
            offset,
            triggers: Mutex::new(Vec::new()),
            wake,
            triggers_changed: Notify::new(),
            audit: None,
        }
    }

    /// Record submissions and cancellations into `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Retry policy applied to jobs created here.
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Queue one job.
    pub fn enqueue(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<JobId, SchedulerError> {
        let now = self.clock.now();
        let schedule = run_at.map_or(Schedule::Immediate, |run_at| Schedule::At { run_at });
        self.push(Job::new(
            kind,
            payload,
            schedule,
            run_at.unwrap_or(now),
            self.policy.max_attempts,
            now,
        ))
    }

    fn push(&self, job: Job) -> Result<JobId, SchedulerError> {
        let (kind, created_at) = (job.kind, job.created_at);
        let id = self.queue.push(job)?;
        self.wake.notify_one();
        debug!(job_id = %id, %kind, "job queued");
        record(self.audit.as_ref(), || {
            build_audit_event(format!("job:{id}"), "scheduler", "job.enqueue", Some(kind.to_string()), created_at)
        });
        Ok(id)
    }

    /// Register a rule that enqueues a fresh `kind` job each time it matches.
    pub fn recurring(&self, kind: JobKind, payload: serde_json::Value, rule: RecurrenceRule) -> TriggerId {
        let id = TriggerId(Uuid::new_v4());
        info!(trigger_id = %id, %kind, %rule, "recurring job registered");
        self.triggers.lock().push(Trigger {
            id,
            kind,
            payload,
            rule,
            last_fired: None,
        });
        self.triggers_changed.notify_one();
        id
    }

    /// Unregister a trigger. Jobs it already produced are unaffected.
    pub fn remove_recurring(&self, id: TriggerId) -> bool {
        let mut triggers = self.triggers.lock();
        let before = triggers.len();
        triggers.retain(|t| t.id != id);
        let removed = triggers.len() != before;
        drop(triggers);
        if removed {
            self.triggers_changed.notify_one();
        }
        removed
    }

    /// Registered triggers with their next firing time.
    pub fn triggers(&self) -> Vec<TriggerInfo> {
        let now = self.clock.now();
        self.triggers
            .lock()
            .iter()
            .map(|t| TriggerInfo {
                id: t.id,
                kind: t.kind,
                rule: t.rule.clone(),
                next_fire_at: t.rule.next_after(now, self.offset),
            })
            .collect()
    }

    /// Cancel a pending or retryable job.
    pub fn cancel(&self, id: JobId) -> Result<Job, SchedulerError> {
        let now = self.clock.now();
        let job = self.queue.cancel(id, now)?;
        info!(job_id = %id, "job cancelled");
        record(self.audit.as_ref(), || {
            build_audit_event(format!("job:{id}"), "admin", "job.cancel", None, now)
        });
        Ok(job)
    }

    /// Snapshot of one job.
    pub fn job(&self, id: JobId) -> Result<Job, SchedulerError> {
        self.queue.get(id)?.ok_or(SchedulerError::JobNotFound(id))
    }

    /// Per-state job counts.
    pub fn stats(&self) -> Result<QueueStats, SchedulerError> {
        self.queue.stats()
    }

    /// Fire every trigger whose rule matches the minute containing `now`.
    /// A trigger fires at most once per minute.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<JobId> {
        let minute = now.duration_trunc(chrono::Duration::minutes(1)).unwrap_or(now);
        let local = minute.with_timezone(&self.offset);
        let due: Vec<Job> = self
            .triggers
            .lock()
            .iter_mut()
            .filter(|t| t.last_fired != Some(minute) && t.rule.matches(&local))
            .map(|t| {
                t.last_fired = Some(minute);
                Job::new(
                    t.kind,
                    t.payload.clone(),
                    Schedule::Recurring { trigger: t.id },
                    now,
                    self.policy.max_attempts,
                    now,
                )
            })
            .collect();

        let mut fired = Vec::with_capacity(due.len());
        for job in due {
            let (kind, schedule) = (job.kind, job.schedule);
            match self.push(job) {
                Ok(id) => {
                    info!(job_id = %id, %kind, ?schedule, "recurring job fired");
                    fired.push(id);
                }
                Err(err) => warn!(%kind, %err, "recurring job dropped"),
            }
        }
        fired
    }

    /// Earliest instant after `after` at which any trigger matches.
    pub fn next_fire_at(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.triggers
            .lock()
            .iter()
            .filter_map(|t| t.rule.next_after(after, self.offset))
            .min()
    }

    /// Trigger loop. Returns once `shutdown` turns true or its sender is
    /// dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(offset = %self.offset, "trigger loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let now = self.clock.now();
            self.tick(now);
            let sleep_for = self
                .next_fire_at(now)
                .and_then(|at| (at - now).to_std().ok())
                .map_or(MAX_IDLE, |d| d.min(MAX_IDLE));

            tokio::select! {
                () = tokio::time::sleep(sleep_for) => {}
                () = self.triggers_changed.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("trigger loop stopped");
    }
}

impl JobSink for Scheduler {
    fn submit(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<JobId, SchedulerError> {
        self.enqueue(kind, payload, run_at)
    }
}
