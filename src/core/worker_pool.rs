//! Async worker pool draining the job queue.
//!
//! Each worker claims the earliest due job, runs it through the
//! [`Dispatcher`] under the configured timeout, asks the [`RetryPolicy`] what
//! to do with the outcome and records the transition. Idle workers park on the
//! shared wake signal, the next `run_at`, or the idle interval, whichever
//! comes first.
//!
//! # Example
//!
//! ```rust,ignore
//! let pool = JobWorkerPool::start(
//!     WorkerPoolConfig::new().with_worker_count(4),
//!     context,
//!     &TokioSpawner::current(),
//! )?;
//! // ...
//! pool.shutdown().await;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::audit::{build_audit_event, record, SharedAuditSink};
use crate::core::dispatcher::Dispatcher;
use crate::core::error::SchedulerError;
use crate::core::job::{Job, JobOutcome};
use crate::core::queue::JobQueue;
use crate::core::retry::{RetryPolicy, Transition};
use crate::util::clock::Clock;

/// Abstraction for spawning task execution on a runtime.
pub trait Spawn {
    /// Spawn a detached future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Snapshot of pool activity since start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Number of workers.
    pub worker_count: usize,
    /// Jobs currently executing.
    pub active_jobs: u64,
    /// Executions that succeeded.
    pub succeeded: u64,
    /// Executions scheduled for another attempt.
    pub retried: u64,
    /// Executions that ended the job as failed.
    pub failed: u64,
    /// Executions cut off by the timeout.
    pub timed_out: u64,
    /// Executions whose handler panicked.
    pub panicked: u64,
}

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    active: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    panicked: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_jobs: self.active.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Everything a worker needs to run jobs.
#[derive(Clone)]
pub struct WorkerContext {
    /// Source of jobs.
    pub queue: Arc<dyn JobQueue>,
    /// Executes a job.
    pub dispatcher: Arc<Dispatcher>,
    /// Outcome-to-transition mapping.
    pub policy: RetryPolicy,
    /// Time source for claiming and transitions.
    pub clock: Arc<dyn Clock>,
    /// Signalled when jobs are enqueued.
    pub wake: Arc<Notify>,
    /// Optional outcome trail.
    pub audit: Option<SharedAuditSink>,
}

/// Running set of job workers.
pub struct JobWorkerPool {
    worker_count: usize,
    counters: Arc<PoolCounters>,
    shutdown: watch::Sender<bool>,
    finished: Mutex<Option<mpsc::Receiver<()>>>,
}

impl JobWorkerPool {
    /// Validate `config` and spawn its workers on `spawner`.
    pub fn start<S: Spawn>(
        config: &WorkerPoolConfig,
        context: WorkerContext,
        spawner: &S,
    ) -> Result<Self, SchedulerError> {
        config
            .validate()
            .map_err(|e| SchedulerError::InvalidConfig(e.to_string()))?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::channel::<()>(1);
        let counters = Arc::new(PoolCounters::default());
        let context = Arc::new(context);
        let settings = WorkerSettings {
            timeout: config.job_timeout(),
            idle_wait: config.idle_wait(),
        };

        for worker_id in 0..config.worker_count {
            spawner.spawn(worker_loop(
                worker_id,
                Arc::clone(&context),
                settings,
                Arc::clone(&counters),
                shutdown_rx.clone(),
                done_tx.clone(),
            ));
        }
        info!(workers = config.worker_count, "job worker pool started");

        Ok(Self {
            worker_count: config.worker_count,
            counters,
            shutdown,
            finished: Mutex::new(Some(done_rx)),
        })
    }

    /// A receiver that turns true when the pool shuts down.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.worker_count)
    }

    /// Stop claiming new jobs and wait for in-flight executions to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let finished = self.finished.lock().take();
        if let Some(mut finished) = finished {
            // Resolves once every worker has dropped its sender.
            while finished.recv().await.is_some() {}
            info!("job worker pool stopped");
        }
    }
}

impl Drop for JobWorkerPool {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[derive(Clone, Copy)]
struct WorkerSettings {
    timeout: Duration,
    idle_wait: Duration,
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    settings: WorkerSettings,
    counters: Arc<PoolCounters>,
    mut shutdown: watch::Receiver<bool>,
    _done: mpsc::Sender<()>,
) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        match ctx.queue.claim_due(ctx.clock.now()) {
            Ok(Some(job)) => {
                execute(worker_id, &ctx, settings.timeout, &counters, job).await;
                continue;
            }
            Ok(None) => {}
            Err(err) => error!(worker_id, %err, "claiming a job failed"),
        }

        let now = ctx.clock.now();
        let wait = ctx
            .queue
            .next_due_at()
            .ok()
            .flatten()
            .and_then(|at| (at - now).to_std().ok())
            .map_or(settings.idle_wait, |d| d.min(settings.idle_wait));

        tokio::select! {
            () = ctx.wake.notified() => {}
            () = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

async fn execute(worker_id: usize, ctx: &WorkerContext, timeout: Duration, counters: &PoolCounters, job: Job) {
    counters.active.fetch_add(1, Ordering::Relaxed);
    debug!(worker_id, job_id = %job.id, kind = %job.kind, attempt = job.attempts, "job started");

    let dispatcher = Arc::clone(&ctx.dispatcher);
    let task_job = job.clone();
    let handle = tokio::spawn(async move { dispatcher.dispatch(&task_job).await });
    let abort = handle.abort_handle();

    let outcome = match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_err)) => {
            counters.panicked.fetch_add(1, Ordering::Relaxed);
            JobOutcome::Retryable(format!("handler panicked: {join_err}"))
        }
        Err(_) => {
            abort.abort();
            counters.timed_out.fetch_add(1, Ordering::Relaxed);
            JobOutcome::Retryable(format!("timed out after {timeout:?}"))
        }
    };

    let transition = ctx.policy.decide(outcome, job.attempts, job.max_attempts);
    let action = match &transition {
        Transition::Succeed => {
            counters.succeeded.fetch_add(1, Ordering::Relaxed);
            "job.succeeded"
        }
        Transition::Retry { after, error } => {
            counters.retried.fetch_add(1, Ordering::Relaxed);
            warn!(job_id = %job.id, attempt = job.attempts, retry_in = ?after, %error, "job failed, will retry");
            "job.retry"
        }
        Transition::Fail { error } => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(job_id = %job.id, attempt = job.attempts, %error, "job failed permanently");
            "job.failed"
        }
    };

    let now = ctx.clock.now();
    match ctx.queue.finish(job.id, transition, now) {
        Ok(finished) => {
            debug!(worker_id, job_id = %job.id, state = %finished.state, "job finished");
            record(ctx.audit.as_ref(), || {
                build_audit_event(
                    format!("job:{}", job.id),
                    format!("worker:{worker_id}"),
                    action,
                    finished.last_error.clone(),
                    now,
                )
            });
        }
        Err(err) => error!(job_id = %job.id, %err, "recording job outcome failed"),
    }
    counters.active.fetch_sub(1, Ordering::Relaxed);
}
