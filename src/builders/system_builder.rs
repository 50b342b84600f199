//! Assemble a [`ParkingSystem`] from a [`ServiceConfig`] and its collaborators.

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tracing::info;

use crate::config::ServiceConfig;
use crate::core::audit::SharedAuditSink;
use crate::core::dispatcher::{Dispatcher, HandlerRegistry, Mailer};
use crate::core::error::SchedulerError;
use crate::core::notifications::default_handlers;
use crate::core::queue::JobQueue;
use crate::core::registry::LotRegistry;
use crate::core::reservation::ReservationEngine;
use crate::core::scheduler::{JobSink, Scheduler};
use crate::core::store::RegistryStore;
use crate::core::worker_pool::{JobWorkerPool, PoolStats, Spawn, WorkerContext};
use crate::infra::mailer::LogMailer;
use crate::infra::queue::InMemoryJobQueue;
use crate::infra::registry::InMemoryRegistry;
use crate::util::clock::{Clock, SystemClock};

/// Collects configuration and collaborators. Anything not supplied falls back
/// to the in-memory backends, the logging mailer and the system clock.
#[derive(Default)]
pub struct SystemBuilder {
    config: ServiceConfig,
    store: Option<Arc<dyn RegistryStore>>,
    queue: Option<Arc<dyn JobQueue>>,
    mailer: Option<Arc<dyn Mailer>>,
    clock: Option<Arc<dyn Clock>>,
    handlers: Option<HandlerRegistry>,
    audit: Option<SharedAuditSink>,
}

impl SystemBuilder {
    /// Builder over `config`.
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Registry backend.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn RegistryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Job queue backend.
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Delivery transport.
    #[must_use]
    pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// Time source.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the built-in handler table.
    #[must_use]
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Audit trail shared by every component.
    #[must_use]
    pub fn audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Validate the configuration and wire everything. Configured recurring
    /// jobs are registered; nothing runs until [`ParkingSystem::start`].
    pub fn build(self) -> Result<ParkingSystem, SchedulerError> {
        let invalid = |e: crate::config::ConfigError| SchedulerError::InvalidConfig(e.to_string());
        self.config.validate().map_err(invalid)?;
        let offset = self.config.schedule.offset().map_err(invalid)?;
        let policy = self.config.retry.policy();

        let store = self.store.unwrap_or_else(|| Arc::new(InMemoryRegistry::new()));
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryJobQueue::new(self.config.workers.max_pending)));
        let mailer = self.mailer.unwrap_or_else(|| Arc::new(LogMailer));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let wake = Arc::new(Notify::new());

        let mut lots = LotRegistry::new(Arc::clone(&store), Arc::clone(&clock));
        let mut scheduler = Scheduler::new(
            Arc::clone(&queue),
            Arc::clone(&clock),
            policy,
            offset,
            Arc::clone(&wake),
        );
        if let Some(audit) = &self.audit {
            lots = lots.with_audit(Arc::clone(audit));
            scheduler = scheduler.with_audit(Arc::clone(audit));
        }
        let scheduler = Arc::new(scheduler);

        let mut reservations = ReservationEngine::new(store, Arc::clone(&clock))
            .with_job_sink(Arc::clone(&scheduler) as Arc<dyn JobSink>);
        if let Some(audit) = &self.audit {
            reservations = reservations.with_audit(Arc::clone(audit));
        }

        let handlers = self.handlers.unwrap_or_else(|| default_handlers(&lots));
        let dispatcher = Arc::new(Dispatcher::new(handlers, mailer));

        for job in &self.config.schedule.recurring {
            scheduler.recurring(job.kind, job.payload.clone(), job.parsed_rule().map_err(invalid)?);
        }

        info!(
            workers = self.config.workers.worker_count,
            max_pending = self.config.workers.max_pending,
            recurring = self.config.schedule.recurring.len(),
            "parking system built"
        );

        Ok(ParkingSystem {
            context: WorkerContext {
                queue: Arc::clone(&queue),
                dispatcher: Arc::clone(&dispatcher),
                policy,
                clock,
                wake,
                audit: self.audit,
            },
            config: self.config,
            lots,
            reservations,
            scheduler,
            queue,
            dispatcher,
        })
    }
}

/// The wired system, not yet running background work.
pub struct ParkingSystem {
    config: ServiceConfig,
    context: WorkerContext,
    /// Lot administration and views.
    pub lots: LotRegistry,
    /// Allocation and release.
    pub reservations: ReservationEngine,
    /// Job submission and recurring triggers.
    pub scheduler: Arc<Scheduler>,
    /// Job storage.
    pub queue: Arc<dyn JobQueue>,
    /// Job execution.
    pub dispatcher: Arc<Dispatcher>,
}

impl ParkingSystem {
    /// Configuration the system was built from.
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Spawn the worker pool and the trigger loop on `spawner`.
    pub fn start<S: Spawn>(&self, spawner: &S) -> Result<RunningSystem, SchedulerError> {
        let pool = JobWorkerPool::start(&self.config.workers, self.context.clone(), spawner)?;
        let (done_tx, trigger_loop) = mpsc::channel::<()>(1);
        let trigger_run = Arc::clone(&self.scheduler).run(pool.subscribe());
        spawner.spawn(async move {
            trigger_run.await;
            drop(done_tx);
        });
        Ok(RunningSystem { pool, trigger_loop })
    }
}

/// Handle to the background workers.
pub struct RunningSystem {
    pool: JobWorkerPool,
    trigger_loop: mpsc::Receiver<()>,
}

impl RunningSystem {
    /// Worker counters.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop the trigger loop and the workers, waiting for in-flight jobs.
    /// Nothing is enqueued by the trigger loop once this returns.
    pub async fn shutdown(mut self) {
        self.pool.shutdown().await;
        while self.trigger_loop.recv().await.is_some() {}
    }
}
