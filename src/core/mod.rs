//! Reservation engines, billing, storage seams and the job system.

pub mod audit;
pub mod billing;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod model;
pub mod notifications;
pub mod queue;
pub mod recurrence;
pub mod registry;
pub mod reservation;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod worker_pool;

pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink, SharedAuditSink, SharedMemorySink};
pub use billing::{bill, cost, hours_charged, Bill};
pub use dispatcher::{Attachment, DeliveryError, Dispatcher, HandlerRegistry, JobHandler, Mailer, RenderError, Rendered};
pub use error::{AppResult, ParkingError, RegistryError, SchedulerError};
pub use job::{FailureKind, Job, JobId, JobKind, JobOutcome, JobState, Schedule, TriggerId};
pub use model::{
    Lot, LotId, LotUpdate, NewLot, ReleaseReceipt, Requester, Reservation, ReservationId, Role, Spot, SpotId,
    SpotStatus, UserId,
};
pub use notifications::default_handlers;
pub use queue::{JobQueue, QueueStats};
pub use recurrence::{RecurrenceRule, RuleError};
pub use registry::{LotRegistry, LotSummary, MonthlyUsage, ReservationView, SpotDetail, UsageSummary};
pub use reservation::ReservationEngine;
pub use retry::{Backoff, RetryPolicy, Transition};
pub use scheduler::{JobSink, Scheduler, TriggerInfo};
pub use store::{transact, RegistryStore, RegistryTx, CONFLICT_RETRIES};
pub use worker_pool::{JobWorkerPool, PoolStats, Spawn, WorkerContext};
