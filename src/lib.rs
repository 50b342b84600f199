//! # Lotkeeper
//!
//! Parking spot reservations with deterministic billing, plus the background
//! job system that sends reminders, reports and receipts.
//!
//! ## Reservations
//!
//! A [`ReservationEngine`](core::ReservationEngine) allocates the lowest-id
//! free spot of a lot and releases reservations, billing every started hour
//! at the lot's rate. Each call is exactly one registry transaction, so
//! concurrent allocations never hand out the same spot.
//!
//! ```rust,ignore
//! use lotkeeper::builders::SystemBuilder;
//! use lotkeeper::config::ServiceConfig;
//! use lotkeeper::core::{NewLot, Requester};
//!
//! let system = SystemBuilder::new(ServiceConfig::default()).build()?;
//! let admin = Requester::admin(1);
//! let lot = system.lots.create_lot(&admin, NewLot {
//!     name: "Central".into(),
//!     address: "1 Main St".into(),
//!     postal_code: "560001".into(),
//!     hourly_rate: 10.into(),
//!     spot_count: 2,
//! })?;
//!
//! let driver = Requester::user(7).with_email("driver@example.com");
//! let reservation = system.reservations.allocate(lot.id, &driver)?;
//! let receipt = system.reservations.release(reservation.id, &driver)?;
//! ```
//!
//! ## Background jobs
//!
//! The [`Scheduler`](core::Scheduler) accepts one-off jobs and recurring
//! cron-style triggers; a [`JobWorkerPool`](core::JobWorkerPool) claims due
//! jobs, runs them through the [`Dispatcher`](core::Dispatcher) and applies
//! the [`RetryPolicy`](core::RetryPolicy) to the outcome.
//!
//! ```rust,ignore
//! let running = system.start(&TokioSpawner::current())?;
//! system.scheduler.enqueue(JobKind::HistoryExport, json!({"recipient": "ops@example.com"}), None)?;
//! running.shutdown().await;
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Engines, billing, storage seams and the job system.
pub mod core;
/// Configuration models for workers, retries and recurring jobs.
pub mod config;
/// Builders that wire the system from configuration.
pub mod builders;
/// Storage, queue and mail backends.
pub mod infra;
/// Runtime adapters and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
