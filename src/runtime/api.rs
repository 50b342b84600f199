//! API-facing request/response models and the calls behind them.
//!
//! Routing and authentication live outside this crate; callers hand in an
//! already-verified [`Requester`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::builders::ParkingSystem;
use crate::core::billing::bill;
use crate::core::error::{ParkingError, SchedulerError};
use crate::core::job::{Job, JobId, JobKind, TriggerId};
use crate::core::model::{LotId, ReleaseReceipt, Requester, Reservation, ReservationId};
use crate::core::queue::QueueStats;
use crate::core::recurrence::RecurrenceRule;

/// Allocation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateRequest {
    /// Lot to park in.
    pub lot_id: LotId,
}

/// Release request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    /// Reservation to close.
    pub reservation_id: ReservationId,
}

/// Job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    /// Kind of job.
    pub kind: JobKind,
    /// Handler parameters.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Earliest start; immediate when absent.
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
}

/// Accepted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    /// Assigned id.
    pub job_id: JobId,
}

/// Recurring trigger registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringRequest {
    /// Kind of job each firing produces.
    pub kind: JobKind,
    /// Handler parameters copied into each job.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Five-field rule.
    pub rule: RecurrenceRule,
}

/// Registered trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringResponse {
    /// Assigned id.
    pub trigger_id: TriggerId,
}

/// Cost quote for an interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRequest {
    /// Interval start.
    pub start: DateTime<Utc>,
    /// Interval end.
    pub end: DateTime<Utc>,
    /// Price per started hour.
    pub hourly_rate: Decimal,
}

/// Quoted cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostResponse {
    /// Whole hours billed.
    pub hours_charged: u64,
    /// Amount billed.
    pub cost: Decimal,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Job counts per state.
    pub jobs: QueueStats,
}

/// Error body with a stable machine-readable code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Stable code, e.g. `no_capacity`.
    pub code: String,
    /// HTTP-style status.
    pub status: u16,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    fn new(code: &str, status: u16, message: impl ToString) -> Self {
        Self {
            code: code.into(),
            status,
            message: message.to_string(),
        }
    }
}

impl From<ParkingError> for ApiError {
    fn from(err: ParkingError) -> Self {
        let (code, status) = match &err {
            ParkingError::LotNotFound(_) => ("lot_not_found", 404),
            ParkingError::ReservationNotFound(_) => ("reservation_not_found", 404),
            ParkingError::NoCapacity(_) => ("no_capacity", 409),
            ParkingError::AlreadyReleased(_) => ("already_released", 409),
            ParkingError::LotOccupied(_) => ("lot_occupied", 409),
            ParkingError::InsufficientFreeSpots { .. } => ("insufficient_free_spots", 409),
            ParkingError::NotOwner { .. } => ("not_owner", 403),
            ParkingError::Forbidden(_) => ("forbidden", 403),
            ParkingError::InvalidInput(_) => ("invalid_input", 400),
            ParkingError::StorageConflict(_) => ("storage_conflict", 503),
            ParkingError::Inconsistent(_) | ParkingError::Storage(_) => ("internal", 500),
        };
        Self::new(code, status, err)
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        let (code, status) = match &err {
            SchedulerError::QueueFull(_) => ("queue_full", 503),
            SchedulerError::JobNotFound(_) => ("job_not_found", 404),
            SchedulerError::InvalidTransition { .. } => ("invalid_transition", 409),
            SchedulerError::InvalidConfig(_) | SchedulerError::Backend(_) => ("internal", 500),
        };
        Self::new(code, status, err)
    }
}

/// Allocate a spot.
pub fn allocate(system: &ParkingSystem, requester: &Requester, req: &AllocateRequest) -> Result<Reservation, ApiError> {
    Ok(system.reservations.allocate(req.lot_id, requester)?)
}

/// Release a reservation.
pub fn release(system: &ParkingSystem, requester: &Requester, req: &ReleaseRequest) -> Result<ReleaseReceipt, ApiError> {
    Ok(system.reservations.release(req.reservation_id, requester)?)
}

/// Submit a job. Admin only.
pub fn enqueue(system: &ParkingSystem, requester: &Requester, req: EnqueueRequest) -> Result<EnqueueResponse, ApiError> {
    require_admin(requester, "enqueue")?;
    let job_id = system.scheduler.enqueue(req.kind, req.payload, req.run_at)?;
    Ok(EnqueueResponse { job_id })
}

/// Register a recurring trigger. Admin only.
pub fn recurring(
    system: &ParkingSystem,
    requester: &Requester,
    req: RecurringRequest,
) -> Result<RecurringResponse, ApiError> {
    require_admin(requester, "recurring")?;
    let trigger_id = system.scheduler.recurring(req.kind, req.payload, req.rule);
    Ok(RecurringResponse { trigger_id })
}

/// Cancel a pending or retryable job. Admin only.
pub fn cancel_job(system: &ParkingSystem, requester: &Requester, job_id: JobId) -> Result<Job, ApiError> {
    require_admin(requester, "cancel_job")?;
    Ok(system.scheduler.cancel(job_id)?)
}

/// Quote a cost without touching storage.
pub fn cost(req: &CostRequest) -> Result<CostResponse, ApiError> {
    if req.hourly_rate <= Decimal::ZERO {
        return Err(ParkingError::InvalidInput("hourly rate must be positive".into()).into());
    }
    let quote = bill(req.start, req.end, req.hourly_rate);
    Ok(CostResponse {
        hours_charged: quote.hours_charged,
        cost: quote.cost,
    })
}

/// Return a health payload.
pub fn health(system: &ParkingSystem) -> Health {
    match system.scheduler.stats() {
        Ok(jobs) => Health { ok: true, jobs },
        Err(_) => Health {
            ok: false,
            jobs: QueueStats::default(),
        },
    }
}

fn require_admin(requester: &Requester, op: &'static str) -> Result<(), ApiError> {
    if requester.is_admin() {
        Ok(())
    } else {
        Err(ParkingError::Forbidden(op).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn cost_quotes_started_hours() {
        let start = Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap();
        let quote = cost(&CostRequest {
            start,
            end: start + Duration::minutes(61),
            hourly_rate: Decimal::from(4),
        })
        .unwrap();
        assert_eq!(quote.hours_charged, 2);
        assert_eq!(quote.cost, Decimal::from(8));
    }

    #[test]
    fn errors_map_to_stable_codes() {
        let err: ApiError = ParkingError::NoCapacity(LotId(1)).into();
        assert_eq!((err.code.as_str(), err.status), ("no_capacity", 409));

        let err: ApiError = SchedulerError::QueueFull("full".into()).into();
        assert_eq!((err.code.as_str(), err.status), ("queue_full", 503));
    }

    #[test]
    fn health_payload_round_trips() {
        let system = crate::builders::SystemBuilder::new(crate::config::ServiceConfig::default())
            .build()
            .unwrap();
        system
            .scheduler
            .enqueue(JobKind::Generic, serde_json::json!({}), None)
            .unwrap();

        let report = health(&system);
        let decoded: Health = serde_json::from_str(&serde_json::to_string(&report).unwrap()).unwrap();
        assert!(decoded.ok);
        assert_eq!(decoded.jobs, report.jobs);
        assert_eq!(decoded.jobs.pending, 1);
    }
}
