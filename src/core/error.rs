//! Error types for the reservation engines, the storage seam and the job scheduler.

use thiserror::Error;

use crate::core::job::{JobId, JobState};
use crate::core::model::{LotId, ReservationId, UserId};

/// Failures reported by a [`RegistryStore`](crate::core::RegistryStore) backend.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Another transaction touched the same rows; the caller may retry.
    #[error("transaction conflict: {0}")]
    Conflict(String),
    /// The backend could not be reached or refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// A write referenced a row that does not exist.
    #[error("{entity} {id} does not exist")]
    MissingRow {
        /// Table or collection name.
        entity: &'static str,
        /// Row identifier.
        id: u64,
    },
}

impl RegistryError {
    /// Whether retrying the whole transaction can succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Errors produced by allocation, release and lot administration.
#[derive(Debug, Error)]
pub enum ParkingError {
    /// The lot does not exist.
    #[error("lot {0} not found")]
    LotNotFound(LotId),
    /// Every spot in the lot is occupied. A valid outcome, never retried.
    #[error("no available spot in lot {0}")]
    NoCapacity(LotId),
    /// The reservation does not exist.
    #[error("reservation {0} not found")]
    ReservationNotFound(ReservationId),
    /// The reservation belongs to someone else.
    #[error("reservation {reservation} is not owned by user {requester}")]
    NotOwner {
        /// Reservation being released.
        reservation: ReservationId,
        /// Caller that attempted the release.
        requester: UserId,
    },
    /// The reservation already has an end timestamp.
    #[error("reservation {0} already released")]
    AlreadyReleased(ReservationId),
    /// The transaction kept conflicting after the internal retry.
    #[error("storage conflict: {0}")]
    StorageConflict(String),
    /// The lot still has occupied spots.
    #[error("lot {0} has occupied spots")]
    LotOccupied(LotId),
    /// Shrinking the lot would remove occupied spots.
    #[error("lot {lot} has {available} free spots, cannot remove {requested}")]
    InsufficientFreeSpots {
        /// Lot being shrunk.
        lot: LotId,
        /// Spots that would have to be removed.
        requested: u32,
        /// Spots currently available for removal.
        available: u32,
    },
    /// Malformed or out-of-range caller input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The caller's role does not permit the operation.
    #[error("{0} requires the admin role")]
    Forbidden(&'static str),
    /// Stored rows disagree with each other.
    #[error("registry inconsistency: {0}")]
    Inconsistent(String),
    /// Non-transient storage failure.
    #[error(transparent)]
    Storage(RegistryError),
}

impl From<RegistryError> for ParkingError {
    fn from(err: RegistryError) -> Self {
        if err.is_transient() {
            Self::StorageConflict(err.to_string())
        } else {
            Self::Storage(err)
        }
    }
}

/// Errors produced by the job queue, scheduler and worker pool.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Too many jobs are waiting to run.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// No job with this id is retained by the queue.
    #[error("job {0} not found")]
    JobNotFound(JobId),
    /// The requested transition is not allowed from the job's current state.
    #[error("job {job} cannot {action} while {from}")]
    InvalidTransition {
        /// Job being transitioned.
        job: JobId,
        /// State the job was in.
        from: JobState,
        /// Attempted action.
        action: &'static str,
    },
    /// The worker pool configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
