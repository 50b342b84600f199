//! Tests for error types

use lotkeeper::core::{JobId, JobState, LotId, ParkingError, RegistryError, SchedulerError, SpotId};

#[test]
fn test_queue_full_error() {
    let err = SchedulerError::QueueFull("1024 pending jobs already queued".to_string());
    assert_eq!(format!("{err}"), "queue full: 1024 pending jobs already queued");
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("connection failed".to_string());
    assert_eq!(format!("{err}"), "backend error: connection failed");
}

#[test]
fn test_invalid_transition_error() {
    let job = JobId::new();
    let err = SchedulerError::InvalidTransition {
        job,
        from: JobState::Running,
        action: "cancel",
    };
    assert_eq!(format!("{err}"), format!("job {job} cannot cancel while running"));
}

#[test]
fn test_no_capacity_error() {
    let err = ParkingError::NoCapacity(LotId(3));
    assert_eq!(format!("{err}"), "no available spot in lot 3");
}

#[test]
fn test_insufficient_free_spots_error() {
    let err = ParkingError::InsufficientFreeSpots {
        lot: LotId(2),
        requested: 4,
        available: 1,
    };
    assert_eq!(format!("{err}"), "lot 2 has 1 free spots, cannot remove 4");
}

#[test]
fn test_missing_row_is_not_transient() {
    let err = RegistryError::MissingRow {
        entity: "spot",
        id: SpotId(9).0,
    };
    assert!(!err.is_transient());
    assert_eq!(format!("{err}"), "spot 9 does not exist");
    assert!(matches!(ParkingError::from(err), ParkingError::Storage(_)));
}

#[test]
fn test_anyhow_conversion() {
    let result: lotkeeper::core::AppResult<()> = Err(ParkingError::NoCapacity(LotId(1)).into());
    assert!(result.unwrap_err().to_string().contains("lot 1"));
}
