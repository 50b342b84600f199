//! Integration tests for allocation, release, billing and lot administration.
//!
//! These run the engines against the in-memory registry with a manual clock:
//! - The two-spot walkthrough (allocate, full lot, release, reuse)
//! - Concurrent allocation never double-assigns a spot
//! - Release guards (ownership, double release)
//! - Conflict retry at the transaction boundary
//! - Lot resizing and deletion rules

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};
use lotkeeper::core::{
    JobKind, LotRegistry, LotUpdate, NewLot, ParkingError, QueueStats, Requester, ReservationEngine,
    SpotStatus,
};
use lotkeeper::core::{JobQueue, RetryPolicy, Scheduler};
use lotkeeper::infra::{InMemoryJobQueue, InMemoryRegistry};
use lotkeeper::util::{Clock as _, ManualClock};
use rust_decimal::Decimal;
use tokio::sync::Notify;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
}

struct Fixture {
    store: Arc<InMemoryRegistry>,
    clock: Arc<ManualClock>,
    lots: LotRegistry,
    engine: ReservationEngine,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryRegistry::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let lots = LotRegistry::new(store.clone(), clock.clone());
    let engine = ReservationEngine::new(store.clone(), clock.clone());
    Fixture {
        store,
        clock,
        lots,
        engine,
    }
}

fn new_lot(spots: u32, rate: i64) -> NewLot {
    NewLot {
        name: "Central".into(),
        address: "1 Main St".into(),
        postal_code: "560001".into(),
        hourly_rate: Decimal::from(rate),
        spot_count: spots,
    }
}

fn admin() -> Requester {
    Requester::admin(1)
}

// ============================================================================
// ALLOCATION AND RELEASE
// ============================================================================

#[test]
fn two_spot_lot_walkthrough() {
    let f = fixture();
    let lot = f.lots.create_lot(&admin(), new_lot(2, 10)).unwrap();
    let (a, b, c) = (Requester::user(10), Requester::user(11), Requester::user(12));

    let ra = f.engine.allocate(lot.id, &a).unwrap();
    let rb = f.engine.allocate(lot.id, &b).unwrap();
    assert!(ra.spot_id < rb.spot_id, "lowest spot id is allocated first");
    assert!(matches!(
        f.engine.allocate(lot.id, &c),
        Err(ParkingError::NoCapacity(id)) if id == lot.id
    ));

    f.clock.advance(Duration::minutes(90));
    let receipt = f.engine.release(ra.id, &a).unwrap();
    assert_eq!(receipt.hours_charged, 2);
    assert_eq!(receipt.cost, Decimal::from(20));
    assert_eq!(receipt.spot_id, ra.spot_id);

    let details = f.lots.spot_details(lot.id).unwrap();
    assert_eq!(details[0].spot.status, SpotStatus::Available);
    assert!(details[0].occupant.is_none());
    assert_eq!(details[1].spot.status, SpotStatus::Occupied);

    let rc = f.engine.allocate(lot.id, &c).unwrap();
    assert_eq!(rc.spot_id, ra.spot_id);
}

#[test]
fn immediate_release_is_free() {
    let f = fixture();
    let lot = f.lots.create_lot(&admin(), new_lot(1, 25)).unwrap();
    let user = Requester::user(5);

    let r = f.engine.allocate(lot.id, &user).unwrap();
    let receipt = f.engine.release(r.id, &user).unwrap();
    assert_eq!(receipt.hours_charged, 0);
    assert_eq!(receipt.cost, Decimal::ZERO);
}

#[test]
fn second_release_is_rejected_and_changes_nothing() {
    let f = fixture();
    let lot = f.lots.create_lot(&admin(), new_lot(1, 10)).unwrap();
    let user = Requester::user(5);
    let r = f.engine.allocate(lot.id, &user).unwrap();
    f.clock.advance(Duration::minutes(30));
    f.engine.release(r.id, &user).unwrap();

    let before = f.lots.reservations_for(user.id).unwrap();
    f.clock.advance(Duration::hours(5));
    assert!(matches!(
        f.engine.release(r.id, &user),
        Err(ParkingError::AlreadyReleased(id)) if id == r.id
    ));
    assert_eq!(f.lots.reservations_for(user.id).unwrap(), before);
    assert_eq!(before[0].reservation.cost, Decimal::from(10));
}

#[test]
fn release_checks_existence_then_ownership() {
    let f = fixture();
    let lot = f.lots.create_lot(&admin(), new_lot(1, 10)).unwrap();
    let owner = Requester::user(5);
    let r = f.engine.allocate(lot.id, &owner).unwrap();

    assert!(matches!(
        f.engine.release(r.id, &Requester::user(6)),
        Err(ParkingError::NotOwner { .. })
    ));
    assert!(matches!(
        f.engine.release(lotkeeper::core::ReservationId(999), &owner),
        Err(ParkingError::ReservationNotFound(_))
    ));
    // The failed attempts left the reservation open.
    assert!(f.engine.release(r.id, &owner).is_ok());
}

#[test]
fn unknown_lot_is_reported() {
    let f = fixture();
    assert!(matches!(
        f.engine.allocate(lotkeeper::core::LotId(42), &Requester::user(1)),
        Err(ParkingError::LotNotFound(_))
    ));
}

#[test]
fn concurrent_allocations_never_share_a_spot() {
    const SPOTS: u32 = 5;
    const CALLERS: usize = 16;

    let f = fixture();
    let lot = f.lots.create_lot(&admin(), new_lot(SPOTS, 10)).unwrap();
    let engine = Arc::new(f.engine.clone());
    let barrier = Arc::new(Barrier::new(CALLERS));
    let no_capacity = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            let no_capacity = Arc::clone(&no_capacity);
            thread::spawn(move || {
                barrier.wait();
                match engine.allocate(lot.id, &Requester::user(100 + i as u64)) {
                    Ok(r) => Some(r.spot_id),
                    Err(ParkingError::NoCapacity(_)) => {
                        no_capacity.fetch_add(1, Ordering::SeqCst);
                        None
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                }
            })
        })
        .collect();

    let mut spots: Vec<_> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();
    spots.sort();
    let before_dedup = spots.len();
    spots.dedup();

    assert_eq!(before_dedup, SPOTS as usize);
    assert_eq!(spots.len(), SPOTS as usize, "a spot was assigned twice");
    assert_eq!(no_capacity.load(Ordering::SeqCst), CALLERS - SPOTS as usize);

    let summary = &f.lots.lot_summaries().unwrap()[0];
    assert_eq!(summary.occupied, SPOTS);
    assert_eq!(summary.available, 0);
}

#[test]
fn one_transient_conflict_is_retried() {
    let f = fixture();
    let lot = f.lots.create_lot(&admin(), new_lot(1, 10)).unwrap();

    f.store.inject_commit_conflicts(1);
    let r = f.engine.allocate(lot.id, &Requester::user(3)).unwrap();
    assert_eq!(f.lots.reservations_for(r.user_id).unwrap().len(), 1);
}

#[test]
fn repeated_conflicts_surface_and_roll_back() {
    let f = fixture();
    let lot = f.lots.create_lot(&admin(), new_lot(1, 10)).unwrap();

    f.store.inject_commit_conflicts(2);
    assert!(matches!(
        f.engine.allocate(lot.id, &Requester::user(3)),
        Err(ParkingError::StorageConflict(_))
    ));
    let summary = &f.lots.lot_summaries().unwrap()[0];
    assert_eq!(summary.available, 1);
    assert!(f.lots.reservations_for(lotkeeper::core::UserId(3)).unwrap().is_empty());
}

// ============================================================================
// RECEIPTS
// ============================================================================

#[test]
fn release_with_email_queues_a_receipt() {
    let f = fixture();
    let queue = Arc::new(InMemoryJobQueue::new(16));
    let scheduler = Arc::new(Scheduler::new(
        queue.clone(),
        f.clock.clone(),
        RetryPolicy::default(),
        chrono::FixedOffset::east_opt(0).unwrap(),
        Arc::new(Notify::new()),
    ));
    let engine = f.engine.clone().with_job_sink(scheduler);
    let lot = f.lots.create_lot(&admin(), new_lot(1, 10)).unwrap();

    let silent = Requester::user(1);
    let r = engine.allocate(lot.id, &silent).unwrap();
    engine.release(r.id, &silent).unwrap();
    assert_eq!(queue.stats().unwrap(), QueueStats::default());

    let user = Requester::user(2).with_email("ana@example.com");
    let r = engine.allocate(lot.id, &user).unwrap();
    f.clock.advance(Duration::minutes(45));
    engine.release(r.id, &user).unwrap();

    let jobs = queue.jobs().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::Generic);
    assert_eq!(jobs[0].payload["recipient"], "ana@example.com");
    assert_eq!(jobs[0].run_at, f.clock.now());
}

#[test]
fn full_job_queue_does_not_fail_release() {
    let f = fixture();
    let queue = Arc::new(InMemoryJobQueue::new(1));
    let scheduler = Arc::new(Scheduler::new(
        queue.clone(),
        f.clock.clone(),
        RetryPolicy::default(),
        chrono::FixedOffset::east_opt(0).unwrap(),
        Arc::new(Notify::new()),
    ));
    scheduler
        .enqueue(JobKind::Generic, serde_json::json!({}), None)
        .unwrap();
    let engine = f.engine.clone().with_job_sink(scheduler);
    let lot = f.lots.create_lot(&admin(), new_lot(1, 10)).unwrap();

    let user = Requester::user(2).with_email("ana@example.com");
    let r = engine.allocate(lot.id, &user).unwrap();
    assert!(engine.release(r.id, &user).is_ok());
    assert_eq!(queue.stats().unwrap().pending, 1);
}

// ============================================================================
// LOT ADMINISTRATION
// ============================================================================

#[test]
fn lot_admin_requires_admin_role() {
    let f = fixture();
    assert!(matches!(
        f.lots.create_lot(&Requester::user(9), new_lot(1, 10)),
        Err(ParkingError::Forbidden("create_lot"))
    ));
}

#[test]
fn lot_fields_are_validated() {
    let f = fixture();
    let mut bad = new_lot(1, 0);
    assert!(matches!(
        f.lots.create_lot(&admin(), bad.clone()),
        Err(ParkingError::InvalidInput(_))
    ));
    bad.hourly_rate = Decimal::from(5);
    bad.name = "  ".into();
    assert!(matches!(
        f.lots.create_lot(&admin(), bad),
        Err(ParkingError::InvalidInput(_))
    ));
}

#[test]
fn growing_and_shrinking_a_lot() {
    let f = fixture();
    let lot = f.lots.create_lot(&admin(), new_lot(2, 10)).unwrap();
    let user = Requester::user(4);
    let held = f.engine.allocate(lot.id, &user).unwrap();

    let grown = f
        .lots
        .update_lot(
            &admin(),
            lot.id,
            LotUpdate {
                spot_count: Some(4),
                ..LotUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(grown.spot_count, 4);
    assert_eq!(f.lots.lot_summaries().unwrap()[0].available, 3);

    let err = f
        .lots
        .update_lot(
            &admin(),
            lot.id,
            LotUpdate {
                spot_count: Some(0),
                ..LotUpdate::default()
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ParkingError::InsufficientFreeSpots {
            requested: 4,
            available: 3,
            ..
        }
    ));

    f.lots
        .update_lot(
            &admin(),
            lot.id,
            LotUpdate {
                spot_count: Some(1),
                hourly_rate: Some(Decimal::from(15)),
                ..LotUpdate::default()
            },
        )
        .unwrap();
    let details = f.lots.spot_details(lot.id).unwrap();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].spot.id, held.spot_id, "the occupied spot survives");

    // New rate applies to the release after the update.
    f.clock.advance(Duration::minutes(10));
    assert_eq!(f.engine.release(held.id, &user).unwrap().cost, Decimal::from(15));
}

#[test]
fn occupied_lot_cannot_be_deleted() {
    let f = fixture();
    let lot = f.lots.create_lot(&admin(), new_lot(2, 10)).unwrap();
    let user = Requester::user(4);
    let r = f.engine.allocate(lot.id, &user).unwrap();

    assert!(matches!(
        f.lots.delete_lot(&admin(), lot.id),
        Err(ParkingError::LotOccupied(_))
    ));
    f.engine.release(r.id, &user).unwrap();
    f.lots.delete_lot(&admin(), lot.id).unwrap();

    assert!(f.lots.lot_summaries().unwrap().is_empty());
    // History survives the lot.
    let history = f.lots.reservations_for(user.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].location, None);
}

// ============================================================================
// HISTORY VIEWS
// ============================================================================

#[test]
fn history_is_newest_first_with_durations() {
    let f = fixture();
    let lot = f.lots.create_lot(&admin(), new_lot(1, 10)).unwrap();
    let user = Requester::user(8);

    let first = f.engine.allocate(lot.id, &user).unwrap();
    f.clock.advance(Duration::minutes(135));
    f.engine.release(first.id, &user).unwrap();
    let second = f.engine.allocate(lot.id, &user).unwrap();

    let history = f.lots.reservations_for(user.id).unwrap();
    assert_eq!(history[0].reservation.id, second.id);
    assert_eq!(history[0].duration, None);
    assert_eq!(history[1].duration.as_deref(), Some("2 hrs 15 mins"));
    assert_eq!(history[1].location.as_deref(), Some("Central"));
}

#[test]
fn monthly_usage_groups_closed_reservations() {
    let f = fixture();
    let lot = f.lots.create_lot(&admin(), new_lot(1, 10)).unwrap();
    let user = Requester::user(8);

    f.clock.set(Utc.with_ymd_and_hms(2025, 6, 30, 10, 0, 0).unwrap());
    let r = f.engine.allocate(lot.id, &user).unwrap();
    f.clock.advance(Duration::minutes(90));
    f.engine.release(r.id, &user).unwrap();

    f.clock.set(Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap());
    let r = f.engine.allocate(lot.id, &user).unwrap();
    f.clock.advance(Duration::minutes(20));
    f.engine.release(r.id, &user).unwrap();
    f.engine.allocate(lot.id, &user).unwrap();

    let usage = f.lots.monthly_usage(user.id).unwrap();
    let months: Vec<_> = usage.months.iter().map(|m| m.month.as_str()).collect();
    assert_eq!(months, ["2025-06", "2025-07"]);
    assert_eq!(usage.months[0].hours, Decimal::new(150, 2));
    assert_eq!(usage.months[0].amount, Decimal::from(20));
    assert_eq!(usage.months[1].hours, Decimal::new(33, 2));
    assert_eq!(usage.total_amount, Decimal::from(30));
    assert_eq!(usage.total_hours, Decimal::new(183, 2));
}

#[test]
fn full_export_is_admin_only() {
    let f = fixture();
    let lot = f.lots.create_lot(&admin(), new_lot(1, 10)).unwrap();
    f.engine.allocate(lot.id, &Requester::user(2)).unwrap();

    assert!(matches!(
        f.lots.all_reservations(&Requester::user(2)),
        Err(ParkingError::Forbidden(_))
    ));
    assert_eq!(f.lots.all_reservations(&admin()).unwrap().len(), 1);
}
