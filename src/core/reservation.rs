//! Allocation and release engines.
//!
//! Each call runs as exactly one registry transaction. Background work that a
//! release triggers is handed to the job sink only after the commit, and a
//! failure to enqueue it never fails the release.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::core::audit::{build_audit_event, record, SharedAuditSink};
use crate::core::billing::bill;
use crate::core::error::ParkingError;
use crate::core::job::JobKind;
use crate::core::model::{LotId, ReleaseReceipt, Requester, Reservation, ReservationId, SpotStatus};
use crate::core::scheduler::JobSink;
use crate::core::store::{transact, RegistryStore};
use crate::util::clock::Clock;

/// Allocates spots and releases reservations.
#[derive(Clone)]
pub struct ReservationEngine {
    store: Arc<dyn RegistryStore>,
    clock: Arc<dyn Clock>,
    jobs: Option<Arc<dyn JobSink>>,
    audit: Option<SharedAuditSink>,
}

impl ReservationEngine {
    /// Engine over `store`, reading time from `clock`.
    pub fn new(store: Arc<dyn RegistryStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            jobs: None,
            audit: None,
        }
    }

    /// Enqueue release receipts through `jobs`.
    #[must_use]
    pub fn with_job_sink(mut self, jobs: Arc<dyn JobSink>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Record allocations and releases into `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Occupy the lowest-id available spot of `lot_id` for `requester`.
    ///
    /// A full lot yields [`ParkingError::NoCapacity`], which is a normal
    /// outcome and never retried.
    pub fn allocate(&self, lot_id: LotId, requester: &Requester) -> Result<Reservation, ParkingError> {
        let reservation = transact(self.store.as_ref(), "allocate", |tx| {
            tx.get_lot(lot_id)?.ok_or(ParkingError::LotNotFound(lot_id))?;
            let spot = tx
                .spots_by_lot(lot_id)?
                .into_iter()
                .find(|s| s.status == SpotStatus::Available)
                .ok_or(ParkingError::NoCapacity(lot_id))?;
            tx.update_spot_status(spot.id, SpotStatus::Occupied)?;
            Ok(tx.insert_reservation(spot.id, requester.id, self.clock.now())?)
        })?;

        info!(
            reservation_id = %reservation.id,
            spot_id = %reservation.spot_id,
            %lot_id,
            user_id = %requester.id,
            "spot allocated"
        );
        record(self.audit.as_ref(), || {
            build_audit_event(
                format!("reservation:{}", reservation.id),
                requester.id.to_string(),
                "reservation.allocate",
                Some(format!("lot {lot_id} spot {}", reservation.spot_id)),
                reservation.started_at,
            )
        });
        Ok(reservation)
    }

    /// Close an open reservation owned by `requester`, bill it and free its
    /// spot.
    pub fn release(&self, reservation_id: ReservationId, requester: &Requester) -> Result<ReleaseReceipt, ParkingError> {
        let (receipt, lot_name) = transact(self.store.as_ref(), "release", |tx| {
            let mut reservation = tx
                .get_reservation(reservation_id)?
                .ok_or(ParkingError::ReservationNotFound(reservation_id))?;
            if reservation.user_id != requester.id {
                return Err(ParkingError::NotOwner {
                    reservation: reservation_id,
                    requester: requester.id,
                });
            }
            if !reservation.is_open() {
                return Err(ParkingError::AlreadyReleased(reservation_id));
            }
            let spot = tx.get_spot(reservation.spot_id)?.ok_or_else(|| {
                ParkingError::Inconsistent(format!(
                    "open reservation {reservation_id} points at missing spot {}",
                    reservation.spot_id
                ))
            })?;
            let lot = tx.get_lot(spot.lot_id)?.ok_or_else(|| {
                ParkingError::Inconsistent(format!("spot {} points at missing lot {}", spot.id, spot.lot_id))
            })?;

            let ended_at = self.clock.now();
            let charge = bill(reservation.started_at, ended_at, lot.hourly_rate);
            reservation.ended_at = Some(ended_at);
            reservation.cost = charge.cost;
            tx.update_reservation(&reservation)?;
            tx.update_spot_status(spot.id, SpotStatus::Available)?;

            Ok((
                ReleaseReceipt {
                    reservation_id,
                    spot_id: spot.id,
                    lot_id: lot.id,
                    ended_at,
                    hours_charged: charge.hours_charged,
                    cost: charge.cost,
                },
                lot.name,
            ))
        })?;

        info!(
            %reservation_id,
            spot_id = %receipt.spot_id,
            hours = receipt.hours_charged,
            cost = %receipt.cost,
            "reservation released"
        );
        record(self.audit.as_ref(), || {
            build_audit_event(
                format!("reservation:{reservation_id}"),
                requester.id.to_string(),
                "reservation.release",
                Some(format!("{} hours, cost {}", receipt.hours_charged, receipt.cost)),
                receipt.ended_at,
            )
        });
        self.send_receipt(requester, &receipt, &lot_name);
        Ok(receipt)
    }

    fn send_receipt(&self, requester: &Requester, receipt: &ReleaseReceipt, lot_name: &str) {
        let (Some(jobs), Some(email)) = (&self.jobs, &requester.email) else {
            return;
        };
        let payload = json!({
            "recipient": email,
            "subject": "Parking receipt",
            "message": format!(
                "Reservation {} at {lot_name} (spot {}) ended at {}. Billed {} hour(s): {}.",
                receipt.reservation_id,
                receipt.spot_id,
                receipt.ended_at.format("%Y-%m-%d %H:%M UTC"),
                receipt.hours_charged,
                receipt.cost,
            ),
        });
        if let Err(err) = jobs.submit(JobKind::Generic, payload, None) {
            warn!(reservation_id = %receipt.reservation_id, %err, "receipt not queued");
        }
    }
}
