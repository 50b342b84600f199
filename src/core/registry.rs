//! Lot administration and read-side views over the registry.
//!
//! Writes go through the same transactional seam as allocation and release,
//! so resizing a lot can never race an allocation into an inconsistent
//! spot count.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::core::audit::{build_audit_event, record, SharedAuditSink};
use crate::core::error::ParkingError;
use crate::core::model::{
    Lot, LotId, LotUpdate, NewLot, Requester, Reservation, ReservationId, Spot, SpotId, SpotStatus, UserId,
};
use crate::core::store::{transact, RegistryStore, RegistryTx};
use crate::util::clock::Clock;

const MILLIS_PER_HOUR: i64 = 3_600_000;

/// A lot with its occupancy counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LotSummary {
    /// The lot row.
    pub lot: Lot,
    /// Spots materialized for the lot.
    pub total: u32,
    /// Spots free to allocate.
    pub available: u32,
    /// Spots held by open reservations.
    pub occupied: u32,
}

/// Who holds an occupied spot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occupant {
    /// Open reservation.
    pub reservation_id: ReservationId,
    /// Holder.
    pub user_id: UserId,
    /// Allocation time.
    pub started_at: DateTime<Utc>,
}

/// A spot with its current holder, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpotDetail {
    /// The spot row.
    pub spot: Spot,
    /// Present when the spot is occupied.
    pub occupant: Option<Occupant>,
}

/// A reservation joined with its lot for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationView {
    /// The reservation row.
    pub reservation: Reservation,
    /// Owning lot, if its spot still exists.
    pub lot_id: Option<LotId>,
    /// Lot name, if the lot still exists.
    pub location: Option<String>,
    /// `"H hrs M mins"` for closed reservations.
    pub duration: Option<String>,
}

/// Usage within one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyUsage {
    /// `YYYY-MM` of the reservation start.
    pub month: String,
    /// Closed reservations started in the month.
    pub reservations: u32,
    /// Hours parked, two decimal places.
    pub hours: Decimal,
    /// Amount billed.
    pub amount: Decimal,
}

/// A requester's usage grouped by month.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    /// Months in ascending order.
    pub months: Vec<MonthlyUsage>,
    /// Sum of all months' hours.
    pub total_hours: Decimal,
    /// Sum of all months' amounts.
    pub total_amount: Decimal,
}

/// Formats a closed interval as `"H hrs M mins"`.
pub fn format_duration(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let minutes = (end - start).num_minutes().max(0);
    format!("{} hrs {} mins", minutes / 60, minutes % 60)
}

fn hours_parked(start: DateTime<Utc>, end: DateTime<Utc>) -> Decimal {
    let ms = (end - start).num_milliseconds().max(0);
    Decimal::from(ms) / Decimal::from(MILLIS_PER_HOUR)
}

/// Lot administration plus occupancy and history views.
#[derive(Clone)]
pub struct LotRegistry {
    store: Arc<dyn RegistryStore>,
    clock: Arc<dyn Clock>,
    audit: Option<SharedAuditSink>,
}

impl LotRegistry {
    /// Registry access layer over `store`.
    pub fn new(store: Arc<dyn RegistryStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            audit: None,
        }
    }

    /// Record administrative changes into `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    fn require_admin(requester: &Requester, op: &'static str) -> Result<(), ParkingError> {
        if requester.is_admin() {
            Ok(())
        } else {
            Err(ParkingError::Forbidden(op))
        }
    }

    fn audit(&self, requester: &Requester, action: &str, lot: LotId, detail: Option<String>) {
        let now = self.clock.now();
        record(self.audit.as_ref(), || {
            build_audit_event(format!("lot:{lot}"), requester.id.to_string(), action, detail, now)
        });
    }

    /// Create a lot and materialize its spots in one transaction.
    pub fn create_lot(&self, requester: &Requester, new: NewLot) -> Result<Lot, ParkingError> {
        Self::require_admin(requester, "create_lot")?;
        validate_fields(&new.name, new.hourly_rate)?;
        let lot = transact(self.store.as_ref(), "create_lot", |tx| {
            let lot = tx.insert_lot(&new)?;
            for _ in 0..new.spot_count {
                tx.insert_spot(lot.id)?;
            }
            Ok(lot)
        })?;
        info!(lot_id = %lot.id, spots = lot.spot_count, "lot created");
        self.audit(requester, "lot.create", lot.id, Some(lot.name.clone()));
        Ok(lot)
    }

    /// Apply a partial update. Changing `spot_count` grows or shrinks the lot;
    /// only available spots are ever removed, highest id first.
    pub fn update_lot(&self, requester: &Requester, lot_id: LotId, update: LotUpdate) -> Result<Lot, ParkingError> {
        Self::require_admin(requester, "update_lot")?;
        let lot = transact(self.store.as_ref(), "update_lot", |tx| {
            let mut lot = tx.get_lot(lot_id)?.ok_or(ParkingError::LotNotFound(lot_id))?;
            if let Some(name) = &update.name {
                lot.name.clone_from(name);
            }
            if let Some(address) = &update.address {
                lot.address.clone_from(address);
            }
            if let Some(postal_code) = &update.postal_code {
                lot.postal_code.clone_from(postal_code);
            }
            if let Some(rate) = update.hourly_rate {
                lot.hourly_rate = rate;
            }
            validate_fields(&lot.name, lot.hourly_rate)?;
            if let Some(target) = update.spot_count {
                resize(tx, lot_id, target)?;
                lot.spot_count = target;
            }
            tx.update_lot(&lot)?;
            Ok(lot)
        })?;
        info!(lot_id = %lot.id, spots = lot.spot_count, "lot updated");
        self.audit(requester, "lot.update", lot.id, None);
        Ok(lot)
    }

    /// Delete a lot and its spots. Fails while any spot is occupied.
    /// Reservation history is kept.
    pub fn delete_lot(&self, requester: &Requester, lot_id: LotId) -> Result<(), ParkingError> {
        Self::require_admin(requester, "delete_lot")?;
        transact(self.store.as_ref(), "delete_lot", |tx| {
            tx.get_lot(lot_id)?.ok_or(ParkingError::LotNotFound(lot_id))?;
            let spots = tx.spots_by_lot(lot_id)?;
            if spots.iter().any(|s| s.status == SpotStatus::Occupied) {
                return Err(ParkingError::LotOccupied(lot_id));
            }
            for spot in spots {
                tx.delete_spot(spot.id)?;
            }
            tx.delete_lot(lot_id)?;
            Ok(())
        })?;
        info!(%lot_id, "lot deleted");
        self.audit(requester, "lot.delete", lot_id, None);
        Ok(())
    }

    /// Fetch one lot.
    pub fn lot(&self, lot_id: LotId) -> Result<Lot, ParkingError> {
        transact(self.store.as_ref(), "lot", |tx| {
            tx.get_lot(lot_id)?.ok_or(ParkingError::LotNotFound(lot_id))
        })
    }

    /// Every lot with occupancy counts.
    pub fn lot_summaries(&self) -> Result<Vec<LotSummary>, ParkingError> {
        transact(self.store.as_ref(), "lot_summaries", |tx| {
            let mut summaries = Vec::new();
            for lot in tx.list_lots()? {
                let spots = tx.spots_by_lot(lot.id)?;
                let occupied = count_u32(spots.iter().filter(|s| s.status == SpotStatus::Occupied).count());
                let total = count_u32(spots.len());
                summaries.push(LotSummary {
                    lot,
                    total,
                    available: total - occupied,
                    occupied,
                });
            }
            Ok(summaries)
        })
    }

    /// Spots of a lot with their holders.
    pub fn spot_details(&self, lot_id: LotId) -> Result<Vec<SpotDetail>, ParkingError> {
        transact(self.store.as_ref(), "spot_details", |tx| {
            tx.get_lot(lot_id)?.ok_or(ParkingError::LotNotFound(lot_id))?;
            let open: HashMap<SpotId, Reservation> = tx
                .open_reservations()?
                .into_iter()
                .map(|r| (r.spot_id, r))
                .collect();
            Ok(tx
                .spots_by_lot(lot_id)?
                .into_iter()
                .map(|spot| SpotDetail {
                    occupant: open.get(&spot.id).map(|r| Occupant {
                        reservation_id: r.id,
                        user_id: r.user_id,
                        started_at: r.started_at,
                    }),
                    spot,
                })
                .collect())
        })
    }

    /// A requester's reservations, newest first.
    pub fn reservations_for(&self, user: UserId) -> Result<Vec<ReservationView>, ParkingError> {
        transact(self.store.as_ref(), "reservations_for", |tx| {
            let rows = tx.reservations_by_user(user)?;
            let mut views = join_lots(tx, rows)?;
            views.sort_by(|a, b| {
                b.reservation
                    .started_at
                    .cmp(&a.reservation.started_at)
                    .then(b.reservation.id.cmp(&a.reservation.id))
            });
            Ok(views)
        })
    }

    /// Closed reservations of `user` grouped by start month.
    pub fn monthly_usage(&self, user: UserId) -> Result<UsageSummary, ParkingError> {
        let rows = transact(self.store.as_ref(), "monthly_usage", |tx| {
            Ok(tx.reservations_by_user(user)?)
        })?;
        let mut by_month: BTreeMap<String, (u32, Decimal, Decimal)> = BTreeMap::new();
        for r in &rows {
            let Some(ended_at) = r.ended_at else { continue };
            let entry = by_month
                .entry(r.started_at.format("%Y-%m").to_string())
                .or_default();
            entry.0 += 1;
            entry.1 += hours_parked(r.started_at, ended_at);
            entry.2 += r.cost;
        }
        let mut summary = UsageSummary::default();
        for (month, (reservations, hours, amount)) in by_month {
            summary.total_hours += hours;
            summary.total_amount += amount;
            summary.months.push(MonthlyUsage {
                month,
                reservations,
                hours: hours.round_dp(2),
                amount,
            });
        }
        summary.total_hours = summary.total_hours.round_dp(2);
        Ok(summary)
    }

    /// Every reservation ever made, oldest first. Admin only.
    pub fn all_reservations(&self, requester: &Requester) -> Result<Vec<ReservationView>, ParkingError> {
        Self::require_admin(requester, "all_reservations")?;
        self.history()
    }

    /// Unchecked full history, for trusted background exports.
    pub(crate) fn history(&self) -> Result<Vec<ReservationView>, ParkingError> {
        transact(self.store.as_ref(), "all_reservations", |tx| {
            let rows = tx.all_reservations()?;
            join_lots(tx, rows)
        })
    }
}

fn validate_fields(name: &str, hourly_rate: Decimal) -> Result<(), ParkingError> {
    if name.trim().is_empty() {
        return Err(ParkingError::InvalidInput("lot name must not be empty".into()));
    }
    if hourly_rate <= Decimal::ZERO {
        return Err(ParkingError::InvalidInput(format!(
            "hourly rate must be positive, got {hourly_rate}"
        )));
    }
    Ok(())
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn resize(tx: &mut (dyn RegistryTx + '_), lot_id: LotId, target: u32) -> Result<(), ParkingError> {
    let spots = tx.spots_by_lot(lot_id)?;
    let current = count_u32(spots.len());
    if target >= current {
        for _ in current..target {
            tx.insert_spot(lot_id)?;
        }
        return Ok(());
    }
    let requested = current - target;
    let free: Vec<SpotId> = spots
        .iter()
        .rev()
        .filter(|s| s.status == SpotStatus::Available)
        .map(|s| s.id)
        .collect();
    if count_u32(free.len()) < requested {
        return Err(ParkingError::InsufficientFreeSpots {
            lot: lot_id,
            requested,
            available: count_u32(free.len()),
        });
    }
    for id in free.into_iter().take(requested as usize) {
        tx.delete_spot(id)?;
    }
    Ok(())
}

fn join_lots(tx: &mut (dyn RegistryTx + '_), rows: Vec<Reservation>) -> Result<Vec<ReservationView>, ParkingError> {
    let lots: HashMap<LotId, String> = tx.list_lots()?.into_iter().map(|l| (l.id, l.name)).collect();
    let mut views = Vec::with_capacity(rows.len());
    for reservation in rows {
        let lot_id = tx.get_spot(reservation.spot_id)?.map(|s| s.lot_id);
        views.push(ReservationView {
            location: lot_id.and_then(|id| lots.get(&id).cloned()),
            duration: reservation
                .ended_at
                .map(|end| format_duration(reservation.started_at, end)),
            lot_id,
            reservation,
        });
    }
    Ok(views)
}
