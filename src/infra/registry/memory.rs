//! In-memory registry backend.
//!
//! Transactions hold the table mutex for their whole lifetime, which makes
//! them fully serializable. Writes are applied in place and recorded in an
//! undo log that is replayed in reverse when the transaction is dropped
//! without committing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;

use crate::core::{
    Lot, LotId, NewLot, RegistryError, RegistryStore, RegistryTx, Reservation, ReservationId, Spot,
    SpotId, SpotStatus, UserId,
};

#[derive(Debug, Default)]
struct Tables {
    lots: BTreeMap<LotId, Lot>,
    spots: BTreeMap<SpotId, Spot>,
    reservations: BTreeMap<ReservationId, Reservation>,
    // Sequences are not rolled back, gaps are allowed.
    last_lot: u64,
    last_spot: u64,
    last_reservation: u64,
}

enum Undo {
    Lot(LotId, Option<Lot>),
    Spot(SpotId, Option<Spot>),
    Reservation(ReservationId, Option<Reservation>),
}

/// Registry held entirely in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    tables: Mutex<Tables>,
    injected_conflicts: AtomicU32,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with [`RegistryError::Conflict`]
    /// (and roll back). Used to exercise conflict handling.
    pub fn inject_commit_conflicts(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::Release);
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl RegistryStore for InMemoryRegistry {
    fn begin(&self) -> Result<Box<dyn RegistryTx + '_>, RegistryError> {
        Ok(Box::new(InMemoryTx {
            tables: self.tables.lock(),
            undo: Vec::new(),
            committed: false,
            registry: self,
        }))
    }
}

struct InMemoryTx<'a> {
    tables: MutexGuard<'a, Tables>,
    undo: Vec<Undo>,
    committed: bool,
    registry: &'a InMemoryRegistry,
}

impl InMemoryTx<'_> {
    fn put_lot(&mut self, lot: Lot) {
        let previous = self.tables.lots.insert(lot.id, lot.clone());
        self.undo.push(Undo::Lot(lot.id, previous));
    }

    fn put_spot(&mut self, spot: Spot) {
        let previous = self.tables.spots.insert(spot.id, spot);
        self.undo.push(Undo::Spot(spot.id, previous));
    }

    fn put_reservation(&mut self, reservation: Reservation) {
        let id = reservation.id;
        let previous = self.tables.reservations.insert(id, reservation);
        self.undo.push(Undo::Reservation(id, previous));
    }

    fn undo_all(&mut self) {
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Lot(id, Some(lot)) => {
                    self.tables.lots.insert(id, lot);
                }
                Undo::Lot(id, None) => {
                    self.tables.lots.remove(&id);
                }
                Undo::Spot(id, Some(spot)) => {
                    self.tables.spots.insert(id, spot);
                }
                Undo::Spot(id, None) => {
                    self.tables.spots.remove(&id);
                }
                Undo::Reservation(id, Some(reservation)) => {
                    self.tables.reservations.insert(id, reservation);
                }
                Undo::Reservation(id, None) => {
                    self.tables.reservations.remove(&id);
                }
            }
        }
    }

    fn reservations_where(&self, keep: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        self.tables
            .reservations
            .values()
            .filter(|r| keep(*r))
            .cloned()
            .collect()
    }
}

impl Drop for InMemoryTx<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.undo_all();
        }
    }
}

impl RegistryTx for InMemoryTx<'_> {
    fn get_lot(&self, id: LotId) -> Result<Option<Lot>, RegistryError> {
        Ok(self.tables.lots.get(&id).cloned())
    }

    fn list_lots(&self) -> Result<Vec<Lot>, RegistryError> {
        Ok(self.tables.lots.values().cloned().collect())
    }

    fn insert_lot(&mut self, lot: &NewLot) -> Result<Lot, RegistryError> {
        self.tables.last_lot += 1;
        let row = Lot {
            id: LotId(self.tables.last_lot),
            name: lot.name.clone(),
            address: lot.address.clone(),
            postal_code: lot.postal_code.clone(),
            hourly_rate: lot.hourly_rate,
            spot_count: lot.spot_count,
        };
        self.put_lot(row.clone());
        Ok(row)
    }

    fn update_lot(&mut self, lot: &Lot) -> Result<(), RegistryError> {
        if !self.tables.lots.contains_key(&lot.id) {
            return Err(RegistryError::MissingRow {
                entity: "lot",
                id: lot.id.0,
            });
        }
        self.put_lot(lot.clone());
        Ok(())
    }

    fn delete_lot(&mut self, id: LotId) -> Result<(), RegistryError> {
        let previous = self
            .tables
            .lots
            .remove(&id)
            .ok_or(RegistryError::MissingRow { entity: "lot", id: id.0 })?;
        self.undo.push(Undo::Lot(id, Some(previous)));
        Ok(())
    }

    fn get_spot(&self, id: SpotId) -> Result<Option<Spot>, RegistryError> {
        Ok(self.tables.spots.get(&id).copied())
    }

    fn spots_by_lot(&self, lot: LotId) -> Result<Vec<Spot>, RegistryError> {
        Ok(self
            .tables
            .spots
            .values()
            .filter(|s| s.lot_id == lot)
            .copied()
            .collect())
    }

    fn insert_spot(&mut self, lot: LotId) -> Result<Spot, RegistryError> {
        if !self.tables.lots.contains_key(&lot) {
            return Err(RegistryError::MissingRow { entity: "lot", id: lot.0 });
        }
        self.tables.last_spot += 1;
        let spot = Spot {
            id: SpotId(self.tables.last_spot),
            lot_id: lot,
            status: SpotStatus::Available,
        };
        self.put_spot(spot);
        Ok(spot)
    }

    fn delete_spot(&mut self, id: SpotId) -> Result<(), RegistryError> {
        let previous = self
            .tables
            .spots
            .remove(&id)
            .ok_or(RegistryError::MissingRow { entity: "spot", id: id.0 })?;
        self.undo.push(Undo::Spot(id, Some(previous)));
        Ok(())
    }

    fn update_spot_status(&mut self, id: SpotId, status: SpotStatus) -> Result<(), RegistryError> {
        let mut spot = self
            .tables
            .spots
            .get(&id)
            .copied()
            .ok_or(RegistryError::MissingRow { entity: "spot", id: id.0 })?;
        spot.status = status;
        self.put_spot(spot);
        Ok(())
    }

    fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, RegistryError> {
        Ok(self.tables.reservations.get(&id).cloned())
    }

    fn open_reservations(&self) -> Result<Vec<Reservation>, RegistryError> {
        Ok(self.reservations_where(Reservation::is_open))
    }

    fn reservations_by_user(&self, user: UserId) -> Result<Vec<Reservation>, RegistryError> {
        Ok(self.reservations_where(|r| r.user_id == user))
    }

    fn all_reservations(&self) -> Result<Vec<Reservation>, RegistryError> {
        Ok(self.reservations_where(|_| true))
    }

    fn insert_reservation(
        &mut self,
        spot: SpotId,
        user: UserId,
        started_at: DateTime<Utc>,
    ) -> Result<Reservation, RegistryError> {
        if !self.tables.spots.contains_key(&spot) {
            return Err(RegistryError::MissingRow { entity: "spot", id: spot.0 });
        }
        self.tables.last_reservation += 1;
        let reservation = Reservation {
            id: ReservationId(self.tables.last_reservation),
            spot_id: spot,
            user_id: user,
            started_at,
            ended_at: None,
            cost: Decimal::ZERO,
        };
        self.put_reservation(reservation.clone());
        Ok(reservation)
    }

    fn update_reservation(&mut self, reservation: &Reservation) -> Result<(), RegistryError> {
        if !self.tables.reservations.contains_key(&reservation.id) {
            return Err(RegistryError::MissingRow {
                entity: "reservation",
                id: reservation.id.0,
            });
        }
        self.put_reservation(reservation.clone());
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), RegistryError> {
        if self.registry.take_injected_conflict() {
            // Dropping without `committed` replays the undo log.
            return Err(RegistryError::Conflict("injected commit conflict".into()));
        }
        self.committed = true;
        self.undo.clear();
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_lot(spots: u32) -> NewLot {
        NewLot {
            name: "Central".into(),
            address: "1 Main St".into(),
            postal_code: "600001".into(),
            hourly_rate: Decimal::from(10),
            spot_count: spots,
        }
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let registry = InMemoryRegistry::new();
        {
            let mut tx = registry.begin().unwrap();
            let lot = tx.insert_lot(&new_lot(1)).unwrap();
            tx.insert_spot(lot.id).unwrap();
        }
        let tx = registry.begin().unwrap();
        assert!(tx.list_lots().unwrap().is_empty());
    }

    #[test]
    fn rollback_restores_overwritten_rows() {
        let registry = InMemoryRegistry::new();
        let mut tx = registry.begin().unwrap();
        let lot = tx.insert_lot(&new_lot(1)).unwrap();
        let spot = tx.insert_spot(lot.id).unwrap();
        tx.commit().unwrap();

        let mut tx = registry.begin().unwrap();
        tx.update_spot_status(spot.id, SpotStatus::Occupied).unwrap();
        tx.delete_lot(lot.id).unwrap();
        tx.rollback();

        let tx = registry.begin().unwrap();
        assert_eq!(tx.get_spot(spot.id).unwrap().unwrap().status, SpotStatus::Available);
        assert_eq!(tx.get_lot(lot.id).unwrap(), Some(lot));
    }

    #[test]
    fn injected_conflict_fails_commit_once() {
        let registry = InMemoryRegistry::new();
        registry.inject_commit_conflicts(1);

        let mut tx = registry.begin().unwrap();
        tx.insert_lot(&new_lot(0)).unwrap();
        let err = tx.commit().unwrap_err();
        assert!(err.is_transient());

        let mut tx = registry.begin().unwrap();
        let lot = tx.insert_lot(&new_lot(0)).unwrap();
        tx.commit().unwrap();

        let tx = registry.begin().unwrap();
        assert_eq!(tx.list_lots().unwrap(), vec![lot]);
    }

    #[test]
    fn spots_are_listed_in_id_order() {
        let registry = InMemoryRegistry::new();
        let mut tx = registry.begin().unwrap();
        let lot = tx.insert_lot(&new_lot(3)).unwrap();
        for _ in 0..3 {
            tx.insert_spot(lot.id).unwrap();
        }
        let ids: Vec<u64> = tx.spots_by_lot(lot.id).unwrap().iter().map(|s| s.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
