//! Transactional storage seam for the resource registry.
//!
//! The engines never hold storage state across calls: every operation opens a
//! transaction with [`RegistryStore::begin`], works through [`RegistryTx`],
//! and either commits or rolls back before returning.

use chrono::{DateTime, Utc};

use crate::core::error::{ParkingError, RegistryError};
use crate::core::model::{Lot, LotId, NewLot, Reservation, ReservationId, Spot, SpotId, SpotStatus, UserId};

/// Times a transaction is re-run after a transient conflict.
pub const CONFLICT_RETRIES: u32 = 1;

/// A storage backend able to open isolated transactions.
///
/// Implementations must serialize transactions that touch the same spot row,
/// either by locking or by failing one of them with
/// [`RegistryError::Conflict`] at commit.
pub trait RegistryStore: Send + Sync {
    /// Open a transaction.
    fn begin(&self) -> Result<Box<dyn RegistryTx + '_>, RegistryError>;
}

/// Operations available inside one registry transaction.
///
/// Writes are invisible to other transactions until [`commit`](Self::commit).
/// Dropping a transaction without committing rolls it back.
pub trait RegistryTx {
    /// Fetch a lot.
    fn get_lot(&self, id: LotId) -> Result<Option<Lot>, RegistryError>;
    /// All lots ordered by id.
    fn list_lots(&self) -> Result<Vec<Lot>, RegistryError>;
    /// Insert a lot row and return it with its assigned id. Spots are not created.
    fn insert_lot(&mut self, lot: &NewLot) -> Result<Lot, RegistryError>;
    /// Overwrite a lot row.
    fn update_lot(&mut self, lot: &Lot) -> Result<(), RegistryError>;
    /// Delete a lot row.
    fn delete_lot(&mut self, id: LotId) -> Result<(), RegistryError>;

    /// Fetch a spot.
    fn get_spot(&self, id: SpotId) -> Result<Option<Spot>, RegistryError>;
    /// Spots of a lot ordered by id.
    fn spots_by_lot(&self, lot: LotId) -> Result<Vec<Spot>, RegistryError>;
    /// Materialize a new available spot under `lot`.
    fn insert_spot(&mut self, lot: LotId) -> Result<Spot, RegistryError>;
    /// Delete a spot row.
    fn delete_spot(&mut self, id: SpotId) -> Result<(), RegistryError>;
    /// Set a spot's status.
    fn update_spot_status(&mut self, id: SpotId, status: SpotStatus) -> Result<(), RegistryError>;

    /// Fetch a reservation.
    fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, RegistryError>;
    /// Reservations that have not been released, ordered by id.
    fn open_reservations(&self) -> Result<Vec<Reservation>, RegistryError>;
    /// Reservations of one requester ordered by id.
    fn reservations_by_user(&self, user: UserId) -> Result<Vec<Reservation>, RegistryError>;
    /// Every reservation ever made, ordered by id.
    fn all_reservations(&self) -> Result<Vec<Reservation>, RegistryError>;
    /// Insert an open reservation with zero cost.
    fn insert_reservation(
        &mut self,
        spot: SpotId,
        user: UserId,
        started_at: DateTime<Utc>,
    ) -> Result<Reservation, RegistryError>;
    /// Overwrite a reservation row.
    fn update_reservation(&mut self, reservation: &Reservation) -> Result<(), RegistryError>;

    /// Make all writes visible atomically.
    fn commit(self: Box<Self>) -> Result<(), RegistryError>;
    /// Discard all writes.
    fn rollback(self: Box<Self>);
}

/// Run `work` inside a transaction, committing on success and rolling back on
/// any error. A transient conflict re-runs the whole closure up to
/// [`CONFLICT_RETRIES`] more times before surfacing
/// [`ParkingError::StorageConflict`].
pub fn transact<T>(
    store: &dyn RegistryStore,
    op: &'static str,
    mut work: impl FnMut(&mut (dyn RegistryTx + '_)) -> Result<T, ParkingError>,
) -> Result<T, ParkingError> {
    let mut attempt = 0u32;
    loop {
        match run_once(store, &mut work) {
            Err(ParkingError::StorageConflict(reason)) if attempt < CONFLICT_RETRIES => {
                attempt += 1;
                tracing::warn!(op, attempt, %reason, "transient storage conflict, retrying");
            }
            result => return result,
        }
    }
}

fn run_once<T>(
    store: &dyn RegistryStore,
    work: &mut impl FnMut(&mut (dyn RegistryTx + '_)) -> Result<T, ParkingError>,
) -> Result<T, ParkingError> {
    let mut tx = store.begin()?;
    match work(tx.as_mut()) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            tx.rollback();
            Err(err)
        }
    }
}
