//! Registry entities: lots, spots, reservations and the trusted caller context.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

macro_rules! row_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Lot identifier assigned by the registry.
    LotId
);
row_id!(
    /// Spot identifier assigned by the registry. Lower ids are allocated first.
    SpotId
);
row_id!(
    /// Reservation identifier assigned by the registry.
    ReservationId
);
row_id!(
    /// Requester identity, verified by the caller's auth layer.
    UserId
);

/// Role attached to a verified caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Parks cars.
    User,
    /// Manages lots and exports history.
    Admin,
}

/// Trusted caller context handed in by the routing layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    /// Caller identity.
    pub id: UserId,
    /// Caller role.
    pub role: Role,
    /// Address for receipts, if the caller has one on file.
    pub email: Option<String>,
}

impl Requester {
    /// A parking user without an email address.
    pub const fn user(id: u64) -> Self {
        Self {
            id: UserId(id),
            role: Role::User,
            email: None,
        }
    }

    /// An administrator.
    pub const fn admin(id: u64) -> Self {
        Self {
            id: UserId(id),
            role: Role::Admin,
            email: None,
        }
    }

    /// Attach an email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Whether the caller holds the admin role.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// A named collection of spots sharing one hourly rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    /// Identity.
    pub id: LotId,
    /// Display name.
    pub name: String,
    /// Street address.
    pub address: String,
    /// Postal code.
    pub postal_code: String,
    /// Price per started hour.
    pub hourly_rate: Decimal,
    /// Number of spots the lot is configured for.
    pub spot_count: u32,
}

/// Fields for a new lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLot {
    /// Display name.
    pub name: String,
    /// Street address.
    pub address: String,
    /// Postal code.
    pub postal_code: String,
    /// Price per started hour, must be positive.
    pub hourly_rate: Decimal,
    /// Spots to materialize.
    pub spot_count: u32,
}

/// Partial lot update; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New address.
    pub address: Option<String>,
    /// New postal code.
    pub postal_code: Option<String>,
    /// New hourly rate; applies to releases after the update.
    pub hourly_rate: Option<Decimal>,
    /// New spot count; grows or shrinks the lot.
    pub spot_count: Option<u32>,
}

/// Occupancy state of a spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotStatus {
    /// Free to allocate.
    Available,
    /// Held by an open reservation.
    Occupied,
}

/// One allocatable unit of capacity in a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spot {
    /// Identity.
    pub id: SpotId,
    /// Owning lot.
    pub lot_id: LotId,
    /// Current status.
    pub status: SpotStatus,
}

/// One occupancy episode of a spot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Identity.
    pub id: ReservationId,
    /// Occupied spot.
    pub spot_id: SpotId,
    /// Requester holding the spot.
    pub user_id: UserId,
    /// Allocation time. Never changes.
    pub started_at: DateTime<Utc>,
    /// Release time, set exactly once.
    pub ended_at: Option<DateTime<Utc>>,
    /// Billed amount, zero until release.
    pub cost: Decimal,
}

impl Reservation {
    /// Whether the reservation still holds its spot.
    pub const fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Result of a successful release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReceipt {
    /// Closed reservation.
    pub reservation_id: ReservationId,
    /// Freed spot.
    pub spot_id: SpotId,
    /// Lot the spot belongs to.
    pub lot_id: LotId,
    /// Release time.
    pub ended_at: DateTime<Utc>,
    /// Whole hours billed.
    pub hours_charged: u64,
    /// Amount billed.
    pub cost: Decimal,
}
