//! Billing calculator.
//!
//! Parking is billed per started hour: any positive duration rounds up to the
//! next whole hour. A zero or negative duration bills nothing.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const MILLIS_PER_HOUR: u64 = 3_600_000;

/// Hours and amount charged for one reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    /// Whole hours billed.
    pub hours_charged: u64,
    /// `hours_charged * hourly_rate`.
    pub cost: Decimal,
}

/// Whole hours billed for the interval `[start, end]`.
pub fn hours_charged(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    let elapsed_ms = (end - start).num_milliseconds();
    if elapsed_ms <= 0 {
        return 0;
    }
    elapsed_ms.unsigned_abs().div_ceil(MILLIS_PER_HOUR)
}

/// Bill an interval at `hourly_rate`.
pub fn bill(start: DateTime<Utc>, end: DateTime<Utc>, hourly_rate: Decimal) -> Bill {
    let hours_charged = hours_charged(start, end);
    Bill {
        hours_charged,
        cost: hourly_rate * Decimal::from(hours_charged),
    }
}

/// Amount owed for parking from `start` to `end` at `hourly_rate`.
pub fn cost(start: DateTime<Utc>, end: DateTime<Utc>, hourly_rate: Decimal) -> Decimal {
    bill(start, end, hourly_rate).cost
}
