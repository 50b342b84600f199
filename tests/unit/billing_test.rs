//! Tests for the billing calculator

use chrono::{DateTime, Duration, TimeZone, Utc};
use lotkeeper::core::{bill, cost, hours_charged};
use rust_decimal::Decimal;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap()
}

#[test]
fn test_fixed_clock_bills_nothing() {
    let b = bill(start(), start(), Decimal::from(12));
    assert_eq!(b.hours_charged, 0);
    assert_eq!(b.cost, Decimal::ZERO);
}

#[test]
fn test_end_before_start_bills_nothing() {
    assert_eq!(cost(start(), start() - Duration::minutes(5), Decimal::from(12)), Decimal::ZERO);
}

#[test]
fn test_first_hour_costs_one_rate() {
    let rate = Decimal::new(75, 1);
    for secs in [1, 59, 60, 1_800, 3_599, 3_600] {
        assert_eq!(cost(start(), start() + Duration::seconds(secs), rate), rate, "{secs}s");
    }
}

#[test]
fn test_started_hours_round_up() {
    assert_eq!(hours_charged(start(), start() + Duration::seconds(3_601)), 2);
    assert_eq!(hours_charged(start(), start() + Duration::minutes(90)), 2);
    assert_eq!(hours_charged(start(), start() + Duration::hours(24)), 24);
    assert_eq!(hours_charged(start(), start() + Duration::milliseconds(1)), 1);
}

#[test]
fn test_cost_is_monotonic_multiple_of_rate() {
    let rate = Decimal::from(10);
    let mut previous = Decimal::ZERO;
    for minutes in (0..600).step_by(7) {
        let c = cost(start(), start() + Duration::minutes(minutes), rate);
        assert!(c >= previous);
        assert!(c >= Decimal::ZERO);
        assert_eq!(c % rate, Decimal::ZERO);
        previous = c;
    }
}
