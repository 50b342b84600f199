//! Tests for recurrence rules

use chrono::{FixedOffset, TimeZone, Utc};
use lotkeeper::core::{RecurrenceRule, RuleError};

fn ist() -> FixedOffset {
    FixedOffset::east_opt(330 * 60).unwrap()
}

#[test]
fn test_daily_reminder_rule() {
    let rule: RecurrenceRule = "0 10 * * *".parse().unwrap();
    assert_eq!(rule, RecurrenceRule::daily_at(10, 0).unwrap());
    assert_eq!(rule.to_string(), "0 10 * * *");

    let at_ten_ist = Utc.with_ymd_and_hms(2025, 1, 1, 4, 30, 0).unwrap().with_timezone(&ist());
    assert!(rule.matches(&at_ten_ist));
}

#[test]
fn test_monthly_report_rule_crosses_year() {
    let rule = RecurrenceRule::monthly_on(1, 8, 0).unwrap();
    let utc = FixedOffset::east_opt(0).unwrap();
    let after = Utc.with_ymd_and_hms(2025, 12, 1, 8, 0, 0).unwrap();
    assert_eq!(
        rule.next_after(after, utc),
        Some(Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap())
    );
}

#[test]
fn test_next_after_is_strictly_later() {
    let rule = RecurrenceRule::parse("*/5 * * * *").unwrap();
    let utc = FixedOffset::east_opt(0).unwrap();
    let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 10, 0).unwrap();
    assert_eq!(
        rule.next_after(at, utc),
        Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 15, 0).unwrap())
    );
}

#[test]
fn test_whitespace_is_normalized() {
    let rule = RecurrenceRule::parse("  0   8  1 *  * ").unwrap();
    assert_eq!(rule.as_str(), "0 8 1 * *");
}

#[test]
fn test_out_of_range_values() {
    assert!(matches!(
        RecurrenceRule::parse("0 24 * * *"),
        Err(RuleError::InvalidField { field: "hour", .. })
    ));
    assert!(matches!(
        RecurrenceRule::parse("0 0 0 * *"),
        Err(RuleError::InvalidField { field: "day-of-month", .. })
    ));
    assert!(matches!(
        RecurrenceRule::parse("0 0 * 13 *"),
        Err(RuleError::InvalidField { field: "month", .. })
    ));
}

#[test]
fn test_oversized_step_is_rejected() {
    assert!(matches!(
        RecurrenceRule::parse("5/4294967295 * * * *"),
        Err(RuleError::InvalidField { field: "minute", .. })
    ));
    assert!(matches!(
        RecurrenceRule::parse("0 */24 * * *"),
        Err(RuleError::InvalidField { field: "hour", .. })
    ));
    assert!(serde_json::from_str::<RecurrenceRule>("\"*/60 * * * *\"").is_err());

    let widest = RecurrenceRule::parse("*/59 * * * *").unwrap();
    let utc = FixedOffset::east_opt(0).unwrap();
    let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(
        widest.next_after(at, utc),
        Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 59, 0).unwrap())
    );
}
