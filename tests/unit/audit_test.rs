//! Tests for audit sink

use chrono::{TimeZone, Utc};
use lotkeeper::core::{build_audit_event, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);
    let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

    sink.record(build_audit_event("reservation:1", "7", "reservation.allocate", Some("lot 1 spot 2".into()), at));

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].subject, "reservation:1");
    assert_eq!(events[0].actor, "7");
    assert_eq!(events[0].action, "reservation.allocate");
    assert_eq!(events[0].created_at, at);
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);
    let at = Utc::now();

    sink.record(build_audit_event("job:a", "scheduler", "job.enqueue", None, at));
    sink.record(build_audit_event("job:b", "scheduler", "job.enqueue", None, at));
    sink.record(build_audit_event("job:c", "scheduler", "job.enqueue", None, at));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].subject, "job:b"); // Oldest dropped
    assert_eq!(events[1].subject, "job:c");
}

#[test]
fn test_zero_capacity_sink_keeps_nothing() {
    let mut sink = InMemoryAuditSink::new(0);
    sink.record(build_audit_event("job:a", "scheduler", "job.enqueue", None, Utc::now()));
    assert!(sink.events().is_empty());
}

#[test]
fn test_event_ids_are_unique() {
    let at = Utc::now();
    let a = build_audit_event("s", "a", "x", None, at);
    let b = build_audit_event("s", "a", "x", None, at);
    assert_ne!(a.event_id, b.event_id);
}
