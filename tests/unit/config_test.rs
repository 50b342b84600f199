//! Tests for configuration validation

use std::collections::HashMap;

use lotkeeper::config::{BackoffConfig, ConfigError, RecurringJobConfig, ServiceConfig, WorkerPoolConfig};
use lotkeeper::core::{Backoff, JobKind};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn test_defaults_are_valid() {
    let cfg = ServiceConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.workers.max_pending, 1024);
    assert_eq!(cfg.retry.max_attempts, 3);
    assert_eq!(cfg.schedule.utc_offset_minutes, 330);
    assert!(cfg.workers.worker_count >= 1);
}

#[test]
fn test_worker_config_builder() {
    let cfg = WorkerPoolConfig::new()
        .with_worker_count(4)
        .with_max_pending(10)
        .with_job_timeout(std::time::Duration::from_secs(30));
    assert_eq!(cfg.worker_count, 4);
    assert_eq!(cfg.max_pending, 10);
    assert_eq!(cfg.job_timeout_secs, 30);
    assert!(cfg.validate().is_ok());
    assert!(cfg.with_worker_count(0).validate().is_err());
}

#[test]
fn test_from_json_str_fills_defaults() {
    let cfg = ServiceConfig::from_json_str(
        r#"{
            "workers": { "worker_count": 3 },
            "retry": { "max_attempts": 5, "backoff": { "type": "fixed", "delay_secs": 10 } },
            "schedule": {
                "utc_offset_minutes": 0,
                "recurring": [ { "kind": "reminder_email", "rule": "0 10 * * *",
                                 "payload": { "recipient": "a@b.c", "name": "A" } } ]
            }
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.workers.worker_count, 3);
    assert_eq!(cfg.workers.max_pending, 1024);
    assert_eq!(cfg.retry.backoff, BackoffConfig::Fixed { delay_secs: 10 });
    assert_eq!(cfg.schedule.recurring[0].kind, JobKind::ReminderEmail);
    assert!(matches!(cfg.retry.policy().backoff, Backoff::Fixed { .. }));
}

#[test]
fn test_from_json_str_rejects_bad_rule() {
    let err = ServiceConfig::from_json_str(
        r#"{ "schedule": { "recurring": [ { "kind": "generic", "rule": "every day" } ] } }"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_from_json_str_rejects_garbage() {
    assert!(matches!(
        ServiceConfig::from_json_str("{ not json"),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_exponential_base_above_ceiling_is_invalid() {
    let mut cfg = ServiceConfig::default();
    cfg.retry.backoff = BackoffConfig::Exponential {
        base_secs: 600,
        max_secs: 60,
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_from_lookup_reads_prefixed_variables() {
    let cfg = ServiceConfig::from_lookup(lookup(&[
        ("LOTKEEPER_WORKERS", "6"),
        ("LOTKEEPER_MAX_PENDING", "50"),
        ("LOTKEEPER_RETRY_FIXED_DELAY_SECS", "15"),
        ("LOTKEEPER_UTC_OFFSET_MINUTES", "0"),
        ("LOTKEEPER_REMINDER_RECIPIENT", "ana@example.com"),
        ("LOTKEEPER_REPORT_RECIPIENT", "ops@example.com"),
        ("LOTKEEPER_REPORT_RULE", "0 9 1 * *"),
    ]))
    .unwrap();
    assert_eq!(cfg.workers.worker_count, 6);
    assert_eq!(cfg.workers.max_pending, 50);
    assert_eq!(cfg.retry.backoff, BackoffConfig::Fixed { delay_secs: 15 });
    assert_eq!(cfg.schedule.utc_offset_minutes, 0);
    assert_eq!(
        cfg.schedule.recurring,
        vec![
            RecurringJobConfig::daily_reminder("ana@example.com", "ana@example.com"),
            RecurringJobConfig {
                rule: "0 9 1 * *".into(),
                ..RecurringJobConfig::monthly_report("ops@example.com", "ops@example.com")
            },
        ]
    );
}

#[test]
fn test_from_lookup_reports_bad_numbers() {
    let err = ServiceConfig::from_lookup(lookup(&[("LOTKEEPER_WORKERS", "many")])).unwrap_err();
    match err {
        ConfigError::Env { var, .. } => assert_eq!(var, "LOTKEEPER_WORKERS"),
        other => panic!("unexpected error: {other}"),
    }
}
