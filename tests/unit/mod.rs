//! Unit tests for individual components

mod audit_test;
mod billing_test;
mod config_test;
mod error_test;
mod recurrence_test;
mod retry_test;
