//! Configuration models for the worker pool, retry policy and recurring jobs.

pub mod service;

pub use service::{
    BackoffConfig, ConfigError, RecurringJobConfig, RetryConfig, ScheduleConfig, ServiceConfig, WorkerPoolConfig,
};
