//! Outbound mail transports.

pub mod log;
pub mod memory;

pub use log::LogMailer;
pub use memory::{RecordingMailer, SentMessage};
