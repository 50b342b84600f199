//! Mailer that records deliveries in memory.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::dispatcher::{Attachment, DeliveryError, Mailer};

/// A delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Destination address.
    pub recipient: String,
    /// Subject line.
    pub subject: String,
    /// Body text.
    pub body: String,
    /// Attachment, if any.
    pub attachment: Option<Attachment>,
}

/// Records messages and can be told to fail or stall.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMessage>>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
    delay: Mutex<Option<Duration>>,
}

impl RecordingMailer {
    /// Mailer that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` deliveries.
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Sleep this long inside every delivery.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Messages delivered so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Deliveries attempted, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn deliver(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
        attachment: Option<&Attachment>,
    ) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DeliveryError {
                recipient: recipient.to_string(),
                reason: "connection refused".into(),
            });
        }
        self.sent.lock().push(SentMessage {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            attachment: attachment.cloned(),
        });
        Ok(())
    }
}
