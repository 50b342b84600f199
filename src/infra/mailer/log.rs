//! Mailer that writes messages to the tracing log instead of sending them.

use async_trait::async_trait;
use tracing::info;

use crate::core::dispatcher::{Attachment, DeliveryError, Mailer};

/// Logs every message at info level. Useful for local runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
        attachment: Option<&Attachment>,
    ) -> Result<(), DeliveryError> {
        info!(
            recipient,
            subject,
            body_len = body.len(),
            attachment = attachment.map(|a| a.filename.as_str()),
            "mail sent"
        );
        Ok(())
    }
}
