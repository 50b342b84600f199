//! Maps job kinds to handlers and turns execution results into typed outcomes.
//!
//! A handler renders a job into a [`Rendered`] message; the [`Mailer`] delivers
//! it. Rendering problems are the job's fault and never retried. Delivery
//! problems are the transport's fault and are.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::job::{Job, JobKind, JobOutcome};

/// File attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name shown to the recipient.
    pub filename: String,
    /// MIME type.
    pub mime_type: String,
    /// Raw content.
    pub bytes: Vec<u8>,
}

/// Message produced by a handler, ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Destination address.
    pub recipient: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Optional attachment.
    pub attachment: Option<Attachment>,
}

/// Why a handler could not render a job.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// The payload is missing fields or has the wrong shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// Data the handler reads was temporarily unavailable.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),
}

/// Why a message could not be delivered.
#[derive(Debug, Clone, Error)]
#[error("delivery to {recipient} failed: {reason}")]
pub struct DeliveryError {
    /// Intended recipient.
    pub recipient: String,
    /// Transport-level reason.
    pub reason: String,
}

/// Builds the message for one kind of job.
pub trait JobHandler: Send + Sync {
    /// Render the job's payload into a message.
    fn render(&self, job: &Job) -> Result<Rendered, RenderError>;
}

/// Outbound message transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one message.
    async fn deliver(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
        attachment: Option<&Attachment>,
    ) -> Result<(), DeliveryError>;
}

/// Explicit kind-to-handler table.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `kind`.
    #[must_use]
    pub fn with(mut self, kind: JobKind, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Handler for `kind`, if registered.
    pub fn get(&self, kind: JobKind) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(&kind)
    }
}

/// Runs a job through its handler and the mailer.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: HandlerRegistry,
    mailer: Arc<dyn Mailer>,
}

impl Dispatcher {
    /// Dispatcher over an explicit handler table.
    pub fn new(handlers: HandlerRegistry, mailer: Arc<dyn Mailer>) -> Self {
        Self { handlers, mailer }
    }

    /// Execute one job.
    pub async fn dispatch(&self, job: &Job) -> JobOutcome {
        let Some(handler) = self.handlers.get(job.kind) else {
            return JobOutcome::Terminal(format!("no handler registered for {}", job.kind));
        };
        let message = match handler.render(job) {
            Ok(message) => message,
            Err(RenderError::InvalidPayload(reason)) => {
                warn!(job_id = %job.id, kind = %job.kind, %reason, "job payload rejected");
                return JobOutcome::Terminal(format!("invalid payload: {reason}"));
            }
            Err(err @ RenderError::DataUnavailable(_)) => {
                return JobOutcome::Retryable(err.to_string());
            }
        };
        match self
            .mailer
            .deliver(
                &message.recipient,
                &message.subject,
                &message.body,
                message.attachment.as_ref(),
            )
            .await
        {
            Ok(()) => {
                debug!(job_id = %job.id, recipient = %message.recipient, "job delivered");
                JobOutcome::Succeeded
            }
            Err(err) => JobOutcome::Retryable(err.to_string()),
        }
    }
}
