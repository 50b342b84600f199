//! Audit trail for allocations, releases and job lifecycle events.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

/// Audit event structure.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: Uuid,
    /// Entity the event is about, e.g. `reservation:12` or `job:<uuid>`.
    pub subject: String,
    /// Who caused it: a user id, `scheduler` or a worker name.
    pub actor: String,
    /// Action taken (allocate, release, enqueue, succeed, retry, fail, cancel).
    pub action: String,
    /// When it happened.
    pub created_at: DateTime<Utc>,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Audit sink shared between the engines and the worker pool.
pub type SharedAuditSink = Arc<Mutex<Box<dyn AuditSink>>>;

/// Wrap a sink for sharing.
pub fn shared(sink: impl AuditSink + 'static) -> SharedAuditSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// In-memory audit sink keeping the most recent events.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Forwards events to a shared [`InMemoryAuditSink`] so callers can keep a
/// handle for reading while the system owns the writer.
pub struct SharedMemorySink(pub Arc<Mutex<InMemoryAuditSink>>);

impl AuditSink for SharedMemorySink {
    fn record(&mut self, event: AuditEvent) {
        self.0.lock().record(event);
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    subject: impl Into<String>,
    actor: impl Into<String>,
    action: impl Into<String>,
    detail: Option<String>,
    created_at: DateTime<Utc>,
) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4(),
        subject: subject.into(),
        actor: actor.into(),
        action: action.into(),
        created_at,
        detail,
    }
}

/// Record into an optional sink.
pub(crate) fn record(sink: Option<&SharedAuditSink>, event: impl FnOnce() -> AuditEvent) {
    if let Some(sink) = sink {
        sink.lock().record(event());
    }
}
