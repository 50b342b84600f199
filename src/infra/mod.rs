//! Infrastructure adapters: storage, queue and mail backends.

pub mod mailer;
pub mod queue;
pub mod registry;
pub mod schema;

pub use mailer::{LogMailer, RecordingMailer};
pub use queue::InMemoryJobQueue;
pub use registry::InMemoryRegistry;
