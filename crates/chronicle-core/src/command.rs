//! Command abstractions.

use uuid::Uuid;

use crate::event::EventMetadata;

/// Trait that all commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Correlation ID to trace this command through the system.
    fn correlation_id(&self) -> Uuid;

    /// Metadata stamped on the events this command produces.
    fn event_metadata(&self) -> EventMetadata {
        EventMetadata::caused_by(self.correlation_id(), self.command_type())
    }
}
