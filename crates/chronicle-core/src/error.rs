//! Domain error types.

use thiserror::Error;

use crate::codec::CodecError;

/// Boxed error used to carry backend and handler failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate stream has no events.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(String),

    /// Optimistic concurrency conflict: the stream has advanced past the
    /// version the writer read.
    #[error("concurrency conflict on stream {stream_id}: expected version {expected_version} is outdated")]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream_id: String,
        /// The version the writer expected to append after.
        expected_version: i64,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An envelope names an event type that is not registered for its domain.
    #[error("unknown event type \"{event_type}\" in domain \"{domain}\"")]
    UnknownEventType {
        /// The domain the envelope belongs to.
        domain: String,
        /// The unresolved event type name.
        event_type: String,
    },

    /// `apply` was called with an event the aggregate has no handler for.
    #[error("no handler registered for event type \"{event_type}\"")]
    UnregisteredEvent {
        /// The event type name.
        event_type: String,
    },

    /// An envelope could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[source] CodecError),

    /// The event store backend failed.
    #[error("event store failure: {0}")]
    StoreFailure(#[source] BoxError),

    /// The snapshot store backend failed.
    #[error("snapshot store failure: {0}")]
    SnapshotFailure(#[source] BoxError),

    /// A projector handler failed; the batch was aborted at this envelope.
    #[error("handler failed for {event_type} at {stream_id}:{version}")]
    HandlerFailure {
        /// Stream of the failing envelope.
        stream_id: String,
        /// Version of the failing envelope.
        version: i64,
        /// Event type of the failing envelope.
        event_type: String,
        /// The handler's error.
        #[source]
        source: BoxError,
    },

    /// An aggregate handler failed during replay; the load was aborted.
    #[error("failed to load {event_type} at {stream_id}:{version}")]
    LoadFailure {
        /// Stream being loaded.
        stream_id: String,
        /// Version of the envelope that failed to apply.
        version: i64,
        /// Event type of the envelope that failed to apply.
        event_type: String,
        /// The dispatcher's error.
        #[source]
        source: BoxError,
    },

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl DomainError {
    /// Wraps a backend error as a `StoreFailure`.
    pub fn store_failure(err: impl Into<BoxError>) -> Self {
        Self::StoreFailure(err.into())
    }

    /// Wraps a backend error as a `SnapshotFailure`.
    pub fn snapshot_failure(err: impl Into<BoxError>) -> Self {
        Self::SnapshotFailure(err.into())
    }

    /// Returns `true` for `ConcurrencyConflict`.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl From<CodecError> for DomainError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnknownEventType { domain, event_type } => {
                Self::UnknownEventType { domain, event_type }
            }
            other => Self::Codec(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_unknown_event_type_codec_error_maps_to_top_level_variant() {
        let err: DomainError = CodecError::UnknownEventType {
            domain: "todo".to_owned(),
            event_type: "Nope".to_owned(),
        }
        .into();

        match err {
            DomainError::UnknownEventType { domain, event_type } => {
                assert_eq!(domain, "todo");
                assert_eq!(event_type, "Nope");
            }
            other => panic!("expected UnknownEventType, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_field_codec_error_stays_a_codec_error() {
        let err: DomainError = CodecError::MissingField("domain").into();

        assert!(matches!(err, DomainError::Codec(CodecError::MissingField("domain"))));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_store_failure_keeps_source_message() {
        let err = DomainError::store_failure("connection refused");

        assert_eq!(err.to_string(), "event store failure: connection refused");
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_conflict_display_names_stream_and_version() {
        let err = DomainError::ConcurrencyConflict {
            stream_id: "todo:1".to_owned(),
            expected_version: 3,
        };

        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "concurrency conflict on stream todo:1: expected version 3 is outdated"
        );
    }
}
