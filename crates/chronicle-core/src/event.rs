//! Domain event abstractions.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trait that all typed event payloads implement.
///
/// `EVENT_TYPE` is the name the payload is registered under within its
/// domain; it selects the decoder on read and the handler on dispatch.
pub trait DomainEvent: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// The registered type name of this event.
    const EVENT_TYPE: &'static str;
}

/// Type-erased event payload as carried by envelopes and pending changes.
pub trait EventPayload: fmt::Debug + Send + Sync + 'static {
    /// Returns the registered type name of the payload.
    fn event_type(&self) -> &'static str;

    /// Serializes the payload to JSON.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the payload cannot be represented.
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;

    /// Upcast used to narrow the payload back to its concrete type.
    fn as_any(&self) -> &dyn Any;
}

impl<E: DomainEvent> EventPayload for E {
    fn event_type(&self) -> &'static str {
        E::EVENT_TYPE
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Metadata propagated from the command that caused an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Correlation ID for tracing a command through its effects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    /// Identifies the command or event that caused this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
}

impl EventMetadata {
    /// Metadata carrying a fresh correlation ID and no causation.
    #[must_use]
    pub fn correlated() -> Self {
        Self {
            correlation_id: Some(Uuid::new_v4()),
            causation_id: None,
        }
    }

    /// Metadata for an event caused by a specific command.
    #[must_use]
    pub fn caused_by(correlation_id: Uuid, causation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            causation_id: Some(causation_id.into()),
        }
    }
}

/// The persisted record wrapping a payload with its stream coordinates.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    /// Stream (aggregate instance) this event belongs to.
    pub stream_id: String,
    /// Position within the stream, starting at 1.
    pub version: i64,
    /// Registered type name of the payload.
    pub event_type: String,
    /// Namespace for `event_type`.
    pub domain: String,
    /// Seconds since the epoch at append time. Informational only.
    pub timestamp: i64,
    /// The decoded payload.
    pub payload: Arc<dyn EventPayload>,
    /// Command metadata, if any.
    pub metadata: Option<EventMetadata>,
}

impl EventEnvelope {
    /// Wraps a payload; `event_type` is taken from the payload.
    #[must_use]
    pub fn new(
        stream_id: impl Into<String>,
        version: i64,
        domain: impl Into<String>,
        timestamp: i64,
        payload: Arc<dyn EventPayload>,
        metadata: Option<EventMetadata>,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            version,
            event_type: payload.event_type().to_owned(),
            domain: domain.into(),
            timestamp,
            payload,
            metadata,
        }
    }

    /// Globally unique, deterministic identifier: `"{stream_id}:{version}"`.
    #[must_use]
    pub fn id(&self) -> String {
        envelope_id(&self.stream_id, self.version)
    }

    /// Narrows the payload to a concrete event type.
    #[must_use]
    pub fn payload_as<E: DomainEvent>(&self) -> Option<&E> {
        self.payload.as_any().downcast_ref::<E>()
    }

    /// Version guard for idempotent projections: `true` when this envelope
    /// is newer than a row last written at `stored_version`.
    #[must_use]
    pub fn supersedes(&self, stored_version: i64) -> bool {
        self.version > stored_version
    }
}

impl fmt::Display for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.stream_id, self.event_type, self.version)
    }
}

/// Builds the envelope id for a stream position.
#[must_use]
pub fn envelope_id(stream_id: &str, version: i64) -> String {
    format!("{stream_id}:{version}")
}
