//! Per-domain mapping from event type names to payload decoders.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::codec::CodecError;
use crate::event::{DomainEvent, EventPayload};

type Decoder = fn(serde_json::Value) -> Result<Arc<dyn EventPayload>, serde_json::Error>;

fn decode_as<E: DomainEvent>(
    value: serde_json::Value,
) -> Result<Arc<dyn EventPayload>, serde_json::Error> {
    let event: E = serde_json::from_value(value)?;
    Ok(Arc::new(event))
}

/// Resolves `(domain, event_type)` to a payload decoder.
///
/// Populated once at startup and then shared read-only.
#[derive(Default, Clone)]
pub struct EventRegistry {
    domains: HashMap<String, HashMap<&'static str, Decoder>>,
}

impl EventRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `E` under `domain`. Re-registering a name replaces its decoder.
    pub fn register<E: DomainEvent>(&mut self, domain: &str) {
        let previous = self
            .domains
            .entry(domain.to_owned())
            .or_default()
            .insert(E::EVENT_TYPE, decode_as::<E>);
        if previous.is_some() {
            warn!(
                domain,
                event_type = E::EVENT_TYPE,
                "event type registered twice; keeping the latest decoder"
            );
        }
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with<E: DomainEvent>(mut self, domain: &str) -> Self {
        self.register::<E>(domain);
        self
    }

    /// Returns `true` if `event_type` resolves within `domain`.
    #[must_use]
    pub fn is_registered(&self, domain: &str, event_type: &str) -> bool {
        self.domains
            .get(domain)
            .is_some_and(|types| types.contains_key(event_type))
    }

    /// Decodes a raw payload.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::UnknownEventType` if the name does not resolve in
    /// `domain`, or `CodecError::Payload` if the JSON does not fit the type.
    pub fn decode(
        &self,
        domain: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<Arc<dyn EventPayload>, CodecError> {
        let decoder = self
            .domains
            .get(domain)
            .and_then(|types| types.get(event_type))
            .ok_or_else(|| CodecError::UnknownEventType {
                domain: domain.to_owned(),
                event_type: event_type.to_owned(),
            })?;
        decoder(payload).map_err(|source| CodecError::Payload {
            event_type: event_type.to_owned(),
            source,
        })
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (domain, types) in &self.domains {
            let mut names: Vec<_> = types.keys().collect();
            names.sort_unstable();
            map.entry(domain, &names);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Opened {
        id: u32,
    }

    impl DomainEvent for Opened {
        const EVENT_TYPE: &'static str = "Opened";
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OtherOpened {
        name: String,
    }

    impl DomainEvent for OtherOpened {
        const EVENT_TYPE: &'static str = "Opened";
    }

    #[test]
    fn test_decode_resolves_registered_type() {
        let registry = EventRegistry::new().with::<Opened>("doors");

        let payload = registry.decode("doors", "Opened", json!({ "id": 4 })).unwrap();

        assert_eq!(
            payload.as_any().downcast_ref::<Opened>(),
            Some(&Opened { id: 4 })
        );
    }

    #[test]
    fn test_same_name_resolves_per_domain() {
        // Arrange
        let registry = EventRegistry::new()
            .with::<Opened>("doors")
            .with::<OtherOpened>("accounts");

        // Act
        let account = registry
            .decode("accounts", "Opened", json!({ "name": "savings" }))
            .unwrap();

        // Assert
        assert!(account.as_any().downcast_ref::<OtherOpened>().is_some());
        assert!(registry.is_registered("doors", "Opened"));
        assert!(!registry.is_registered("windows", "Opened"));
    }

    #[test]
    fn test_unknown_type_is_reported_with_domain() {
        let registry = EventRegistry::new().with::<Opened>("doors");

        let err = registry.decode("doors", "Closed", json!({})).unwrap_err();

        assert!(matches!(
            err,
            CodecError::UnknownEventType { ref domain, ref event_type }
                if domain == "doors" && event_type == "Closed"
        ));
    }

    #[test]
    fn test_mismatched_payload_is_a_payload_error() {
        let registry = EventRegistry::new().with::<Opened>("doors");

        let err = registry
            .decode("doors", "Opened", json!({ "id": "four" }))
            .unwrap_err();

        assert!(matches!(err, CodecError::Payload { .. }));
    }
}
