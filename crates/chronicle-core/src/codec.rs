//! JSON envelope codec.
//!
//! Writes envelopes with fixed camelCase property names in the order
//! `id, streamId, eventType, payload, domain, timestamp, version, metadata`.
//! Reads match property names case-insensitively, accept configured
//! aliases for `timestamp`, and resolve the payload through the
//! [`EventRegistry`] only after the envelope fields have been read.
//! Payload keys written in `PascalCase` or `UPPER` form are re-keyed to
//! camelCase before the registered decoder sees them. An `id`, when
//! present, must equal `<streamId>:<version>`.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::CodecOptions;
use crate::event::{EventEnvelope, EventMetadata, envelope_id};
use crate::registry::EventRegistry;

/// Failure to encode or decode an envelope.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The `(domain, event_type)` pair has no registered decoder.
    #[error("unknown event type \"{event_type}\" in domain \"{domain}\"")]
    UnknownEventType {
        /// Domain named by the envelope.
        domain: String,
        /// Event type named by the envelope.
        event_type: String,
    },

    /// A required envelope property is absent.
    #[error("envelope is missing required field \"{0}\"")]
    MissingField(&'static str),

    /// An envelope property has the wrong shape.
    #[error("envelope field \"{field}\" is invalid: {reason}")]
    InvalidField {
        /// Property name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The payload does not match its registered type.
    #[error("payload of {event_type} could not be decoded")]
    Payload {
        /// Event type being decoded.
        event_type: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The document is not valid JSON or could not be written.
    #[error("malformed envelope JSON")]
    Json(#[from] serde_json::Error),
}

/// Wire form of an envelope; serializes in the fixed property order.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope<'a> {
    id: String,
    stream_id: &'a str,
    event_type: &'a str,
    payload: Value,
    domain: &'a str,
    timestamp: i64,
    version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a EventMetadata>,
}

/// Encodes and decodes envelopes against a shared registry.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    registry: Arc<EventRegistry>,
    options: CodecOptions,
}

impl EnvelopeCodec {
    /// Creates a codec with default options.
    #[must_use]
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self {
            registry,
            options: CodecOptions::default(),
        }
    }

    /// Replaces the codec options.
    #[must_use]
    pub fn with_options(mut self, options: CodecOptions) -> Self {
        self.options = options;
        self
    }

    /// The registry payloads are resolved against.
    #[must_use]
    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Builds the serializable wire form of an envelope.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Payload` if the payload cannot be serialized.
    pub fn to_wire<'a>(&self, envelope: &'a EventEnvelope) -> Result<WireEnvelope<'a>, CodecError> {
        let payload = envelope
            .payload
            .to_json()
            .map_err(|source| CodecError::Payload {
                event_type: envelope.event_type.clone(),
                source,
            })?;
        Ok(WireEnvelope {
            id: envelope.id(),
            stream_id: &envelope.stream_id,
            event_type: &envelope.event_type,
            payload,
            domain: &envelope.domain,
            timestamp: envelope.timestamp,
            version: envelope.version,
            metadata: envelope.metadata.as_ref(),
        })
    }

    /// Encodes an envelope to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns a `CodecError` if the payload cannot be serialized.
    pub fn encode(&self, envelope: &EventEnvelope) -> Result<String, CodecError> {
        let wire = self.to_wire(envelope)?;
        Ok(serde_json::to_string(&wire)?)
    }

    /// Decodes an envelope from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns a `CodecError` if the document is malformed, lacks a required
    /// field, names an unregistered event type, or carries a payload that
    /// does not fit its type.
    pub fn decode(&self, json: &str) -> Result<EventEnvelope, CodecError> {
        let value: Value = serde_json::from_str(json)?;
        self.decode_value(value)
    }

    /// Decodes an envelope from an already-parsed JSON document.
    ///
    /// # Errors
    ///
    /// See [`decode`](Self::decode).
    pub fn decode_value(&self, value: Value) -> Result<EventEnvelope, CodecError> {
        let Value::Object(mut fields) = value else {
            return Err(CodecError::InvalidField {
                field: "envelope",
                reason: "expected a JSON object".to_owned(),
            });
        };

        let stream_id = required_string(&mut fields, "streamId")?;
        let event_type = required_string(&mut fields, "eventType")?;
        let domain = required_string(&mut fields, "domain")?;
        if domain.is_empty() {
            return Err(CodecError::InvalidField {
                field: "domain",
                reason: "must not be empty".to_owned(),
            });
        }

        let version = take(&mut fields, "version")
            .ok_or(CodecError::MissingField("version"))?
            .as_i64()
            .filter(|v| *v >= 1)
            .ok_or_else(|| CodecError::InvalidField {
                field: "version",
                reason: "expected an integer >= 1".to_owned(),
            })?;

        let timestamp = match self.take_timestamp(&mut fields) {
            Some(raw) => raw.as_i64().ok_or_else(|| CodecError::InvalidField {
                field: "timestamp",
                reason: "expected an integer".to_owned(),
            })?,
            None => 0,
        };

        if let Some(raw_id) = take(&mut fields, "id") {
            let Value::String(id) = raw_id else {
                return Err(CodecError::InvalidField {
                    field: "id",
                    reason: format!("expected a string, got {raw_id}"),
                });
            };
            if !id_matches(&id, &stream_id, version) {
                return Err(CodecError::InvalidField {
                    field: "id",
                    reason: format!(
                        "\"{id}\" does not match \"{}\"",
                        envelope_id(&stream_id, version)
                    ),
                });
            }
        }

        let metadata = match take(&mut fields, "metadata") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value::<EventMetadata>(raw).map_err(|e| {
                CodecError::InvalidField {
                    field: "metadata",
                    reason: e.to_string(),
                }
            })?),
        };

        let raw_payload = take(&mut fields, "payload").ok_or(CodecError::MissingField("payload"))?;
        let payload = self
            .registry
            .decode(&domain, &event_type, camel_case_keys(raw_payload))?;

        Ok(EventEnvelope {
            stream_id,
            version,
            event_type,
            domain,
            timestamp,
            payload,
            metadata,
        })
    }

    fn take_timestamp(&self, fields: &mut Map<String, Value>) -> Option<Value> {
        take(fields, "timestamp").or_else(|| {
            self.options
                .timestamp_aliases
                .iter()
                .find_map(|alias| take(fields, alias))
        })
    }
}

/// Removes a property, preferring an exact match over a case-insensitive one.
fn take(fields: &mut Map<String, Value>, name: &str) -> Option<Value> {
    if let Some(value) = fields.remove(name) {
        return Some(value);
    }
    let key = fields
        .keys()
        .find(|key| key.eq_ignore_ascii_case(name))
        .cloned()?;
    fields.remove(&key)
}

/// Re-keys every object in `value` to camelCase, recursively.
///
/// A key that is already present in camelCase wins over a differently
/// cased duplicate.
fn camel_case_keys(value: Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut rekeyed = Map::with_capacity(fields.len());
            let (canonical, other): (Vec<_>, Vec<_>) = fields
                .into_iter()
                .partition(|(key, _)| camel_case(key) == *key);
            for (key, value) in canonical.into_iter().chain(other) {
                let key = camel_case(&key);
                if !rekeyed.contains_key(&key) {
                    rekeyed.insert(key, camel_case_keys(value));
                }
            }
            Value::Object(rekeyed)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(camel_case_keys).collect()),
        other => other,
    }
}

/// Lower-cases the leading run of capitals: `Title` → `title`,
/// `NewName` → `newName`, `URLPath` → `urlPath`, `ID` → `id`.
fn camel_case(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len());
    for (i, c) in chars.iter().enumerate() {
        if !c.is_uppercase() {
            out.extend(&chars[i..]);
            return out;
        }
        let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
        if i > 0 && next_is_lower {
            out.extend(&chars[i..]);
            return out;
        }
        out.extend(c.to_lowercase());
    }
    out
}

fn required_string(
    fields: &mut Map<String, Value>,
    name: &'static str,
) -> Result<String, CodecError> {
    match take(fields, name) {
        None | Some(Value::Null) => Err(CodecError::MissingField(name)),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(CodecError::InvalidField {
            field: name,
            reason: format!("expected a string, got {other}"),
        }),
    }
}

/// Checks that an id read back from storage matches its coordinates.
#[must_use]
pub fn id_matches(id: &str, stream_id: &str, version: i64) -> bool {
    id == envelope_id(stream_id, version)
}
