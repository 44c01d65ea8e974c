//! Aggregate base: handler registry, change buffer, version tracking and
//! replay.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::{BoxError, DomainError};
use crate::event::{DomainEvent, EventPayload};
use crate::snapshot::SnapshotCodec;
use crate::store::EventStream;

/// Version and pending changes shared by every event-sourced aggregate.
///
/// Only `version` is serialized; pending changes never appear in snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventSourced {
    version: i64,
    #[serde(skip)]
    pending: Vec<Arc<dyn EventPayload>>,
}

impl EventSourced {
    /// Version of the last applied envelope; `0` if never persisted.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Payloads produced since the last load or commit, in order.
    #[must_use]
    pub fn pending(&self) -> &[Arc<dyn EventPayload>] {
        &self.pending
    }

    pub(crate) fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    pub(crate) fn commit(&mut self, version: i64) {
        self.version = version;
        self.pending.clear();
    }
}

/// Failure to route a payload to an aggregate handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No handler is registered for the payload's type.
    #[error("no handler registered for {0}")]
    NotRegistered(String),

    /// The payload registered under a name is not the handler's type.
    #[error("payload for {event_type} is not a {expected}")]
    PayloadMismatch {
        /// Event type name used for lookup.
        event_type: String,
        /// Rust type the handler expected.
        expected: &'static str,
    },

    /// The handler itself failed.
    #[error(transparent)]
    Failed(BoxError),
}

type Handler<A> = Box<dyn Fn(&mut A, &dyn EventPayload) -> Result<(), HandlerError> + Send + Sync>;

/// Map from event type name to the closure that narrows the payload and
/// mutates the aggregate.
pub struct EventHandlers<A> {
    handlers: HashMap<&'static str, Handler<A>>,
}

impl<A: 'static> EventHandlers<A> {
    /// Creates an empty handler map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers an infallible handler for `E`.
    #[must_use]
    pub fn on<E, F>(self, handler: F) -> Self
    where
        E: DomainEvent,
        F: Fn(&mut A, &E) + Send + Sync + 'static,
    {
        self.try_on(move |aggregate: &mut A, event: &E| {
            handler(aggregate, event);
            Ok(())
        })
    }

    /// Registers a handler for `E` that may reject the event.
    #[must_use]
    pub fn try_on<E, F>(mut self, handler: F) -> Self
    where
        E: DomainEvent,
        F: Fn(&mut A, &E) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let erased: Handler<A> = Box::new(move |aggregate: &mut A, payload: &dyn EventPayload| {
            let event = payload.as_any().downcast_ref::<E>().ok_or_else(|| {
                HandlerError::PayloadMismatch {
                    event_type: E::EVENT_TYPE.to_owned(),
                    expected: std::any::type_name::<E>(),
                }
            })?;
            handler(aggregate, event).map_err(HandlerError::Failed)
        });
        self.handlers.insert(E::EVENT_TYPE, erased);
        self
    }

    /// Returns `true` if a handler is registered for `event_type`.
    #[must_use]
    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Routes `payload` to its handler.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::NotRegistered` if no handler matches, or the
    /// handler's own failure.
    pub fn dispatch(&self, aggregate: &mut A, payload: &dyn EventPayload) -> Result<(), HandlerError> {
        let event_type = payload.event_type();
        let handler = self
            .handlers
            .get(event_type)
            .ok_or_else(|| HandlerError::NotRegistered(event_type.to_owned()))?;
        handler(aggregate, payload)
    }
}

impl<A: 'static> Default for EventHandlers<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for EventHandlers<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort_unstable();
        f.debug_struct("EventHandlers").field("events", &names).finish()
    }
}

/// An event-sourced aggregate.
///
/// Domain methods validate, then call [`apply`](Aggregate::apply), which
/// mutates state through the registered handler before enqueueing the
/// event. An aggregate instance is a single-writer scratchpad between a
/// repository `load` and `save`.
pub trait Aggregate: Default + Send + Sync + 'static {
    /// Stream this instance is persisted to.
    fn stream_id(&self) -> String;

    /// Handlers for every event type the aggregate folds.
    fn handlers() -> &'static EventHandlers<Self>;

    /// The embedded version and change buffer.
    fn event_sourced(&self) -> &EventSourced;

    /// Mutable access to the embedded version and change buffer.
    fn event_sourced_mut(&mut self) -> &mut EventSourced;

    /// Snapshot support; `None` unless the aggregate is `SnapshotCapable`.
    fn snapshot_codec() -> Option<SnapshotCodec<Self>> {
        None
    }

    /// Version of the last applied envelope; `0` if never persisted.
    fn version(&self) -> i64 {
        self.event_sourced().version()
    }

    /// Payloads produced since the last load or commit.
    fn pending_changes(&self) -> &[Arc<dyn EventPayload>] {
        self.event_sourced().pending()
    }

    /// Mutates state through the handler for `E`, then enqueues `event`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnregisteredEvent` if the aggregate has no
    /// handler for `E`, or `DomainError::HandlerFailure` if the handler
    /// rejects it. Nothing is enqueued on error.
    fn apply<E: DomainEvent>(&mut self, event: E) -> Result<(), DomainError> {
        let payload: Arc<dyn EventPayload> = Arc::new(event);
        if let Err(err) = Self::handlers().dispatch(self, payload.as_ref()) {
            return Err(match err {
                HandlerError::NotRegistered(event_type) => {
                    DomainError::UnregisteredEvent { event_type }
                }
                other => DomainError::HandlerFailure {
                    stream_id: self.stream_id(),
                    version: next_version(self),
                    event_type: E::EVENT_TYPE.to_owned(),
                    source: Box::new(other),
                },
            });
        }
        self.event_sourced_mut().pending.push(payload);
        Ok(())
    }
}

fn next_version<A: Aggregate>(aggregate: &A) -> i64 {
    let pending = i64::try_from(aggregate.pending_changes().len()).unwrap_or(i64::MAX);
    aggregate.version().saturating_add(pending).saturating_add(1)
}

/// Folds `events` into `aggregate` in order, returning how many were applied.
///
/// Envelopes with no registered handler are skipped, but still advance the
/// version so the next save appends after them. Pending changes are left
/// untouched.
///
/// # Errors
///
/// Returns the stream's own error, or `DomainError::LoadFailure` if a
/// handler fails; the aggregate must then be discarded.
pub async fn replay<A: Aggregate>(
    aggregate: &mut A,
    mut events: EventStream<'_>,
) -> Result<u64, DomainError> {
    let handlers = A::handlers();
    let mut applied = 0;
    while let Some(envelope) = events.next().await {
        let envelope = envelope?;
        if handlers.handles(&envelope.event_type) {
            handlers
                .dispatch(aggregate, envelope.payload.as_ref())
                .map_err(|err| DomainError::LoadFailure {
                    stream_id: envelope.stream_id.clone(),
                    version: envelope.version,
                    event_type: envelope.event_type.clone(),
                    source: Box::new(err),
                })?;
            applied += 1;
        } else {
            debug!(
                stream_id = %envelope.stream_id,
                version = envelope.version,
                event_type = %envelope.event_type,
                "skipping event with no aggregate handler"
            );
        }
        aggregate.event_sourced_mut().set_version(envelope.version);
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use futures::stream;

    use super::*;
    use crate::event::EventEnvelope;

    #[derive(Debug, Serialize, Deserialize)]
    struct Added {
        amount: i64,
    }

    impl DomainEvent for Added {
        const EVENT_TYPE: &'static str = "Added";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Reset;

    impl DomainEvent for Reset {
        const EVENT_TYPE: &'static str = "Reset";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Poisoned;

    impl DomainEvent for Poisoned {
        const EVENT_TYPE: &'static str = "Poisoned";
    }

    #[derive(Debug, Default)]
    struct Tally {
        base: EventSourced,
        total: i64,
    }

    impl Tally {
        fn on_added(&mut self, event: &Added) {
            self.total += event.amount;
        }
    }

    static HANDLERS: LazyLock<EventHandlers<Tally>> = LazyLock::new(|| {
        EventHandlers::new()
            .on(Tally::on_added)
            .try_on(|_: &mut Tally, _: &Poisoned| Err("poisoned".into()))
    });

    impl Aggregate for Tally {
        fn stream_id(&self) -> String {
            "tally:1".to_owned()
        }

        fn handlers() -> &'static EventHandlers<Self> {
            &HANDLERS
        }

        fn event_sourced(&self) -> &EventSourced {
            &self.base
        }

        fn event_sourced_mut(&mut self) -> &mut EventSourced {
            &mut self.base
        }
    }

    fn envelope(version: i64, payload: Arc<dyn EventPayload>) -> Result<EventEnvelope, DomainError> {
        Ok(EventEnvelope::new("tally:1", version, "tests", 0, payload, None))
    }

    #[test]
    fn test_apply_mutates_then_enqueues() {
        let mut tally = Tally::default();

        tally.apply(Added { amount: 3 }).unwrap();
        tally.apply(Added { amount: 4 }).unwrap();

        assert_eq!(tally.total, 7);
        assert_eq!(tally.pending_changes().len(), 2);
        assert_eq!(tally.version(), 0);
    }

    #[test]
    fn test_apply_unregistered_event_enqueues_nothing() {
        let mut tally = Tally::default();

        let err = tally.apply(Reset).unwrap_err();

        assert!(matches!(err, DomainError::UnregisteredEvent { ref event_type } if event_type == "Reset"));
        assert!(tally.pending_changes().is_empty());
    }

    #[test]
    fn test_apply_rejected_event_reports_next_version() {
        let mut tally = Tally::default();
        tally.apply(Added { amount: 1 }).unwrap();

        let err = tally.apply(Poisoned).unwrap_err();

        assert!(matches!(err, DomainError::HandlerFailure { version: 2, .. }));
        assert_eq!(tally.pending_changes().len(), 1);
    }

    #[tokio::test]
    async fn test_replay_skips_unregistered_but_advances_version() {
        // Arrange
        let mut tally = Tally::default();
        let events = stream::iter(vec![
            envelope(1, Arc::new(Added { amount: 5 })),
            envelope(2, Arc::new(Reset)),
            envelope(3, Arc::new(Added { amount: 2 })),
        ])
        .boxed();

        // Act
        let applied = replay(&mut tally, events).await.unwrap();

        // Assert
        assert_eq!(applied, 2);
        assert_eq!(tally.total, 7);
        assert_eq!(tally.version(), 3);
        assert!(tally.pending_changes().is_empty());
    }

    #[tokio::test]
    async fn test_replay_handler_failure_is_a_load_failure() {
        let mut tally = Tally::default();
        let events = stream::iter(vec![
            envelope(1, Arc::new(Added { amount: 5 })),
            envelope(2, Arc::new(Poisoned)),
        ])
        .boxed();

        let err = replay(&mut tally, events).await.unwrap_err();

        assert!(matches!(
            err,
            DomainError::LoadFailure { version: 2, ref event_type, .. } if event_type == "Poisoned"
        ));
    }

    #[test]
    fn test_event_sourced_serializes_only_version() {
        let mut base = EventSourced::default();
        base.commit(4);

        let json = serde_json::to_value(&base).unwrap();

        assert_eq!(json, serde_json::json!({ "version": 4 }));
    }
}
