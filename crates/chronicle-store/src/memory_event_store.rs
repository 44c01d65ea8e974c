//! In-memory implementation of the `EventStore` port.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use chronicle_core::clock::{Clock, SystemClock};
use chronicle_core::error::DomainError;
use chronicle_core::event::{EventEnvelope, EventMetadata, EventPayload};
use chronicle_core::store::{EventLog, EventStore, EventStream, cancellable};

#[derive(Default)]
struct Inner {
    streams: HashMap<String, Vec<EventEnvelope>>,
    log: Vec<EventEnvelope>,
}

/// Thread-safe event store held in process memory.
///
/// Enforces optimistic concurrency per stream and keeps a global append
/// log in commit order, which doubles as a change feed for projectors.
/// Clones share the same data.
#[derive(Clone)]
pub struct MemoryEventStore {
    inner: Arc<RwLock<Inner>>,
    domain: String,
    clock: Arc<dyn Clock>,
}

impl MemoryEventStore {
    /// Creates an empty store stamping `domain` on every envelope.
    #[must_use]
    pub fn new(domain: impl Into<String>) -> Self {
        Self::with_clock(domain, Arc::new(SystemClock))
    }

    /// Creates an empty store with an explicit clock for timestamps.
    #[must_use]
    pub fn with_clock(domain: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            domain: domain.into(),
            clock,
        }
    }

    /// Every envelope appended so far, across streams, in commit order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StoreFailure` if the store lock is poisoned.
    pub fn all_events(&self) -> Result<Vec<EventEnvelope>, DomainError> {
        Ok(self.read()?.log.clone())
    }

    /// Streams the global append log from the start.
    pub fn load_all<'a>(&'a self, cancel: &'a CancellationToken) -> EventStream<'a> {
        let events = self.all_events();
        let inner = match events {
            Ok(events) => stream::iter(events.into_iter().map(Ok)).boxed(),
            Err(err) => stream::once(async move { Err(err) }).boxed(),
        };
        cancellable(inner, cancel.clone())
    }

    /// Current version of `stream_id`; `0` if it has no events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StoreFailure` if the store lock is poisoned.
    pub fn stream_version(&self, stream_id: &str) -> Result<i64, DomainError> {
        let inner = self.read()?;
        Ok(inner.streams.get(stream_id).map_or(0, |s| len_as_version(s.len())))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, DomainError> {
        self.inner
            .read()
            .map_err(|_| DomainError::store_failure("in-memory event store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, DomainError> {
        self.inner
            .write()
            .map_err(|_| DomainError::store_failure("in-memory event store lock poisoned"))
    }

    fn commit(
        &self,
        stream_id: &str,
        events: &[Arc<dyn EventPayload>],
        expected_version: i64,
        metadata: Option<&EventMetadata>,
    ) -> Result<i64, DomainError> {
        if expected_version < 0 {
            return Err(DomainError::Validation(format!(
                "expected version must not be negative, got {expected_version}"
            )));
        }

        let timestamp = self.clock.unix_seconds();
        let mut inner = self.write()?;
        let current = inner.streams.get(stream_id).map_or(0, |s| len_as_version(s.len()));
        if current != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                stream_id: stream_id.to_owned(),
                expected_version,
            });
        }

        let staged: Vec<EventEnvelope> = (expected_version + 1..)
            .zip(events)
            .map(|(version, payload)| {
                EventEnvelope::new(
                    stream_id,
                    version,
                    self.domain.as_str(),
                    timestamp,
                    Arc::clone(payload),
                    metadata.cloned(),
                )
            })
            .collect();
        let new_version = expected_version + len_as_version(staged.len());

        inner.log.extend(staged.iter().cloned());
        inner
            .streams
            .entry(stream_id.to_owned())
            .or_default()
            .extend(staged);
        drop(inner);

        debug!(stream_id, new_version, "events appended");
        Ok(new_version)
    }
}

fn len_as_version(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

#[async_trait]
impl EventStore for MemoryEventStore {
    #[instrument(skip(self, event, metadata, cancel), fields(event_type = event.event_type()))]
    async fn append_one(
        &self,
        stream_id: &str,
        event: Arc<dyn EventPayload>,
        expected_version: i64,
        metadata: Option<&EventMetadata>,
        cancel: &CancellationToken,
    ) -> Result<i64, DomainError> {
        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        self.commit(stream_id, &[event], expected_version, metadata)
    }

    #[instrument(skip(self, events, metadata, cancel), fields(event_count = events.len()))]
    async fn append_many(
        &self,
        stream_id: &str,
        events: &[Arc<dyn EventPayload>],
        expected_version: i64,
        metadata: Option<&EventMetadata>,
        cancel: &CancellationToken,
    ) -> Result<i64, DomainError> {
        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        match events {
            [] => Ok(expected_version),
            [single] => {
                self.append_one(stream_id, Arc::clone(single), expected_version, metadata, cancel)
                    .await
            }
            _ => self.commit(stream_id, events, expected_version, metadata),
        }
    }

    fn load_stream_range<'a>(
        &'a self,
        stream_id: &'a str,
        from_version: i64,
        to_version: Option<i64>,
        cancel: &'a CancellationToken,
    ) -> EventStream<'a> {
        let upper = to_version.unwrap_or(i64::MAX);
        let selected = self.read().map(|inner| {
            inner
                .streams
                .get(stream_id)
                .map(|events| {
                    events
                        .iter()
                        .filter(|e| e.version >= from_version && e.version <= upper)
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        });
        let inner = match selected {
            Ok(events) => stream::iter(events.into_iter().map(Ok)).boxed(),
            Err(err) => stream::once(async move { Err(err) }).boxed(),
        };
        cancellable(inner, cancel.clone())
    }
}

impl EventLog for MemoryEventStore {
    fn load_all<'a>(&'a self, cancel: &'a CancellationToken) -> EventStream<'a> {
        MemoryEventStore::load_all(self, cancel)
    }
}

impl fmt::Debug for MemoryEventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEventStore")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use chronicle_core::event::DomainEvent;

    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct Noted {
        text: String,
    }

    impl DomainEvent for Noted {
        const EVENT_TYPE: &'static str = "Noted";
    }

    fn note(text: &str) -> Arc<dyn EventPayload> {
        Arc::new(Noted {
            text: text.to_owned(),
        })
    }

    #[tokio::test]
    async fn test_empty_append_writes_nothing() {
        let store = MemoryEventStore::new("notes");
        let cancel = CancellationToken::new();

        let version = store.append_many("note:1", &[], 0, None, &cancel).await.unwrap();

        assert_eq!(version, 0);
        assert!(store.all_events().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_negative_expected_version_is_rejected() {
        let store = MemoryEventStore::new("notes");

        let err = store
            .append_one("note:1", note("a"), -1, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn test_gap_in_expected_version_is_a_conflict() {
        let store = MemoryEventStore::new("notes");

        let err = store
            .append_one("note:1", note("a"), 3, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(store.stream_version("note:1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_range_bounds_are_inclusive() {
        // Arrange
        let store = MemoryEventStore::new("notes");
        let cancel = CancellationToken::new();
        store
            .append_many("note:1", &[note("a"), note("b"), note("c"), note("d")], 0, None, &cancel)
            .await
            .unwrap();

        // Act
        let versions: Vec<i64> = store
            .load_stream_range("note:1", 2, Some(3), &cancel)
            .map(|e| e.unwrap().version)
            .collect()
            .await;

        // Assert
        assert_eq!(versions, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_global_log_interleaves_streams_in_commit_order() {
        let store = MemoryEventStore::new("notes");
        let cancel = CancellationToken::new();
        store.append_one("note:1", note("a"), 0, None, &cancel).await.unwrap();
        store.append_one("note:2", note("b"), 0, None, &cancel).await.unwrap();
        store.append_one("note:1", note("c"), 1, None, &cancel).await.unwrap();

        let ids: Vec<String> = store.all_events().unwrap().iter().map(EventEnvelope::id).collect();

        assert_eq!(ids, vec!["note:1:1", "note:2:1", "note:1:2"]);
    }
}
