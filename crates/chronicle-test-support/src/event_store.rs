//! Test event stores — `EventStore` doubles for unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use chronicle_core::error::DomainError;
use chronicle_core::event::{EventEnvelope, EventMetadata, EventPayload};
use chronicle_core::store::{EventStore, EventStream};

/// One recorded append.
#[derive(Debug, Clone)]
pub struct AppendCall {
    /// Target stream.
    pub stream_id: String,
    /// Version the writer expected to append after.
    pub expected_version: i64,
    /// Type names of the appended payloads, in order.
    pub event_types: Vec<&'static str>,
    /// Metadata passed with the append.
    pub metadata: Option<EventMetadata>,
}

/// An event store that records every append and serves a fixed history.
///
/// Appends always succeed and return `expected_version + events.len()`;
/// they are not added to the history.
///
/// # Panics
///
/// Accessors panic if the internal mutex is poisoned.
#[derive(Debug, Default)]
pub struct RecordingEventStore {
    history: Vec<EventEnvelope>,
    appends: Mutex<Vec<AppendCall>>,
}

impl RecordingEventStore {
    /// Creates a store that serves `history` from every load.
    #[must_use]
    pub fn new(history: Vec<EventEnvelope>) -> Self {
        Self {
            history,
            appends: Mutex::new(Vec::new()),
        }
    }

    /// Every append received so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn appends(&self) -> Vec<AppendCall> {
        self.appends.lock().unwrap().clone()
    }

    fn record(
        &self,
        stream_id: &str,
        events: &[Arc<dyn EventPayload>],
        expected_version: i64,
        metadata: Option<&EventMetadata>,
    ) -> i64 {
        self.appends.lock().unwrap().push(AppendCall {
            stream_id: stream_id.to_owned(),
            expected_version,
            event_types: events.iter().map(|e| e.event_type()).collect(),
            metadata: metadata.cloned(),
        });
        expected_version + i64::try_from(events.len()).unwrap()
    }
}

#[async_trait]
impl EventStore for RecordingEventStore {
    async fn append_one(
        &self,
        stream_id: &str,
        event: Arc<dyn EventPayload>,
        expected_version: i64,
        metadata: Option<&EventMetadata>,
        _cancel: &CancellationToken,
    ) -> Result<i64, DomainError> {
        Ok(self.record(stream_id, &[event], expected_version, metadata))
    }

    async fn append_many(
        &self,
        stream_id: &str,
        events: &[Arc<dyn EventPayload>],
        expected_version: i64,
        metadata: Option<&EventMetadata>,
        _cancel: &CancellationToken,
    ) -> Result<i64, DomainError> {
        Ok(self.record(stream_id, events, expected_version, metadata))
    }

    fn load_stream_range<'a>(
        &'a self,
        stream_id: &'a str,
        from_version: i64,
        to_version: Option<i64>,
        _cancel: &'a CancellationToken,
    ) -> EventStream<'a> {
        let upper = to_version.unwrap_or(i64::MAX);
        let selected: Vec<_> = self
            .history
            .iter()
            .filter(|e| e.stream_id == stream_id && e.version >= from_version && e.version <= upper)
            .cloned()
            .map(Ok)
            .collect();
        stream::iter(selected).boxed()
    }
}

/// An event store with no history that accepts every append. Useful for
/// "aggregate not found" scenarios and creation commands.
#[derive(Debug)]
pub struct EmptyEventStore;

#[async_trait]
impl EventStore for EmptyEventStore {
    async fn append_one(
        &self,
        _stream_id: &str,
        _event: Arc<dyn EventPayload>,
        expected_version: i64,
        _metadata: Option<&EventMetadata>,
        _cancel: &CancellationToken,
    ) -> Result<i64, DomainError> {
        Ok(expected_version + 1)
    }

    async fn append_many(
        &self,
        _stream_id: &str,
        events: &[Arc<dyn EventPayload>],
        expected_version: i64,
        _metadata: Option<&EventMetadata>,
        _cancel: &CancellationToken,
    ) -> Result<i64, DomainError> {
        Ok(expected_version + i64::try_from(events.len()).unwrap())
    }

    fn load_stream_range<'a>(
        &'a self,
        _stream_id: &'a str,
        _from_version: i64,
        _to_version: Option<i64>,
        _cancel: &'a CancellationToken,
    ) -> EventStream<'a> {
        stream::empty().boxed()
    }
}

/// An event store whose every operation fails with a backend error. Useful
/// for testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventStore;

#[async_trait]
impl EventStore for FailingEventStore {
    async fn append_one(
        &self,
        _stream_id: &str,
        _event: Arc<dyn EventPayload>,
        _expected_version: i64,
        _metadata: Option<&EventMetadata>,
        _cancel: &CancellationToken,
    ) -> Result<i64, DomainError> {
        Err(DomainError::store_failure("connection refused"))
    }

    async fn append_many(
        &self,
        _stream_id: &str,
        _events: &[Arc<dyn EventPayload>],
        _expected_version: i64,
        _metadata: Option<&EventMetadata>,
        _cancel: &CancellationToken,
    ) -> Result<i64, DomainError> {
        Err(DomainError::store_failure("connection refused"))
    }

    fn load_stream_range<'a>(
        &'a self,
        _stream_id: &'a str,
        _from_version: i64,
        _to_version: Option<i64>,
        _cancel: &'a CancellationToken,
    ) -> EventStream<'a> {
        stream::once(async { Err(DomainError::store_failure("connection refused")) }).boxed()
    }
}

/// An event store that serves a fixed history but rejects every append as
/// a concurrency conflict, as if another writer always got there first.
#[derive(Debug, Default)]
pub struct ConflictingEventStore {
    inner: RecordingEventStore,
}

impl ConflictingEventStore {
    /// Creates a store that serves `history` from every load.
    #[must_use]
    pub fn new(history: Vec<EventEnvelope>) -> Self {
        Self {
            inner: RecordingEventStore::new(history),
        }
    }
}

#[async_trait]
impl EventStore for ConflictingEventStore {
    async fn append_one(
        &self,
        stream_id: &str,
        _event: Arc<dyn EventPayload>,
        expected_version: i64,
        _metadata: Option<&EventMetadata>,
        _cancel: &CancellationToken,
    ) -> Result<i64, DomainError> {
        Err(DomainError::ConcurrencyConflict {
            stream_id: stream_id.to_owned(),
            expected_version,
        })
    }

    async fn append_many(
        &self,
        stream_id: &str,
        _events: &[Arc<dyn EventPayload>],
        expected_version: i64,
        _metadata: Option<&EventMetadata>,
        _cancel: &CancellationToken,
    ) -> Result<i64, DomainError> {
        Err(DomainError::ConcurrencyConflict {
            stream_id: stream_id.to_owned(),
            expected_version,
        })
    }

    fn load_stream_range<'a>(
        &'a self,
        stream_id: &'a str,
        from_version: i64,
        to_version: Option<i64>,
        cancel: &'a CancellationToken,
    ) -> EventStream<'a> {
        self.inner
            .load_stream_range(stream_id, from_version, to_version, cancel)
    }
}
