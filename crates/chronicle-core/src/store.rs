//! The `EventStore` port.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::DomainError;
use crate::event::{EventEnvelope, EventMetadata, EventPayload};

/// Ordered, lazy sequence of envelopes read from a stream.
pub type EventStream<'a> = BoxStream<'a, Result<EventEnvelope, DomainError>>;

/// Append-only, per-stream event log with optimistic concurrency.
///
/// Implementations must be safe for concurrent use across streams and must
/// make each append atomic with respect to its stream.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persists one event at `expected_version + 1` and returns that version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if the stream has already
    /// advanced past `expected_version`, `DomainError::Cancelled` if the
    /// token fired first, and `DomainError::StoreFailure` otherwise.
    async fn append_one(
        &self,
        stream_id: &str,
        event: Arc<dyn EventPayload>,
        expected_version: i64,
        metadata: Option<&EventMetadata>,
        cancel: &CancellationToken,
    ) -> Result<i64, DomainError>;

    /// Persists `events` at consecutive versions after `expected_version`,
    /// all or nothing, and returns the last version written.
    ///
    /// An empty slice writes nothing and returns `expected_version`.
    ///
    /// # Errors
    ///
    /// Same as [`append_one`](Self::append_one).
    async fn append_many(
        &self,
        stream_id: &str,
        events: &[Arc<dyn EventPayload>],
        expected_version: i64,
        metadata: Option<&EventMetadata>,
        cancel: &CancellationToken,
    ) -> Result<i64, DomainError>;

    /// Reads envelopes with `from_version <= version <= to_version` in
    /// ascending order. `None` reads to the current tail.
    fn load_stream_range<'a>(
        &'a self,
        stream_id: &'a str,
        from_version: i64,
        to_version: Option<i64>,
        cancel: &'a CancellationToken,
    ) -> EventStream<'a>;

    /// Reads the whole stream from version 1.
    fn load_stream<'a>(&'a self, stream_id: &'a str, cancel: &'a CancellationToken) -> EventStream<'a> {
        self.load_stream_range(stream_id, 1, None, cancel)
    }
}

/// Read access to every envelope in a store, across streams.
///
/// Envelopes of one stream arrive in version order. No order is promised
/// across streams.
pub trait EventLog: Send + Sync {
    /// Streams the whole log from the start.
    fn load_all<'a>(&'a self, cancel: &'a CancellationToken) -> EventStream<'a>;
}

/// Ends `inner` once `cancel` fires, yielding a single `Cancelled` error.
///
/// Dropping the inner stream releases whatever backend cursor it holds.
pub fn cancellable<'a>(inner: EventStream<'a>, cancel: CancellationToken) -> EventStream<'a> {
    stream::unfold(Some(inner), move |state| {
        let cancel = cancel.clone();
        async move {
            let mut inner = state?;
            tokio::select! {
                biased;
                () = cancel.cancelled() => Some((Err(DomainError::Cancelled), None)),
                next = inner.next() => next.map(|item| (item, Some(inner))),
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(n: usize) -> EventStream<'static> {
        stream::iter((0..n).map(|_| Err(DomainError::Validation("item".to_owned())))).boxed()
    }

    #[tokio::test]
    async fn test_cancellable_passes_items_through_until_end() {
        let cancel = CancellationToken::new();

        let items: Vec<_> = cancellable(numbers(3), cancel).collect().await;

        assert_eq!(items.len(), 3);
    }

    #[tokio::test]
    async fn test_cancellable_yields_one_cancelled_error_then_ends() {
        // Arrange
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Act
        let items: Vec<_> = cancellable(numbers(3), cancel).collect().await;

        // Assert
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(DomainError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellable_stops_a_pending_stream() {
        let cancel = CancellationToken::new();
        let pending: EventStream<'static> = stream::pending().boxed();
        let stream = cancellable(pending, cancel.clone());

        cancel.cancel();
        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 1);
    }
}
