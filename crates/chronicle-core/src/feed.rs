//! Live change feed: an `EventStore` decorator that publishes every
//! committed envelope to in-process subscribers.
//!
//! Delivery is at least once. A subscriber that falls behind the channel
//! capacity sees `RecvError::Lagged` and is expected to catch up from the
//! [`EventLog`] again, so projector handlers must tolerate the overlap.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::error::DomainError;
use crate::event::{EventEnvelope, EventMetadata, EventPayload};
use crate::store::{EventLog, EventStore, EventStream};

/// Envelopes a slow subscriber may fall behind before it lags.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Wraps an event store and broadcasts each successful append.
///
/// Appended envelopes are read back from the inner store, so subscribers
/// see the same `timestamp` and `metadata` that was persisted.
pub struct PublishingEventStore {
    events: Arc<dyn EventStore>,
    log: Arc<dyn EventLog>,
    sender: broadcast::Sender<EventEnvelope>,
}

impl PublishingEventStore {
    /// Wraps `inner` with the default feed capacity.
    #[must_use]
    pub fn new<S>(inner: Arc<S>) -> Self
    where
        S: EventStore + EventLog + 'static,
    {
        Self::with_capacity(inner, DEFAULT_FEED_CAPACITY)
    }

    /// Wraps `inner`; `capacity` bounds how far a subscriber may lag.
    #[must_use]
    pub fn with_capacity<S>(inner: Arc<S>, capacity: usize) -> Self
    where
        S: EventStore + EventLog + 'static,
    {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            events: Arc::clone(&inner) as Arc<dyn EventStore>,
            log: inner,
            sender,
        }
    }

    /// Subscribes to envelopes committed from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    async fn publish(&self, stream_id: &str, after: i64, through: i64) {
        if through <= after || self.sender.receiver_count() == 0 {
            return;
        }
        // The append is durable; the read-back is not tied to the caller's token.
        let cancel = CancellationToken::new();
        let committed: Result<Vec<EventEnvelope>, DomainError> = self
            .events
            .load_stream_range(stream_id, after + 1, Some(through), &cancel)
            .try_collect()
            .await;
        match committed {
            Ok(envelopes) => {
                for envelope in envelopes {
                    // Only fails when every subscriber has gone away.
                    let _ = self.sender.send(envelope);
                }
            }
            Err(err) => {
                warn!(stream_id, after, through, error = %err, "failed to publish appended events");
            }
        }
    }
}

#[async_trait]
impl EventStore for PublishingEventStore {
    #[instrument(skip(self, event, metadata, cancel))]
    async fn append_one(
        &self,
        stream_id: &str,
        event: Arc<dyn EventPayload>,
        expected_version: i64,
        metadata: Option<&EventMetadata>,
        cancel: &CancellationToken,
    ) -> Result<i64, DomainError> {
        let new_version = self
            .events
            .append_one(stream_id, event, expected_version, metadata, cancel)
            .await?;
        self.publish(stream_id, expected_version, new_version).await;
        Ok(new_version)
    }

    #[instrument(skip(self, events, metadata, cancel))]
    async fn append_many(
        &self,
        stream_id: &str,
        events: &[Arc<dyn EventPayload>],
        expected_version: i64,
        metadata: Option<&EventMetadata>,
        cancel: &CancellationToken,
    ) -> Result<i64, DomainError> {
        let new_version = self
            .events
            .append_many(stream_id, events, expected_version, metadata, cancel)
            .await?;
        self.publish(stream_id, expected_version, new_version).await;
        Ok(new_version)
    }

    fn load_stream_range<'a>(
        &'a self,
        stream_id: &'a str,
        from_version: i64,
        to_version: Option<i64>,
        cancel: &'a CancellationToken,
    ) -> EventStream<'a> {
        self.events
            .load_stream_range(stream_id, from_version, to_version, cancel)
    }
}

impl EventLog for PublishingEventStore {
    fn load_all<'a>(&'a self, cancel: &'a CancellationToken) -> EventStream<'a> {
        self.log.load_all(cancel)
    }
}

impl fmt::Debug for PublishingEventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishingEventStore")
            .field("subscribers", &self.sender.receiver_count())
            .finish_non_exhaustive()
    }
}
