//! Aggregate repository: load/save orchestration, snapshot policy and the
//! optimistic-concurrency contract.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::aggregate::{self, Aggregate};
use crate::config::RepositoryConfig;
use crate::error::DomainError;
use crate::event::EventMetadata;
use crate::snapshot::{Snapshot, SnapshotCodec, SnapshotStore};
use crate::store::EventStore;

/// Decides whether a commit that reached `version` takes a snapshot.
///
/// `when` is the aggregate's own rule; it wins whenever it answers.
#[must_use]
pub fn should_snapshot(force: bool, when: Option<bool>, version: i64, threshold: i64) -> bool {
    force || when.unwrap_or(threshold > 0 && version % threshold == 0)
}

/// Loads and saves aggregates against an event store and, optionally, a
/// snapshot store.
///
/// Cheap to clone and safe to share across tasks. Conflicts are returned to
/// the caller; the repository never retries.
#[derive(Clone)]
pub struct AggregateRepository {
    event_store: Arc<dyn EventStore>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
    config: RepositoryConfig,
}

impl AggregateRepository {
    /// Creates a repository without snapshots and with default settings.
    #[must_use]
    pub fn new(event_store: Arc<dyn EventStore>) -> Self {
        Self {
            event_store,
            snapshot_store: None,
            config: RepositoryConfig::default(),
        }
    }

    /// Starts a builder.
    #[must_use]
    pub fn builder() -> AggregateRepositoryBuilder {
        AggregateRepositoryBuilder::default()
    }

    /// The underlying event store.
    #[must_use]
    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.event_store
    }

    /// The repository settings.
    #[must_use]
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Reconstructs the aggregate for `stream_id`, or `None` if the stream
    /// has no events.
    ///
    /// A usable snapshot short-circuits replay to the events after it. A
    /// snapshot that fails to load, belongs to another stream or no longer
    /// decodes is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a blank `stream_id`,
    /// `DomainError::Cancelled` if `cancel` has already fired, and any
    /// store, codec or `LoadFailure` error from the replay.
    #[instrument(skip(self, cancel), fields(aggregate = std::any::type_name::<A>()))]
    pub async fn load<A: Aggregate>(
        &self,
        stream_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<A>, DomainError> {
        if stream_id.trim().is_empty() {
            return Err(DomainError::Validation(
                "stream id must not be blank".to_owned(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled);
        }

        let (mut aggregate, from_version) = match self.restore_snapshot::<A>(stream_id, cancel).await? {
            Some((aggregate, version)) => (aggregate, version + 1),
            None => (A::default(), 1),
        };

        let events = self
            .event_store
            .load_stream_range(stream_id, from_version, None, cancel);
        let applied = aggregate::replay(&mut aggregate, events).await?;

        debug!(
            stream_id,
            from_version,
            applied,
            version = aggregate.version(),
            "aggregate loaded"
        );

        if aggregate.version() == 0 {
            return Ok(None);
        }
        Ok(Some(aggregate))
    }

    /// Commits pending changes, then applies the snapshot policy.
    ///
    /// Without metadata a fresh correlation ID is attached. Empty pending
    /// changes make this a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if the stream advanced
    /// since the aggregate was loaded; the aggregate is then unchanged and
    /// must be reloaded. Snapshot failures are logged, never returned.
    pub async fn save<A: Aggregate>(
        &self,
        aggregate: &mut A,
        metadata: Option<EventMetadata>,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        self.commit(aggregate, metadata, false, cancel).await
    }

    /// Like [`save`](Self::save), but always snapshots after the commit.
    ///
    /// # Errors
    ///
    /// See [`save`](Self::save).
    pub async fn save_and_force_snapshot<A: Aggregate>(
        &self,
        aggregate: &mut A,
        metadata: Option<EventMetadata>,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        self.commit(aggregate, metadata, true, cancel).await
    }

    #[instrument(
        skip(self, aggregate, metadata, cancel),
        fields(stream_id = %aggregate.stream_id(), expected_version = aggregate.version())
    )]
    async fn commit<A: Aggregate>(
        &self,
        aggregate: &mut A,
        metadata: Option<EventMetadata>,
        force_snapshot: bool,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        if aggregate.pending_changes().is_empty() {
            return Ok(());
        }

        let stream_id = aggregate.stream_id();
        let expected_version = aggregate.version();
        let metadata = metadata.unwrap_or_else(EventMetadata::correlated);

        let new_version = self
            .event_store
            .append_many(
                &stream_id,
                aggregate.pending_changes(),
                expected_version,
                Some(&metadata),
                cancel,
            )
            .await?;
        aggregate.event_sourced_mut().commit(new_version);

        debug!(stream_id, new_version, "aggregate committed");

        self.maybe_snapshot(aggregate, force_snapshot, cancel).await;
        Ok(())
    }

    async fn maybe_snapshot<A: Aggregate>(
        &self,
        aggregate: &A,
        force: bool,
        cancel: &CancellationToken,
    ) {
        let (Some(store), Some(codec)) = (&self.snapshot_store, A::snapshot_codec()) else {
            return;
        };
        let version = aggregate.version();
        if !should_snapshot(
            force,
            codec.when(aggregate),
            version,
            self.config.default_snapshot_threshold,
        ) {
            return;
        }

        let stream_id = aggregate.stream_id();
        let state = match codec.encode(aggregate) {
            Ok(state) => state,
            Err(err) => {
                warn!(stream_id, version, error = %err, "failed to encode snapshot");
                return;
            }
        };
        let snapshot = Snapshot {
            stream_id: stream_id.clone(),
            version,
            state,
        };
        match store.save_snapshot(snapshot, cancel).await {
            Ok(()) => debug!(stream_id, version, "snapshot saved"),
            Err(err) => warn!(stream_id, version, error = %err, "failed to save snapshot"),
        }
    }

    async fn restore_snapshot<A: Aggregate>(
        &self,
        stream_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<(A, i64)>, DomainError> {
        let (Some(store), Some(codec)) = (&self.snapshot_store, A::snapshot_codec()) else {
            return Ok(None);
        };

        let snapshot = match store.load_snapshot(stream_id, cancel).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(None),
            Err(DomainError::Cancelled) => return Err(DomainError::Cancelled),
            Err(err) => {
                warn!(stream_id, error = %err, "snapshot unavailable; replaying from the start");
                return Ok(None);
            }
        };

        Ok(decode_snapshot(&codec, stream_id, snapshot).map(|aggregate| {
            let version = aggregate.version();
            (aggregate, version)
        }))
    }
}

fn decode_snapshot<A: Aggregate>(
    codec: &SnapshotCodec<A>,
    stream_id: &str,
    snapshot: Snapshot,
) -> Option<A> {
    if snapshot.stream_id != stream_id {
        warn!(
            stream_id,
            snapshot_stream_id = %snapshot.stream_id,
            "ignoring snapshot stored for another stream"
        );
        return None;
    }
    if snapshot.version <= 0 {
        warn!(stream_id, version = snapshot.version, "ignoring snapshot with no version");
        return None;
    }

    let version = snapshot.version;
    match codec.decode(snapshot.state) {
        Ok(mut aggregate) => {
            aggregate.event_sourced_mut().commit(version);
            Some(aggregate)
        }
        Err(err) => {
            warn!(stream_id, version, error = %err, "ignoring snapshot that no longer decodes");
            None
        }
    }
}

impl fmt::Debug for AggregateRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRepository")
            .field("snapshots", &self.snapshot_store.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`AggregateRepository`].
#[derive(Default)]
pub struct AggregateRepositoryBuilder {
    event_store: Option<Arc<dyn EventStore>>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
    config: RepositoryConfig,
}

impl AggregateRepositoryBuilder {
    /// Sets the event store. Required.
    #[must_use]
    pub fn use_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    /// Enables snapshots backed by `store`.
    #[must_use]
    pub fn use_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    /// Replaces the repository settings.
    #[must_use]
    pub fn with_config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the repository.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if no event store was set or the
    /// settings are invalid.
    pub fn build(self) -> Result<AggregateRepository, DomainError> {
        let event_store = self.event_store.ok_or_else(|| {
            DomainError::Validation("aggregate repository requires an event store".to_owned())
        })?;
        self.config.validate()?;
        Ok(AggregateRepository {
            event_store,
            snapshot_store: self.snapshot_store,
            config: self.config,
        })
    }
}

impl fmt::Debug for AggregateRepositoryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRepositoryBuilder")
            .field("event_store", &self.event_store.is_some())
            .field("snapshot_store", &self.snapshot_store.is_some())
            .field("config", &self.config)
            .finish()
    }
}
