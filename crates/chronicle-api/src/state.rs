//! Shared application state.

use std::sync::Arc;

use chronicle_core::clock::Clock;
use chronicle_core::codec::EnvelopeCodec;
use chronicle_core::config::EventStoreConfig;
use chronicle_core::error::DomainError;
use chronicle_core::feed::PublishingEventStore;
use chronicle_core::registry::EventRegistry;
use chronicle_core::repository::AggregateRepository;
use chronicle_core::store::EventStore;
use chronicle_store::{MemoryEventStore, MemorySnapshotStore, PgEventStore, PgSnapshotStore};
use chronicle_todo::domain::events::{TODO_DOMAIN, register_events};
use chronicle_todo::projection::{MissingRowPolicy, TodoReadModel, todo_projector};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AppConfig;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Loads and saves to-do aggregates.
    pub repository: AggregateRepository,
    /// Renders stored envelopes in wire form.
    pub codec: Arc<EnvelopeCodec>,
    /// Clock for deterministic timestamps.
    pub clock: Arc<dyn Clock>,
    /// Root token; request tokens are its children.
    pub shutdown: CancellationToken,
    /// List view kept current by the read-model feeder.
    pub read_model: Arc<TodoReadModel>,
    /// Change feed of the backing store; absent for stub stores in tests.
    pub feed: Option<Arc<PublishingEventStore>>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        repository: AggregateRepository,
        codec: Arc<EnvelopeCodec>,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            repository,
            codec,
            clock,
            shutdown,
            read_model: Arc::new(TodoReadModel::new()),
            feed: None,
        }
    }

    /// Attaches the change feed the read-model feeder follows.
    #[must_use]
    pub fn with_feed(mut self, feed: Arc<PublishingEventStore>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Spawns the task that rebuilds the read model from the full log and
    /// then applies live envelopes until `shutdown` fires.
    ///
    /// Returns `None` when no feed is attached.
    #[must_use]
    pub fn spawn_read_model_feeder(&self) -> Option<JoinHandle<()>> {
        let feed = Arc::clone(self.feed.as_ref()?);
        let projector = todo_projector(Arc::clone(&self.read_model), MissingRowPolicy::default());
        let live = feed.subscribe();
        let cancel = self.shutdown.clone();
        Some(tokio::spawn(async move {
            match projector.follow(feed.as_ref(), live, &cancel).await {
                Ok(()) => info!("read model feeder stopped"),
                Err(err) => error!(error = %err, "read model feeder failed"),
            }
        }))
    }

    /// State backed by the in-memory event and snapshot stores.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the repository settings are
    /// invalid.
    pub fn in_memory(
        config: &AppConfig,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Result<Self, DomainError> {
        let feed = Arc::new(PublishingEventStore::new(Arc::new(MemoryEventStore::with_clock(
            TODO_DOMAIN,
            clock.clone(),
        ))));
        let repository = AggregateRepository::builder()
            .use_event_store(Arc::clone(&feed) as Arc<dyn EventStore>)
            .use_snapshot_store(Arc::new(MemorySnapshotStore::new()))
            .with_config(config.repository_config())
            .build()?;
        Ok(
            Self::new(repository, Arc::new(EnvelopeCodec::new(todo_registry())), clock, shutdown)
                .with_feed(feed),
        )
    }

    /// State backed by the `PostgreSQL` event and snapshot stores.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the repository settings are
    /// invalid.
    pub fn postgres(
        pool: PgPool,
        config: &AppConfig,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Result<Self, DomainError> {
        let registry = todo_registry();
        let events = PgEventStore::new(pool.clone(), registry.clone(), EventStoreConfig::new(TODO_DOMAIN))
            .with_clock(clock.clone());
        let feed = Arc::new(PublishingEventStore::new(Arc::new(events)));
        let repository = AggregateRepository::builder()
            .use_event_store(Arc::clone(&feed) as Arc<dyn EventStore>)
            .use_snapshot_store(Arc::new(PgSnapshotStore::new(pool)))
            .with_config(config.repository_config())
            .build()?;
        Ok(Self::new(repository, Arc::new(EnvelopeCodec::new(registry)), clock, shutdown).with_feed(feed))
    }

    /// A fresh cancellation token for one request.
    #[must_use]
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}

/// Registry holding every to-do event.
#[must_use]
pub fn todo_registry() -> Arc<EventRegistry> {
    let mut registry = EventRegistry::new();
    register_events(&mut registry);
    Arc::new(registry)
}
