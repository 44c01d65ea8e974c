//! `PostgreSQL` implementation of the `EventStore` port.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use chronicle_core::clock::{Clock, SystemClock};
use chronicle_core::codec::{CodecError, id_matches};
use chronicle_core::config::EventStoreConfig;
use chronicle_core::error::DomainError;
use chronicle_core::event::{EventEnvelope, EventMetadata, EventPayload, envelope_id};
use chronicle_core::registry::EventRegistry;
use chronicle_core::store::{EventLog, EventStore, EventStream, cancellable};

const SELECT_RANGE: &str = r"
SELECT stream_id, version, id, event_type, domain, recorded_at, payload, metadata
FROM event_envelopes
WHERE stream_id = $1
  AND version >= $2
  AND ($3::BIGINT IS NULL OR version <= $3)
ORDER BY version ASC
";

const SELECT_ALL: &str = r"
SELECT stream_id, version, id, event_type, domain, recorded_at, payload, metadata
FROM event_envelopes
ORDER BY stream_id ASC, version ASC
";

const SELECT_CURRENT_VERSION: &str =
    "SELECT MAX(version) FROM event_envelopes WHERE stream_id = $1";

const INSERT_PREFIX: &str = "INSERT INTO event_envelopes \
     (stream_id, version, id, event_type, domain, recorded_at, payload, metadata) ";

#[derive(Debug, FromRow)]
struct EnvelopeRow {
    stream_id: String,
    version: i64,
    id: String,
    event_type: String,
    domain: String,
    recorded_at: i64,
    payload: Json<serde_json::Value>,
    metadata: Option<Json<EventMetadata>>,
}

impl EnvelopeRow {
    fn into_envelope(self, registry: &EventRegistry) -> Result<EventEnvelope, DomainError> {
        if !id_matches(&self.id, &self.stream_id, self.version) {
            warn!(
                id = %self.id,
                stream_id = %self.stream_id,
                version = self.version,
                "stored envelope id does not match its coordinates"
            );
        }
        let payload = registry.decode(&self.domain, &self.event_type, self.payload.0)?;
        Ok(EventEnvelope {
            stream_id: self.stream_id,
            version: self.version,
            event_type: self.event_type,
            domain: self.domain,
            timestamp: self.recorded_at,
            payload,
            metadata: self.metadata.map(|m| m.0),
        })
    }
}

struct PreparedRow {
    version: i64,
    id: String,
    event_type: &'static str,
    payload: serde_json::Value,
}

/// Event store persisting envelopes to the `event_envelopes` table.
///
/// All rows of one append share a transaction, even when they are written
/// in several `batch_size` chunks. Racing writers are caught by the
/// `(stream_id, version)` primary key.
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
    registry: Arc<EventRegistry>,
    config: EventStoreConfig,
    clock: Arc<dyn Clock>,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool, registry: Arc<EventRegistry>, config: EventStoreConfig) -> Self {
        Self {
            pool,
            registry,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used for envelope timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn prepare(
        stream_id: &str,
        events: &[Arc<dyn EventPayload>],
        expected_version: i64,
    ) -> Result<Vec<PreparedRow>, DomainError> {
        (expected_version + 1..)
            .zip(events)
            .map(|(version, event)| -> Result<PreparedRow, DomainError> {
                let payload = event.to_json().map_err(|source| CodecError::Payload {
                    event_type: event.event_type().to_owned(),
                    source,
                })?;
                Ok(PreparedRow {
                    version,
                    id: envelope_id(stream_id, version),
                    event_type: event.event_type(),
                    payload,
                })
            })
            .collect()
    }

    async fn write(
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
        let rows = Self::prepare(stream_id, events, expected_version)?;
        let recorded_at = self.clock.unix_seconds();
        let conflict = |err: sqlx::Error| translate(err, stream_id, expected_version);

        let mut tx = self.pool.begin().await.map_err(DomainError::store_failure)?;

        let current: Option<i64> = sqlx::query_scalar(SELECT_CURRENT_VERSION)
            .bind(stream_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(DomainError::store_failure)?;
        if current.unwrap_or(0) != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                stream_id: stream_id.to_owned(),
                expected_version,
            });
        }

        for chunk in rows.chunks(self.config.batch_size.max(1)) {
            let mut qb = QueryBuilder::<Postgres>::new(INSERT_PREFIX);
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(stream_id)
                    .push_bind(row.version)
                    .push_bind(row.id.as_str())
                    .push_bind(row.event_type)
                    .push_bind(self.config.domain.as_str())
                    .push_bind(recorded_at)
                    .push_bind(Json(&row.payload))
                    .push_bind(metadata.map(Json));
            });
            qb.build().execute(&mut *tx).await.map_err(conflict)?;
        }

        tx.commit().await.map_err(conflict)?;

        let new_version = rows.last().map_or(expected_version, |row| row.version);
        debug!(stream_id, new_version, "events appended");
        Ok(new_version)
    }
}

fn translate(err: sqlx::Error, stream_id: &str, expected_version: i64) -> DomainError {
    if let sqlx::Error::Database(db) = &err
        && db.is_unique_violation()
    {
        return DomainError::ConcurrencyConflict {
            stream_id: stream_id.to_owned(),
            expected_version,
        };
    }
    DomainError::store_failure(err)
}

#[async_trait]
impl EventStore for PgEventStore {
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
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(DomainError::Cancelled),
            result = self.write(stream_id, std::slice::from_ref(&event), expected_version, metadata) => result,
        }
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
            _ => tokio::select! {
                biased;
                () = cancel.cancelled() => Err(DomainError::Cancelled),
                result = self.write(stream_id, events, expected_version, metadata) => result,
            },
        }
    }

    fn load_stream_range<'a>(
        &'a self,
        stream_id: &'a str,
        from_version: i64,
        to_version: Option<i64>,
        cancel: &'a CancellationToken,
    ) -> EventStream<'a> {
        let registry = Arc::clone(&self.registry);
        let rows = sqlx::query_as::<_, EnvelopeRow>(SELECT_RANGE)
            .bind(stream_id)
            .bind(from_version)
            .bind(to_version)
            .fetch(&self.pool)
            .map(move |row| {
                row.map_err(DomainError::store_failure)?
                    .into_envelope(&registry)
            })
            .boxed();
        cancellable(rows, cancel.clone())
    }
}

impl EventLog for PgEventStore {
    fn load_all<'a>(&'a self, cancel: &'a CancellationToken) -> EventStream<'a> {
        let registry = Arc::clone(&self.registry);
        let rows = sqlx::query_as::<_, EnvelopeRow>(SELECT_ALL)
            .fetch(&self.pool)
            .map(move |row| {
                row.map_err(DomainError::store_failure)?
                    .into_envelope(&registry)
            })
            .boxed();
        cancellable(rows, cancel.clone())
    }
}

impl fmt::Debug for PgEventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgEventStore")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
