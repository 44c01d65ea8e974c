//! `PostgreSQL` implementation of the `SnapshotStore` port.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use tokio_util::sync::CancellationToken;

use chronicle_core::error::DomainError;
use chronicle_core::snapshot::{Snapshot, SnapshotStore};

const UPSERT_SNAPSHOT: &str = r"
INSERT INTO aggregate_snapshots (stream_id, version, state, saved_at)
VALUES ($1, $2, $3, NOW())
ON CONFLICT (stream_id) DO UPDATE
SET version = EXCLUDED.version,
    state = EXCLUDED.state,
    saved_at = EXCLUDED.saved_at
";

const SELECT_SNAPSHOT: &str =
    "SELECT stream_id, version, state FROM aggregate_snapshots WHERE stream_id = $1";

/// Snapshot store keeping one row per stream in `aggregate_snapshots`.
#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    /// Creates a new `PgSnapshotStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn save_snapshot(
        &self,
        snapshot: Snapshot,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        let query = sqlx::query(UPSERT_SNAPSHOT)
            .bind(&snapshot.stream_id)
            .bind(snapshot.version)
            .bind(Json(&snapshot.state))
            .execute(&self.pool);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(DomainError::Cancelled),
            result = query => result.map(|_| ()).map_err(DomainError::snapshot_failure),
        }
    }

    async fn load_snapshot(
        &self,
        stream_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Snapshot>, DomainError> {
        let query = sqlx::query_as::<_, (String, i64, Json<serde_json::Value>)>(SELECT_SNAPSHOT)
            .bind(stream_id)
            .fetch_optional(&self.pool);
        let row = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DomainError::Cancelled),
            row = query => row.map_err(DomainError::snapshot_failure)?,
        };
        Ok(row.map(|(stream_id, version, state)| Snapshot {
            stream_id,
            version,
            state: state.0,
        }))
    }
}
