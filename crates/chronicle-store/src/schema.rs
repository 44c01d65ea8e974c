//! Database schema for the `PostgreSQL` backends.
//!
//! Mirrors `migrations/` so a deployment can bootstrap without running the
//! migrator.

use sqlx::PgPool;

use chronicle_core::error::DomainError;

/// SQL to create the envelope table.
///
/// The primary key on `(stream_id, version)` is what turns a racing
/// append into a unique violation.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS event_envelopes (
    stream_id   TEXT   NOT NULL,
    version     BIGINT NOT NULL CHECK (version >= 1),
    id          TEXT   NOT NULL,
    event_type  TEXT   NOT NULL,
    domain      TEXT   NOT NULL,
    recorded_at BIGINT NOT NULL,
    payload     JSONB  NOT NULL,
    metadata    JSONB,
    PRIMARY KEY (stream_id, version)
);

CREATE INDEX IF NOT EXISTS idx_event_envelopes_domain_type
    ON event_envelopes (domain, event_type);
";

/// SQL to create the snapshot table.
pub const CREATE_SNAPSHOTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS aggregate_snapshots (
    stream_id TEXT        PRIMARY KEY,
    version   BIGINT      NOT NULL,
    state     JSONB       NOT NULL,
    saved_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
";

/// Creates both tables if they do not exist.
///
/// # Errors
///
/// Returns `DomainError::StoreFailure` if the statements fail.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), DomainError> {
    sqlx::raw_sql(CREATE_EVENTS_TABLE)
        .execute(pool)
        .await
        .map_err(DomainError::store_failure)?;
    sqlx::raw_sql(CREATE_SNAPSHOTS_TABLE)
        .execute(pool)
        .await
        .map_err(DomainError::store_failure)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_table_is_keyed_by_stream_and_version() {
        assert!(CREATE_EVENTS_TABLE.contains("PRIMARY KEY (stream_id, version)"));
    }

    #[test]
    fn test_snapshot_table_holds_one_row_per_stream() {
        assert!(CREATE_SNAPSHOTS_TABLE.contains("stream_id TEXT        PRIMARY KEY"));
    }
}
