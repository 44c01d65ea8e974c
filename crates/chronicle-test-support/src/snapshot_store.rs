//! Test snapshot stores.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use chronicle_core::error::DomainError;
use chronicle_core::snapshot::{Snapshot, SnapshotStore};

/// A snapshot store whose every operation fails with a backend error.
#[derive(Debug)]
pub struct FailingSnapshotStore;

#[async_trait]
impl SnapshotStore for FailingSnapshotStore {
    async fn save_snapshot(
        &self,
        _snapshot: Snapshot,
        _cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        Err(DomainError::snapshot_failure("snapshot backend unavailable"))
    }

    async fn load_snapshot(
        &self,
        _stream_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<Snapshot>, DomainError> {
        Err(DomainError::snapshot_failure("snapshot backend unavailable"))
    }
}
