//! In-memory implementation of the `SnapshotStore` port.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use chronicle_core::error::DomainError;
use chronicle_core::snapshot::{Snapshot, SnapshotStore};

/// One snapshot slot per stream; the last save wins.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<String, Snapshot>>>,
}

impl MemorySnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of streams with a stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SnapshotFailure` if the store lock is poisoned.
    pub fn len(&self) -> Result<usize, DomainError> {
        self.snapshots
            .read()
            .map(|snapshots| snapshots.len())
            .map_err(|_| poisoned())
    }

    /// Returns `true` if no snapshot has been stored.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SnapshotFailure` if the store lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, DomainError> {
        self.len().map(|len| len == 0)
    }
}

fn poisoned() -> DomainError {
    DomainError::snapshot_failure("in-memory snapshot store lock poisoned")
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save_snapshot(
        &self,
        snapshot: Snapshot,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        let mut snapshots = self.snapshots.write().map_err(|_| poisoned())?;
        snapshots.insert(snapshot.stream_id.clone(), snapshot);
        Ok(())
    }

    async fn load_snapshot(
        &self,
        stream_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Snapshot>, DomainError> {
        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        let snapshots = self.snapshots.read().map_err(|_| poisoned())?;
        Ok(snapshots.get(stream_id).cloned())
    }
}
