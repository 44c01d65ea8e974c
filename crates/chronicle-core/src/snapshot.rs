//! The `SnapshotStore` port and snapshot capability.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::aggregate::Aggregate;
use crate::error::DomainError;

/// Full aggregate state captured at a stream version.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Stream the state belongs to.
    pub stream_id: String,
    /// Version of the last event folded into `state`.
    pub version: i64,
    /// Serialized aggregate state.
    pub state: serde_json::Value,
}

/// Single-slot store of the latest snapshot per stream; last writer wins.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Stores `snapshot`, replacing any earlier one for its stream.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SnapshotFailure` on backend errors.
    async fn save_snapshot(
        &self,
        snapshot: Snapshot,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError>;

    /// Returns the latest snapshot for `stream_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SnapshotFailure` on backend errors.
    async fn load_snapshot(
        &self,
        stream_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Snapshot>, DomainError>;
}

/// An aggregate whose state can be captured and restored.
///
/// Implementors advertise the capability by returning
/// `Some(SnapshotCodec::new())` from [`Aggregate::snapshot_codec`].
pub trait SnapshotCapable: Aggregate + Serialize + DeserializeOwned {
    /// Post-commit snapshot rule. `None` defers to the repository's
    /// version threshold.
    fn snapshot_when(&self) -> Option<bool> {
        None
    }
}

/// Function table that captures, restores and evaluates the snapshot rule
/// for one aggregate type.
pub struct SnapshotCodec<A> {
    encode: fn(&A) -> Result<serde_json::Value, serde_json::Error>,
    decode: fn(serde_json::Value) -> Result<A, serde_json::Error>,
    when: fn(&A) -> Option<bool>,
}

impl<A: SnapshotCapable> SnapshotCodec<A> {
    /// Builds the table from `A`'s serde and `snapshot_when` impls.
    #[must_use]
    pub fn new() -> Self {
        Self {
            encode: |aggregate| serde_json::to_value(aggregate),
            decode: serde_json::from_value,
            when: A::snapshot_when,
        }
    }
}

impl<A: SnapshotCapable> Default for SnapshotCodec<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> SnapshotCodec<A> {
    /// Serializes the aggregate state.
    ///
    /// # Errors
    ///
    /// Returns the serde error if the state cannot be represented.
    pub fn encode(&self, aggregate: &A) -> Result<serde_json::Value, serde_json::Error> {
        (self.encode)(aggregate)
    }

    /// Restores aggregate state.
    ///
    /// # Errors
    ///
    /// Returns the serde error if `state` does not fit the aggregate.
    pub fn decode(&self, state: serde_json::Value) -> Result<A, serde_json::Error> {
        (self.decode)(state)
    }

    /// Evaluates the aggregate's own snapshot rule.
    pub fn when(&self, aggregate: &A) -> Option<bool> {
        (self.when)(aggregate)
    }
}

impl<A> Clone for SnapshotCodec<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for SnapshotCodec<A> {}

impl<A> fmt::Debug for SnapshotCodec<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotCodec")
            .field("aggregate", &std::any::type_name::<A>())
            .finish_non_exhaustive()
    }
}
