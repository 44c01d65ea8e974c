//! In-memory to-do read model.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use uuid::Uuid;

/// One projected to-do item.
///
/// Removed items stay in the model as tombstones so replays that reach an
/// already-removed item remain idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TodoRow {
    /// The item identifier.
    pub id: Uuid,
    /// The current title.
    pub title: String,
    /// Whether the item is completed.
    pub is_completed: bool,
    /// Whether the item was removed.
    #[serde(skip)]
    pub is_removed: bool,
    /// Version of the last envelope applied to this row.
    pub version: i64,
}

/// Outcome of a version-guarded row update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowUpdate {
    /// The row was mutated and stamped with the new version.
    Applied,
    /// The row already reflects this version or a later one.
    Stale,
    /// No row exists for the id.
    Missing,
}

/// Thread-safe map of to-do rows keyed by item id.
///
/// A poisoned lock is recovered rather than propagated: every write leaves
/// the map in a consistent state.
#[derive(Debug, Default)]
pub struct TodoReadModel {
    rows: RwLock<HashMap<Uuid, TodoRow>>,
}

impl TodoReadModel {
    /// Creates an empty read model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the row for `id`, including tombstones.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<TodoRow> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Inserts `row` unless a row for its id already exists. Returns `true`
    /// if the row was inserted.
    pub fn insert_if_absent(&self, row: TodoRow) -> bool {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        if rows.contains_key(&row.id) {
            return false;
        }
        rows.insert(row.id, row);
        true
    }

    /// Applies `mutate` to the row for `id` if `version` is newer than the
    /// row's stored version, then stamps the row with `version`.
    pub fn update_if_newer(
        &self,
        id: Uuid,
        version: i64,
        mutate: impl FnOnce(&mut TodoRow),
    ) -> RowUpdate {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        let Some(row) = rows.get_mut(&id) else {
            return RowUpdate::Missing;
        };
        if version <= row.version {
            return RowUpdate::Stale;
        }
        mutate(row);
        row.version = version;
        RowUpdate::Applied
    }

    /// Live (non-removed) rows, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<TodoRow> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        let mut live: Vec<TodoRow> = rows.values().filter(|r| !r.is_removed).cloned().collect();
        live.sort_by_key(|r| r.id);
        live
    }

    /// Number of rows, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if the model holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
