//! Aggregate roots for the to-do context.

use std::sync::LazyLock;

use chronicle_core::aggregate::{Aggregate, EventHandlers, EventSourced};
use chronicle_core::clock::Clock;
use chronicle_core::error::DomainError;
use chronicle_core::snapshot::{SnapshotCapable, SnapshotCodec};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{
    TodoItemCompleted, TodoItemCreated, TodoItemRemoved, TodoItemTitleChanged,
    TodoItemUnCompleted,
};

/// Versions at which a snapshot is always taken, regardless of state.
const SNAPSHOT_EVERY: i64 = 50;

/// Builds the stream id for a to-do item: `"todo:{id}"`.
#[must_use]
pub fn stream_id_for(id: Uuid) -> String {
    format!("todo:{id}")
}

static HANDLERS: LazyLock<EventHandlers<Todo>> = LazyLock::new(|| {
    EventHandlers::new()
        .on(|todo: &mut Todo, event: &TodoItemCreated| {
            todo.id = event.id;
            todo.title.clone_from(&event.title);
            todo.created_on = event.on;
        })
        .on(|todo: &mut Todo, event: &TodoItemTitleChanged| {
            todo.title.clone_from(&event.title);
        })
        .on(|todo: &mut Todo, _: &TodoItemCompleted| todo.is_completed = true)
        .on(|todo: &mut Todo, _: &TodoItemUnCompleted| todo.is_completed = false)
        .on(|todo: &mut Todo, _: &TodoItemRemoved| todo.is_removed = true)
});

/// The aggregate root for a single to-do item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    #[serde(flatten)]
    base: EventSourced,
    id: Uuid,
    title: String,
    is_completed: bool,
    created_on: i64,
    is_removed: bool,
}

impl Todo {
    /// Creates a new item, producing a `TodoItemCreated` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `id` is nil or `title` is blank.
    pub fn create(id: Uuid, title: &str, clock: &dyn Clock) -> Result<Self, DomainError> {
        if id.is_nil() {
            return Err(DomainError::Validation("id cannot be empty".to_owned()));
        }
        validate_title(title)?;

        let mut todo = Self::default();
        todo.apply(TodoItemCreated {
            id,
            title: title.to_owned(),
            on: clock.now().timestamp_millis(),
        })?;
        Ok(todo)
    }

    /// The item identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The current title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Whether the item is completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    /// Creation time, Unix milliseconds.
    #[must_use]
    pub fn created_on(&self) -> i64 {
        self.created_on
    }

    /// Whether the item has been removed.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.is_removed
    }

    /// Renames the item. Unchanged titles and removed items are a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the item was never created or
    /// the new title is blank.
    pub fn change_title(&mut self, title: &str, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_exists()?;
        if title == self.title || self.is_removed {
            return Ok(());
        }
        validate_title(title)?;

        self.apply(TodoItemTitleChanged {
            id: self.id,
            title: title.to_owned(),
            on: clock.now().timestamp_millis(),
        })
    }

    /// Marks the item complete. Already-completed or removed items are a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the item was never created.
    pub fn complete(&mut self, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_exists()?;
        if self.is_completed || self.is_removed {
            return Ok(());
        }

        self.apply(TodoItemCompleted {
            id: self.id,
            on: clock.now().timestamp_millis(),
        })
    }

    /// Reopens a completed item. Open or removed items are a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the item was never created.
    pub fn uncomplete(&mut self, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_exists()?;
        if !self.is_completed || self.is_removed {
            return Ok(());
        }

        self.apply(TodoItemUnCompleted {
            id: self.id,
            on: clock.now().timestamp_millis(),
        })
    }

    /// Removes the item. Removing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the item was never created.
    pub fn remove(&mut self, clock: &dyn Clock) -> Result<(), DomainError> {
        self.ensure_exists()?;
        if self.is_removed {
            return Ok(());
        }

        self.apply(TodoItemRemoved {
            id: self.id,
            on: clock.now().timestamp_millis(),
        })
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if self.id.is_nil() {
            return Err(DomainError::Validation("todo item is not found".to_owned()));
        }
        Ok(())
    }
}

fn validate_title(title: &str) -> Result<(), DomainError> {
    if title.trim().is_empty() {
        return Err(DomainError::Validation("title cannot be empty".to_owned()));
    }
    Ok(())
}

impl Aggregate for Todo {
    fn stream_id(&self) -> String {
        stream_id_for(self.id)
    }

    fn handlers() -> &'static EventHandlers<Self> {
        &HANDLERS
    }

    fn event_sourced(&self) -> &EventSourced {
        &self.base
    }

    fn event_sourced_mut(&mut self) -> &mut EventSourced {
        &mut self.base
    }

    fn snapshot_codec() -> Option<SnapshotCodec<Self>> {
        Some(SnapshotCodec::new())
    }
}

impl SnapshotCapable for Todo {
    fn snapshot_when(&self) -> Option<bool> {
        let version = self.version();
        Some((version > 0 && version % SNAPSHOT_EVERY == 0) || self.is_completed || self.is_removed)
    }
}
