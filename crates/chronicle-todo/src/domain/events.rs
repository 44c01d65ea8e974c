//! Domain events for the to-do context.
//!
//! `on` fields carry the wall-clock time of the change in Unix
//! milliseconds, as taken from the injected clock.

use chronicle_core::event::DomainEvent;
use chronicle_core::registry::EventRegistry;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain name every to-do event is registered and stamped under.
pub const TODO_DOMAIN: &str = "todo";

/// Emitted when a to-do item is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItemCreated {
    /// The item identifier.
    pub id: Uuid,
    /// The initial title.
    pub title: String,
    /// Creation time, Unix milliseconds.
    pub on: i64,
}

impl DomainEvent for TodoItemCreated {
    const EVENT_TYPE: &'static str = "TodoItemCreated";
}

/// Emitted when an item's title changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItemTitleChanged {
    /// The item identifier.
    pub id: Uuid,
    /// The new title.
    pub title: String,
    /// Change time, Unix milliseconds.
    pub on: i64,
}

impl DomainEvent for TodoItemTitleChanged {
    const EVENT_TYPE: &'static str = "TodoItemTitleChanged";
}

/// Emitted when an item is marked complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItemCompleted {
    /// The item identifier.
    pub id: Uuid,
    /// Completion time, Unix milliseconds.
    pub on: i64,
}

impl DomainEvent for TodoItemCompleted {
    const EVENT_TYPE: &'static str = "TodoItemCompleted";
}

/// Emitted when a completed item is reopened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItemUnCompleted {
    /// The item identifier.
    pub id: Uuid,
    /// Reopen time, Unix milliseconds.
    pub on: i64,
}

impl DomainEvent for TodoItemUnCompleted {
    const EVENT_TYPE: &'static str = "TodoItemUnCompleted";
}

/// Emitted when an item is removed. Removal is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItemRemoved {
    /// The item identifier.
    pub id: Uuid,
    /// Removal time, Unix milliseconds.
    pub on: i64,
}

impl DomainEvent for TodoItemRemoved {
    const EVENT_TYPE: &'static str = "TodoItemRemoved";
}

/// Registers every to-do event under [`TODO_DOMAIN`].
pub fn register_events(registry: &mut EventRegistry) {
    registry.register::<TodoItemCreated>(TODO_DOMAIN);
    registry.register::<TodoItemTitleChanged>(TODO_DOMAIN);
    registry.register::<TodoItemCompleted>(TODO_DOMAIN);
    registry.register::<TodoItemUnCompleted>(TODO_DOMAIN);
    registry.register::<TodoItemRemoved>(TODO_DOMAIN);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_register_events_covers_every_todo_event() {
        // Arrange
        let mut registry = EventRegistry::new();

        // Act
        register_events(&mut registry);

        // Assert
        for event_type in [
            TodoItemCreated::EVENT_TYPE,
            TodoItemTitleChanged::EVENT_TYPE,
            TodoItemCompleted::EVENT_TYPE,
            TodoItemUnCompleted::EVENT_TYPE,
            TodoItemRemoved::EVENT_TYPE,
        ] {
            assert!(registry.is_registered(TODO_DOMAIN, event_type), "{event_type}");
        }
        assert!(!registry.is_registered("other", TodoItemCreated::EVENT_TYPE));
    }

    #[test]
    fn test_created_payload_uses_camel_case_fields() {
        let id = Uuid::nil();
        let event = TodoItemCreated {
            id,
            title: "Test Todo".to_owned(),
            on: 1_700_000_000_000,
        };

        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(
            value,
            json!({ "id": id, "title": "Test Todo", "on": 1_700_000_000_000_i64 })
        );
    }
}
