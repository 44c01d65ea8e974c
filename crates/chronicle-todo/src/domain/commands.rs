//! Commands for the to-do context.
//!
//! Mutating commands carry an optional `expected_version`: when present, the
//! handler rejects the command with a concurrency conflict unless the item
//! is still at that version.

use chronicle_core::command::Command;
use uuid::Uuid;

/// Command to create a to-do item.
#[derive(Debug, Clone)]
pub struct CreateTodo {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The new item's identifier.
    pub id: Uuid,
    /// The initial title.
    pub title: String,
}

/// Command to rename a to-do item.
#[derive(Debug, Clone)]
pub struct ChangeTodoTitle {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The item identifier.
    pub id: Uuid,
    /// The new title.
    pub title: String,
    /// Version the client last saw.
    pub expected_version: Option<i64>,
}

/// Command to mark a to-do item complete.
#[derive(Debug, Clone)]
pub struct CompleteTodo {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The item identifier.
    pub id: Uuid,
    /// Version the client last saw.
    pub expected_version: Option<i64>,
}

/// Command to reopen a completed to-do item.
#[derive(Debug, Clone)]
pub struct UncompleteTodo {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The item identifier.
    pub id: Uuid,
    /// Version the client last saw.
    pub expected_version: Option<i64>,
}

/// Command to remove a to-do item.
#[derive(Debug, Clone)]
pub struct RemoveTodo {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The item identifier.
    pub id: Uuid,
    /// Version the client last saw.
    pub expected_version: Option<i64>,
}

impl Command for CreateTodo {
    fn command_type(&self) -> &'static str {
        "todo.create"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

impl Command for ChangeTodoTitle {
    fn command_type(&self) -> &'static str {
        "todo.change_title"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

impl Command for CompleteTodo {
    fn command_type(&self) -> &'static str {
        "todo.complete"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

impl Command for UncompleteTodo {
    fn command_type(&self) -> &'static str {
        "todo.uncomplete"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

impl Command for RemoveTodo {
    fn command_type(&self) -> &'static str {
        "todo.remove"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}
