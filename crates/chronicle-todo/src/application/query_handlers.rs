//! Query handlers for the to-do context.
//!
//! This module contains query handlers that reconstitute aggregates
//! from stored events and return read-only view DTOs.

use chronicle_core::aggregate::Aggregate;
use chronicle_core::error::DomainError;
use chronicle_core::event::EventEnvelope;
use chronicle_core::repository::AggregateRepository;
use futures::TryStreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::aggregates::{Todo, stream_id_for};

/// Read-only view of a to-do aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TodoView {
    /// The item identifier.
    pub id: Uuid,
    /// The current title.
    pub title: String,
    /// Whether the item is completed.
    pub is_completed: bool,
    /// Creation time, Unix milliseconds.
    pub created_on: i64,
    /// Current version (last applied event).
    pub version: i64,
}

impl From<&Todo> for TodoView {
    fn from(todo: &Todo) -> Self {
        Self {
            id: todo.id(),
            title: todo.title().to_owned(),
            is_completed: todo.is_completed(),
            created_on: todo.created_on(),
            version: todo.version(),
        }
    }
}

/// Retrieves a to-do item by its identifier.
///
/// Loads the aggregate (from its latest snapshot when one exists) and
/// returns a serializable view. Removed items are reported as not found.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the stream is empty or the
/// item was removed, and any store or codec error from the load.
pub async fn get_todo_by_id(
    id: Uuid,
    repo: &AggregateRepository,
    cancel: &CancellationToken,
) -> Result<TodoView, DomainError> {
    let stream_id = stream_id_for(id);
    match repo.load::<Todo>(&stream_id, cancel).await? {
        Some(todo) if !todo.is_removed() => Ok(TodoView::from(&todo)),
        _ => Err(DomainError::AggregateNotFound(stream_id)),
    }
}

/// Returns the full event history of a to-do item, in version order.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the stream is empty, and any
/// store or codec error from the read.
pub async fn get_todo_events(
    id: Uuid,
    repo: &AggregateRepository,
    cancel: &CancellationToken,
) -> Result<Vec<EventEnvelope>, DomainError> {
    let stream_id = stream_id_for(id);
    let events: Vec<EventEnvelope> = repo
        .event_store()
        .load_stream(&stream_id, cancel)
        .try_collect()
        .await?;
    if events.is_empty() {
        return Err(DomainError::AggregateNotFound(stream_id));
    }
    Ok(events)
}
