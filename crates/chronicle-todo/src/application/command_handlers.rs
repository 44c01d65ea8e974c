//! Command handlers for the to-do context.
//!
//! This module contains application-level command handler functions that
//! orchestrate domain logic: load aggregate, execute command, persist events.

use chronicle_core::aggregate::Aggregate;
use chronicle_core::clock::Clock;
use chronicle_core::command::Command;
use chronicle_core::error::DomainError;
use chronicle_core::repository::AggregateRepository;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::aggregates::{Todo, stream_id_for};
use crate::domain::commands::{
    ChangeTodoTitle, CompleteTodo, CreateTodo, RemoveTodo, UncompleteTodo,
};

/// Result of a successfully handled command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoCommandResult {
    /// The item identifier.
    pub id: Uuid,
    /// The stream the item is persisted to.
    pub stream_id: String,
    /// The item's version after the command.
    pub version: i64,
}

impl TodoCommandResult {
    fn of(todo: &Todo) -> Self {
        Self {
            id: todo.id(),
            stream_id: todo.stream_id(),
            version: todo.version(),
        }
    }
}

/// Handles the `CreateTodo` command: creates the item and persists the
/// `TodoItemCreated` event as the first event of its stream.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a nil id or blank title, and
/// `DomainError::ConcurrencyConflict` if the stream already exists.
#[instrument(skip_all, fields(id = %command.id, correlation_id = %command.correlation_id))]
pub async fn handle_create_todo(
    command: &CreateTodo,
    clock: &dyn Clock,
    repo: &AggregateRepository,
    cancel: &CancellationToken,
) -> Result<TodoCommandResult, DomainError> {
    let mut todo = Todo::create(command.id, &command.title, clock)?;
    repo.save(&mut todo, Some(command.event_metadata()), cancel)
        .await?;
    info!(stream_id = %todo.stream_id(), version = todo.version(), "todo created");
    Ok(TodoCommandResult::of(&todo))
}

/// Handles the `ChangeTodoTitle` command: loads the aggregate, renames the
/// item, and persists the resulting events.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the item does not exist,
/// `DomainError::ConcurrencyConflict` if it is no longer at the expected
/// version, and `DomainError::Validation` for a blank title.
#[instrument(skip_all, fields(id = %command.id, correlation_id = %command.correlation_id))]
pub async fn handle_change_title(
    command: &ChangeTodoTitle,
    clock: &dyn Clock,
    repo: &AggregateRepository,
    cancel: &CancellationToken,
) -> Result<TodoCommandResult, DomainError> {
    let mut todo = load_at(repo, command.id, command.expected_version, cancel).await?;
    todo.change_title(&command.title, clock)?;
    persist(repo, &mut todo, command, cancel).await
}

/// Handles the `CompleteTodo` command: loads the aggregate, marks the item
/// complete, and persists the resulting events.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the item does not exist, and
/// `DomainError::ConcurrencyConflict` if it is no longer at the expected
/// version.
#[instrument(skip_all, fields(id = %command.id, correlation_id = %command.correlation_id))]
pub async fn handle_complete(
    command: &CompleteTodo,
    clock: &dyn Clock,
    repo: &AggregateRepository,
    cancel: &CancellationToken,
) -> Result<TodoCommandResult, DomainError> {
    let mut todo = load_at(repo, command.id, command.expected_version, cancel).await?;
    todo.complete(clock)?;
    persist(repo, &mut todo, command, cancel).await
}

/// Handles the `UncompleteTodo` command: loads the aggregate, reopens the
/// item, and persists the resulting events.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the item does not exist, and
/// `DomainError::ConcurrencyConflict` if it is no longer at the expected
/// version.
#[instrument(skip_all, fields(id = %command.id, correlation_id = %command.correlation_id))]
pub async fn handle_uncomplete(
    command: &UncompleteTodo,
    clock: &dyn Clock,
    repo: &AggregateRepository,
    cancel: &CancellationToken,
) -> Result<TodoCommandResult, DomainError> {
    let mut todo = load_at(repo, command.id, command.expected_version, cancel).await?;
    todo.uncomplete(clock)?;
    persist(repo, &mut todo, command, cancel).await
}

/// Handles the `RemoveTodo` command: loads the aggregate, removes the item,
/// and persists the resulting events.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the item does not exist, and
/// `DomainError::ConcurrencyConflict` if it is no longer at the expected
/// version.
#[instrument(skip_all, fields(id = %command.id, correlation_id = %command.correlation_id))]
pub async fn handle_remove(
    command: &RemoveTodo,
    clock: &dyn Clock,
    repo: &AggregateRepository,
    cancel: &CancellationToken,
) -> Result<TodoCommandResult, DomainError> {
    let mut todo = load_at(repo, command.id, command.expected_version, cancel).await?;
    todo.remove(clock)?;
    persist(repo, &mut todo, command, cancel).await
}

/// Loads an item, checking the client's expected version if one was sent.
async fn load_at(
    repo: &AggregateRepository,
    id: Uuid,
    expected_version: Option<i64>,
    cancel: &CancellationToken,
) -> Result<Todo, DomainError> {
    let stream_id = stream_id_for(id);
    let todo = repo
        .load::<Todo>(&stream_id, cancel)
        .await?
        .ok_or_else(|| DomainError::AggregateNotFound(stream_id.clone()))?;
    if let Some(expected_version) = expected_version
        && expected_version != todo.version()
    {
        return Err(DomainError::ConcurrencyConflict {
            stream_id,
            expected_version,
        });
    }
    Ok(todo)
}

async fn persist(
    repo: &AggregateRepository,
    todo: &mut Todo,
    command: &dyn Command,
    cancel: &CancellationToken,
) -> Result<TodoCommandResult, DomainError> {
    repo.save(todo, Some(command.event_metadata()), cancel).await?;
    Ok(TodoCommandResult::of(todo))
}
