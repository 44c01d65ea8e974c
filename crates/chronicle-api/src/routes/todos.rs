//! Routes for the to-do bounded context.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chronicle_core::codec::CodecError;
use chronicle_core::error::DomainError;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use chronicle_todo::application::command_handlers::{self, TodoCommandResult};
use chronicle_todo::application::query_handlers::{self, TodoView};
use chronicle_todo::domain::commands;
use chronicle_todo::projection::TodoRow;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /.
#[derive(Debug, Deserialize)]
pub struct CreateTodoRequest {
    /// Client-chosen identifier; generated when absent.
    pub id: Option<Uuid>,
    /// The initial title.
    pub title: String,
}

/// Request body for PUT /{id}/title.
#[derive(Debug, Deserialize)]
pub struct ChangeTitleRequest {
    /// The new title.
    pub title: String,
    /// Version the client last saw.
    pub expected_version: Option<i64>,
}

/// Query string accepted by the body-less mutations.
#[derive(Debug, Default, Deserialize)]
pub struct VersionQuery {
    /// Version the client last saw.
    pub expected_version: Option<i64>,
}

/// Response body returned after a command is successfully handled.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    /// The item identifier.
    pub id: Uuid,
    /// The stream the item is persisted to.
    pub stream_id: String,
    /// The item's version after the command.
    pub version: i64,
}

impl From<TodoCommandResult> for CommandResponse {
    fn from(result: TodoCommandResult) -> Self {
        Self {
            id: result.id,
            stream_id: result.stream_id,
            version: result.version,
        }
    }
}

/// POST /
#[instrument(skip(state, request))]
async fn create_todo(
    State(state): State<AppState>,
    Json(request): Json<CreateTodoRequest>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    let command = commands::CreateTodo {
        correlation_id: Uuid::new_v4(),
        id: request.id.unwrap_or_else(Uuid::new_v4),
        title: request.title,
    };

    info!(correlation_id = %command.correlation_id, id = %command.id, "handling create_todo command");

    let result = command_handlers::handle_create_todo(
        &command,
        state.clock.as_ref(),
        &state.repository,
        &state.request_token(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(result.into())))
}

/// GET /
///
/// Served from the read model, so it trails commands until the feeder has
/// applied them. Removed items are left out.
#[instrument(skip(state))]
async fn list_todos(State(state): State<AppState>) -> Json<Vec<TodoRow>> {
    Json(state.read_model.list())
}

/// GET /{id}
#[instrument(skip(state))]
async fn get_todo(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TodoView>, ApiError> {
    let view = query_handlers::get_todo_by_id(id, &state.repository, &state.request_token()).await?;
    Ok(Json(view))
}

/// GET /{id}/events
#[instrument(skip(state))]
async fn get_todo_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let events =
        query_handlers::get_todo_events(id, &state.repository, &state.request_token()).await?;
    let wire = events
        .iter()
        .map(|envelope| state.codec.to_wire(envelope))
        .collect::<Result<Vec<_>, CodecError>>()
        .map_err(DomainError::from)?;
    Ok(Json(wire).into_response())
}

/// PUT /{id}/title
#[instrument(skip(state, request))]
async fn change_title(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChangeTitleRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let command = commands::ChangeTodoTitle {
        correlation_id: Uuid::new_v4(),
        id,
        title: request.title,
        expected_version: request.expected_version,
    };

    info!(correlation_id = %command.correlation_id, "handling change_title command");

    let result = command_handlers::handle_change_title(
        &command,
        state.clock.as_ref(),
        &state.repository,
        &state.request_token(),
    )
    .await?;

    Ok(Json(result.into()))
}

/// POST /{id}/complete
#[instrument(skip(state, query))]
async fn complete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<CommandResponse>, ApiError> {
    let command = commands::CompleteTodo {
        correlation_id: Uuid::new_v4(),
        id,
        expected_version: query.expected_version,
    };

    info!(correlation_id = %command.correlation_id, "handling complete command");

    let result = command_handlers::handle_complete(
        &command,
        state.clock.as_ref(),
        &state.repository,
        &state.request_token(),
    )
    .await?;

    Ok(Json(result.into()))
}

/// POST /{id}/uncomplete
#[instrument(skip(state, query))]
async fn uncomplete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<CommandResponse>, ApiError> {
    let command = commands::UncompleteTodo {
        correlation_id: Uuid::new_v4(),
        id,
        expected_version: query.expected_version,
    };

    info!(correlation_id = %command.correlation_id, "handling uncomplete command");

    let result = command_handlers::handle_uncomplete(
        &command,
        state.clock.as_ref(),
        &state.repository,
        &state.request_token(),
    )
    .await?;

    Ok(Json(result.into()))
}

/// DELETE /{id}
#[instrument(skip(state, query))]
async fn remove(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<CommandResponse>, ApiError> {
    let command = commands::RemoveTodo {
        correlation_id: Uuid::new_v4(),
        id,
        expected_version: query.expected_version,
    };

    info!(correlation_id = %command.correlation_id, "handling remove command");

    let result = command_handlers::handle_remove(
        &command,
        state.clock.as_ref(),
        &state.repository,
        &state.request_token(),
    )
    .await?;

    Ok(Json(result.into()))
}

/// Returns the router for the to-do context.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_todo).get(list_todos))
        .route("/{id}", get(get_todo).delete(remove))
        .route("/{id}/events", get(get_todo_events))
        .route("/{id}/title", put(change_title))
        .route("/{id}/complete", post(complete))
        .route("/{id}/uncomplete", post(uncomplete))
}
