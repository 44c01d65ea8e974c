//! Projector maintaining the [`TodoReadModel`].
//!
//! Every handler is guarded by `(stream_id, version)`: creations skip when
//! the row exists, and other events only apply when the envelope supersedes
//! the row's stored version. Feeding the same envelopes twice, or replaying
//! a prefix of the log before live delivery, converges on the same rows.

use std::sync::Arc;

use chronicle_core::error::BoxError;
use chronicle_core::event::{DomainEvent, EventEnvelope};
use chronicle_core::projector::Projector;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::read_model::{RowUpdate, TodoReadModel, TodoRow};
use crate::domain::events::{
    TodoItemCompleted, TodoItemCreated, TodoItemRemoved, TodoItemTitleChanged,
    TodoItemUnCompleted,
};

/// Name the projector logs under.
pub const TODO_PROJECTOR: &str = "todo-read-model";

/// What a handler does when a non-create event names an unknown item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingRowPolicy {
    /// Log and skip; tolerates partial replays that start mid-stream.
    #[default]
    Skip,
    /// Fail the batch with [`ProjectionError::MissingRow`].
    Fail,
}

/// Failures raised by the to-do projection handlers.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// A non-create event arrived for an item with no row.
    #[error("no read-model row for {id} while applying {event_type}")]
    MissingRow {
        /// The item identifier.
        id: Uuid,
        /// The event being applied.
        event_type: &'static str,
    },
}

/// Builds a projector over `model` with every to-do event registered.
#[must_use]
pub fn todo_projector(
    model: Arc<TodoReadModel>,
    policy: MissingRowPolicy,
) -> Projector<Arc<TodoReadModel>> {
    let mut projector = Projector::new(TODO_PROJECTOR, model);
    projector
        .register_handler(
            |model: &Arc<TodoReadModel>, event: &TodoItemCreated, envelope: &EventEnvelope| {
                let inserted = model.insert_if_absent(TodoRow {
                    id: event.id,
                    title: event.title.clone(),
                    is_completed: false,
                    is_removed: false,
                    version: envelope.version,
                });
                if !inserted {
                    debug!(envelope = %envelope, "row already exists; skipping creation");
                }
                Ok(())
            },
        )
        .register_handler(
            move |model: &Arc<TodoReadModel>, event: &TodoItemTitleChanged, envelope: &EventEnvelope| {
                let title = event.title.clone();
                guarded::<TodoItemTitleChanged>(model, policy, event.id, envelope, |row| {
                    row.title = title;
                })
            },
        )
        .register_handler(
            move |model: &Arc<TodoReadModel>, event: &TodoItemCompleted, envelope: &EventEnvelope| {
                guarded::<TodoItemCompleted>(model, policy, event.id, envelope, |row| {
                    row.is_completed = true;
                })
            },
        )
        .register_handler(
            move |model: &Arc<TodoReadModel>, event: &TodoItemUnCompleted, envelope: &EventEnvelope| {
                guarded::<TodoItemUnCompleted>(model, policy, event.id, envelope, |row| {
                    row.is_completed = false;
                })
            },
        )
        .register_handler(
            move |model: &Arc<TodoReadModel>, event: &TodoItemRemoved, envelope: &EventEnvelope| {
                guarded::<TodoItemRemoved>(model, policy, event.id, envelope, |row| {
                    row.is_removed = true;
                })
            },
        );
    projector
}

fn guarded<E: DomainEvent>(
    model: &TodoReadModel,
    policy: MissingRowPolicy,
    id: Uuid,
    envelope: &EventEnvelope,
    mutate: impl FnOnce(&mut TodoRow),
) -> Result<(), BoxError> {
    match model.update_if_newer(id, envelope.version, mutate) {
        RowUpdate::Applied => Ok(()),
        RowUpdate::Stale => {
            debug!(envelope = %envelope, "row already at or past this version");
            Ok(())
        }
        RowUpdate::Missing => match policy {
            MissingRowPolicy::Skip => {
                warn!(envelope = %envelope, %id, "no row for item; skipping");
                Ok(())
            }
            MissingRowPolicy::Fail => Err(Box::new(ProjectionError::MissingRow {
                id,
                event_type: E::EVENT_TYPE,
            })),
        },
    }
}
