//! Chronicle — HTTP API over the to-do bounded context.
//!
//! Exposes the router and its building blocks so integration tests can
//! drive the same routes the binary serves.

use axum::Router;

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

use crate::state::AppState;

/// Builds the application router with every route mounted.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/todos", routes::todos::router())
        .with_state(state)
}
