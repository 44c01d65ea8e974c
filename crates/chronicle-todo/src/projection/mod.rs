//! Read side: the to-do read model and the projector that maintains it.

pub mod projector;
pub mod read_model;

pub use projector::{MissingRowPolicy, todo_projector};
pub use read_model::{TodoReadModel, TodoRow};
