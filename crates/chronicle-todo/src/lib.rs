//! Chronicle — to-do bounded context.
//!
//! A small domain used to exercise the event-sourcing runtime end to end:
//! the `Todo` aggregate and its events, command and query handlers, and a
//! projector maintaining an in-memory read model.

pub mod application;
pub mod domain;
pub mod projection;
