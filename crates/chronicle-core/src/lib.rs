//! Chronicle Core — the event-sourcing runtime.
//!
//! Defines the event envelope, the `EventStore` and `SnapshotStore` ports,
//! the aggregate base and repository, the projector base, and the event
//! registry and codec. It contains no infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod feed;
pub mod projector;
pub mod registry;
pub mod repository;
pub mod snapshot;
pub mod store;
