//! Chronicle Store — reference backends for the `EventStore` and
//! `SnapshotStore` ports.
//!
//! The in-memory stores serve tests, demos and single-process deployments.
//! The `PostgreSQL` stores persist envelopes with `(stream_id, version)` as
//! the primary key and translate its unique violations into concurrency
//! conflicts.

pub mod memory_event_store;
pub mod memory_snapshot_store;
pub mod pg_event_store;
pub mod pg_snapshot_store;
pub mod schema;

pub use memory_event_store::MemoryEventStore;
pub use memory_snapshot_store::MemorySnapshotStore;
pub use pg_event_store::PgEventStore;
pub use pg_snapshot_store::PgSnapshotStore;
