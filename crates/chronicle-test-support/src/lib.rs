//! Shared test doubles for the chronicle event-sourcing runtime.

mod clock;
mod event_store;
mod snapshot_store;

pub use clock::FixedClock;
pub use event_store::{
    AppendCall, ConflictingEventStore, EmptyEventStore, FailingEventStore, RecordingEventStore,
};
pub use snapshot_store::FailingSnapshotStore;
