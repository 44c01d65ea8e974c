//! `AggregateRepository` behaviour against the in-memory backends.

use std::sync::{Arc, LazyLock};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use chronicle_core::aggregate::{Aggregate, EventHandlers, EventSourced};
use chronicle_core::config::RepositoryConfig;
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainEvent;
use chronicle_core::repository::AggregateRepository;
use chronicle_core::snapshot::{Snapshot, SnapshotCapable, SnapshotCodec, SnapshotStore};
use chronicle_core::store::EventStore;
use chronicle_store::{MemoryEventStore, MemorySnapshotStore};
use chronicle_test_support::{
    ConflictingEventStore, FailingEventStore, FailingSnapshotStore, RecordingEventStore,
};

// --- test aggregate ---

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CounterOpened {
    id: String,
}

impl DomainEvent for CounterOpened {
    const EVENT_TYPE: &'static str = "CounterOpened";
}

#[derive(Debug, Serialize, Deserialize)]
struct Incremented {
    by: i64,
}

impl DomainEvent for Incremented {
    const EVENT_TYPE: &'static str = "Incremented";
}

/// Snapshots every 12th version. `folded` counts handler runs on this
/// instance and is never serialized.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Counter {
    #[serde(flatten)]
    base: EventSourced,
    id: String,
    total: i64,
    #[serde(skip)]
    folded: u32,
}

static COUNTER_HANDLERS: LazyLock<EventHandlers<Counter>> = LazyLock::new(|| {
    EventHandlers::new()
        .on(|c: &mut Counter, e: &CounterOpened| {
            c.id.clone_from(&e.id);
            c.folded += 1;
        })
        .on(|c: &mut Counter, e: &Incremented| {
            c.total += e.by;
            c.folded += 1;
        })
});

impl Counter {
    fn open(id: &str) -> Self {
        let mut counter = Self::default();
        counter
            .apply(CounterOpened { id: id.to_owned() })
            .unwrap();
        counter
    }

    fn bump(&mut self, times: usize) {
        for _ in 0..times {
            self.apply(Incremented { by: 1 }).unwrap();
        }
    }
}

impl Aggregate for Counter {
    fn stream_id(&self) -> String {
        format!("counter:{}", self.id)
    }

    fn handlers() -> &'static EventHandlers<Self> {
        &COUNTER_HANDLERS
    }

    fn event_sourced(&self) -> &EventSourced {
        &self.base
    }

    fn event_sourced_mut(&mut self) -> &mut EventSourced {
        &mut self.base
    }

    fn snapshot_codec() -> Option<SnapshotCodec<Self>> {
        Some(SnapshotCodec::new())
    }
}

impl SnapshotCapable for Counter {
    fn snapshot_when(&self) -> Option<bool> {
        Some(self.version() % 12 == 0)
    }
}

/// Snapshot-capable but defers to the repository threshold.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Tally {
    #[serde(flatten)]
    base: EventSourced,
    total: i64,
}

static TALLY_HANDLERS: LazyLock<EventHandlers<Tally>> = LazyLock::new(|| {
    EventHandlers::new().on(|t: &mut Tally, e: &Incremented| t.total += e.by)
});

impl Aggregate for Tally {
    fn stream_id(&self) -> String {
        "tally:1".to_owned()
    }

    fn handlers() -> &'static EventHandlers<Self> {
        &TALLY_HANDLERS
    }

    fn event_sourced(&self) -> &EventSourced {
        &self.base
    }

    fn event_sourced_mut(&mut self) -> &mut EventSourced {
        &mut self.base
    }

    fn snapshot_codec() -> Option<SnapshotCodec<Self>> {
        Some(SnapshotCodec::new())
    }
}

impl SnapshotCapable for Tally {}

struct Fixture {
    events: MemoryEventStore,
    snapshots: MemorySnapshotStore,
    repository: AggregateRepository,
    cancel: CancellationToken,
}

fn fixture() -> Fixture {
    let events = MemoryEventStore::new("counters");
    let snapshots = MemorySnapshotStore::new();
    let repository = AggregateRepository::builder()
        .use_event_store(Arc::new(events.clone()))
        .use_snapshot_store(Arc::new(snapshots.clone()))
        .build()
        .unwrap();
    Fixture {
        events,
        snapshots,
        repository,
        cancel: CancellationToken::new(),
    }
}

// --- round trip ---

#[tokio::test]
async fn test_load_after_save_restores_state_and_version() {
    // Arrange
    let f = fixture();
    let mut counter = Counter::open("a");
    counter.bump(3);

    // Act
    f.repository.save(&mut counter, None, &f.cancel).await.unwrap();
    let loaded: Counter = f
        .repository
        .load("counter:a", &f.cancel)
        .await
        .unwrap()
        .unwrap();

    // Assert
    assert_eq!(counter.version(), 4);
    assert!(counter.pending_changes().is_empty());
    assert_eq!(loaded.id, "a");
    assert_eq!(loaded.total, 3);
    assert_eq!(loaded.version(), 4);
    assert!(loaded.pending_changes().is_empty());
}

#[tokio::test]
async fn test_load_of_empty_stream_is_none() {
    let f = fixture();

    let loaded = f.repository.load::<Counter>("counter:nobody", &f.cancel).await.unwrap();

    assert!(loaded.is_none());
}

#[tokio::test]
async fn test_load_rejects_blank_stream_id() {
    let f = fixture();

    let err = f.repository.load::<Counter>("  ", &f.cancel).await.unwrap_err();

    assert!(matches!(err, DomainError::Validation(_)));
}

// --- snapshots ---

#[tokio::test]
async fn test_snapshot_taken_at_rule_version_and_load_replays_nothing() {
    // Arrange
    let f = fixture();
    let mut counter = Counter::open("s4");
    counter.bump(6);
    f.repository.save(&mut counter, None, &f.cancel).await.unwrap();
    assert!(f.snapshots.is_empty().unwrap());

    // Act
    counter.bump(5);
    f.repository.save(&mut counter, None, &f.cancel).await.unwrap();
    let loaded: Counter = f
        .repository
        .load("counter:s4", &f.cancel)
        .await
        .unwrap()
        .unwrap();

    // Assert
    let snapshot = f
        .snapshots
        .load_snapshot("counter:s4", &f.cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.version, 12);
    assert_eq!(loaded.version(), 12);
    assert_eq!(loaded.total, 11);
    assert_eq!(loaded.folded, 0);
}

#[tokio::test]
async fn test_snapshot_plus_tail_equals_full_replay() {
    // Arrange
    let f = fixture();
    let mut counter = Counter::open("eq");
    counter.bump(11);
    f.repository.save(&mut counter, None, &f.cancel).await.unwrap();
    counter.bump(3);
    f.repository.save(&mut counter, None, &f.cancel).await.unwrap();
    let full_replay = AggregateRepository::new(Arc::new(f.events.clone()));

    // Act
    let from_snapshot: Counter = f.repository.load("counter:eq", &f.cancel).await.unwrap().unwrap();
    let from_events: Counter = full_replay.load("counter:eq", &f.cancel).await.unwrap().unwrap();

    // Assert
    assert_eq!(from_snapshot.folded, 3);
    assert_eq!(from_events.folded, 15);
    assert_eq!(from_snapshot.version(), from_events.version());
    assert_eq!(from_snapshot.total, from_events.total);
    assert_eq!(from_snapshot.id, from_events.id);
}

#[tokio::test]
async fn test_force_snapshot_ignores_policy() {
    let f = fixture();
    let mut counter = Counter::open("forced");

    f.repository
        .save_and_force_snapshot(&mut counter, None, &f.cancel)
        .await
        .unwrap();

    let snapshot = f.snapshots.load_snapshot("counter:forced", &f.cancel).await.unwrap();
    assert_eq!(snapshot.map(|s| s.version), Some(1));
}

#[tokio::test]
async fn test_threshold_applies_when_aggregate_has_no_rule() {
    // Arrange
    let events = MemoryEventStore::new("counters");
    let snapshots = MemorySnapshotStore::new();
    let repository = AggregateRepository::builder()
        .use_event_store(Arc::new(events))
        .use_snapshot_store(Arc::new(snapshots.clone()))
        .with_config(RepositoryConfig::default().with_snapshot_threshold(3))
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    let mut tally = Tally::default();

    // Act
    tally.apply(Incremented { by: 1 }).unwrap();
    tally.apply(Incremented { by: 1 }).unwrap();
    repository.save(&mut tally, None, &cancel).await.unwrap();
    let after_two = snapshots.is_empty().unwrap();
    tally.apply(Incremented { by: 1 }).unwrap();
    repository.save(&mut tally, None, &cancel).await.unwrap();

    // Assert
    assert!(after_two);
    let snapshot = snapshots.load_snapshot("tally:1", &cancel).await.unwrap().unwrap();
    assert_eq!(snapshot.version, 3);
    assert_eq!(snapshot.state, json!({ "version": 3, "total": 3 }));
}

#[tokio::test]
async fn test_snapshot_failures_never_fail_save_or_load() {
    // Arrange
    let events = MemoryEventStore::new("counters");
    let repository = AggregateRepository::builder()
        .use_event_store(Arc::new(events))
        .use_snapshot_store(Arc::new(FailingSnapshotStore))
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    let mut counter = Counter::open("flaky");

    // Act
    repository
        .save_and_force_snapshot(&mut counter, None, &cancel)
        .await
        .unwrap();
    let loaded: Counter = repository.load("counter:flaky", &cancel).await.unwrap().unwrap();

    // Assert
    assert_eq!(loaded.version(), 1);
    assert_eq!(loaded.folded, 1);
}

#[tokio::test]
async fn test_undecodable_snapshot_falls_back_to_full_replay() {
    // Arrange
    let f = fixture();
    let mut counter = Counter::open("corrupt");
    counter.bump(2);
    f.repository.save(&mut counter, None, &f.cancel).await.unwrap();
    f.snapshots
        .save_snapshot(
            Snapshot {
                stream_id: "counter:corrupt".to_owned(),
                version: 2,
                state: json!("not a counter"),
            },
            &f.cancel,
        )
        .await
        .unwrap();

    // Act
    let loaded: Counter = f.repository.load("counter:corrupt", &f.cancel).await.unwrap().unwrap();

    // Assert
    assert_eq!(loaded.version(), 3);
    assert_eq!(loaded.total, 2);
    assert_eq!(loaded.folded, 3);
}

// --- concurrency contract ---

#[tokio::test]
async fn test_stale_writer_gets_conflict_and_persists_nothing() {
    // Arrange
    let f = fixture();
    let mut original = Counter::open("race");
    f.repository.save(&mut original, None, &f.cancel).await.unwrap();
    let mut first: Counter = f.repository.load("counter:race", &f.cancel).await.unwrap().unwrap();
    let mut second: Counter = f.repository.load("counter:race", &f.cancel).await.unwrap().unwrap();
    second.bump(1);
    f.repository.save(&mut second, None, &f.cancel).await.unwrap();

    // Act
    first.bump(2);
    let err = f.repository.save(&mut first, None, &f.cancel).await.unwrap_err();

    // Assert
    assert!(matches!(
        err,
        DomainError::ConcurrencyConflict { ref stream_id, expected_version: 1 } if stream_id == "counter:race"
    ));
    assert_eq!(first.version(), 1);
    assert_eq!(first.pending_changes().len(), 2);
    assert_eq!(f.events.stream_version("counter:race").unwrap(), 2);
}

#[tokio::test]
async fn test_conflict_from_store_leaves_aggregate_untouched() {
    let repository = AggregateRepository::new(Arc::new(ConflictingEventStore::default()));
    let mut counter = Counter::open("c");

    let err = repository
        .save(&mut counter, None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(counter.version(), 0);
    assert_eq!(counter.pending_changes().len(), 1);
}

// --- save semantics ---

#[tokio::test]
async fn test_save_without_changes_writes_nothing() {
    // Arrange
    let store = Arc::new(RecordingEventStore::default());
    let repository = AggregateRepository::new(store.clone());
    let mut counter = Counter::default();

    // Act
    repository
        .save(&mut counter, None, &CancellationToken::new())
        .await
        .unwrap();

    // Assert
    assert!(store.appends().is_empty());
    assert_eq!(counter.version(), 0);
}

#[tokio::test]
async fn test_save_attaches_fresh_correlation_when_metadata_absent() {
    // Arrange
    let store = Arc::new(RecordingEventStore::default());
    let repository = AggregateRepository::new(store.clone());
    let mut counter = Counter::open("meta");
    counter.bump(1);

    // Act
    repository
        .save(&mut counter, None, &CancellationToken::new())
        .await
        .unwrap();

    // Assert
    let appends = store.appends();
    assert_eq!(appends.len(), 1);
    assert_eq!(appends[0].stream_id, "counter:meta");
    assert_eq!(appends[0].expected_version, 0);
    assert_eq!(appends[0].event_types, vec!["CounterOpened", "Incremented"]);
    let metadata = appends[0].metadata.clone().unwrap();
    assert!(metadata.correlation_id.is_some());
    assert!(metadata.causation_id.is_none());
    assert_eq!(counter.version(), 2);
}

#[tokio::test]
async fn test_store_failure_surfaces_from_load() {
    let repository = AggregateRepository::new(Arc::new(FailingEventStore));

    let err = repository
        .load::<Counter>("counter:x", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::StoreFailure(_)));
}

#[tokio::test]
async fn test_unregistered_events_in_stream_are_skipped_on_load() {
    // Arrange
    #[derive(Debug, Serialize, Deserialize)]
    struct Renamed {
        name: String,
    }

    impl DomainEvent for Renamed {
        const EVENT_TYPE: &'static str = "Renamed";
    }

    let f = fixture();
    let mut counter = Counter::open("fwd");
    f.repository.save(&mut counter, None, &f.cancel).await.unwrap();
    f.events
        .append_one(
            "counter:fwd",
            Arc::new(Renamed { name: "later".to_owned() }),
            1,
            None,
            &f.cancel,
        )
        .await
        .unwrap();

    // Act
    let mut loaded: Counter = f.repository.load("counter:fwd", &f.cancel).await.unwrap().unwrap();
    loaded.bump(1);
    f.repository.save(&mut loaded, None, &f.cancel).await.unwrap();

    // Assert
    assert_eq!(loaded.version(), 3);
    assert_eq!(loaded.total, 1);
}

#[tokio::test]
async fn test_cancelled_save_surfaces_cancellation() {
    let f = fixture();
    let mut counter = Counter::open("cancel");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = f.repository.save(&mut counter, None, &cancel).await.unwrap_err();

    assert!(matches!(err, DomainError::Cancelled));
    assert_eq!(counter.pending_changes().len(), 1);
}
