//! End-to-end protocol scenarios against the in-memory store.

use ramptx_codec::{StagingRecord, COMMIT_MARKER_FIELD, STAGING_FIELD};
use ramptx_core::{
    AtomicClock, CommitExecutor, CommitStatus, Config, CoreError, Inspection, ParticipantStager,
    RecoveryScanner, Resolution, RetryConfig, StoreClock, Timestamp, TimestampSource,
    TransactionCoordinator,
};
use ramptx_store::{DocumentStore, InMemoryStore};
use std::sync::{Arc, Barrier};
use std::thread;

struct World {
    store: Arc<InMemoryStore>,
    clock: Arc<AtomicClock>,
    stager: ParticipantStager,
    committer: CommitExecutor,
    recovery: RecoveryScanner,
}

fn world(staleness: u64) -> World {
    let config = Config::new()
        .staleness_threshold(staleness)
        .retry(RetryConfig::immediate(3));
    let store = Arc::new(InMemoryStore::new());
    // First issued timestamp is 7
    let clock = Arc::new(AtomicClock::starting_after(6));
    World {
        stager: ParticipantStager::new(store.clone(), config.clone()),
        committer: CommitExecutor::new(store.clone(), config.clone()),
        recovery: RecoveryScanner::new(store.clone(), clock.clone(), config),
        store,
        clock,
    }
}

/// Stages the `a`/`b` swap from the protocol walkthrough.
fn stage_swap(w: &World) -> Timestamp {
    w.store.insert("a", b"").unwrap();
    w.store.insert("b", b"").unwrap();
    let ts = w.clock.next().unwrap();
    w.stager
        .stage("a", b"jeff", ts, &["b".to_string()])
        .unwrap();
    w.stager
        .stage("b", b"mike", ts, &["a".to_string()])
        .unwrap();
    ts
}

fn staging(store: &InMemoryStore, key: &str) -> Option<StagingRecord> {
    store
        .get_field(key, STAGING_FIELD)
        .ok()
        .map(|field| StagingRecord::decode(&field.value).unwrap())
}

fn value(store: &InMemoryStore, key: &str) -> Vec<u8> {
    store.get(key).unwrap().value
}

#[test]
fn two_party_swap() {
    let w = world(64);
    let ts = stage_swap(&w);
    assert_eq!(ts, Timestamp::new(7));

    let a = staging(&w.store, "a").unwrap();
    assert_eq!(a.timestamp, Timestamp::new(7));
    assert_eq!(a.participant_refs, vec!["b".to_string()]);
    assert_eq!(a.pending_value, b"jeff");
    let b = staging(&w.store, "b").unwrap();
    assert_eq!(b.participant_refs, vec!["a".to_string()]);
    assert_eq!(b.pending_value, b"mike");

    // Readers keep seeing the old values while staged
    assert_eq!(value(&w.store, "a"), b"");

    assert_eq!(w.committer.commit("a").unwrap(), CommitStatus::Committed);
    assert_eq!(w.committer.commit("b").unwrap(), CommitStatus::Committed);

    assert_eq!(value(&w.store, "a"), b"jeff");
    assert_eq!(value(&w.store, "b"), b"mike");
    assert!(staging(&w.store, "a").is_none());
    assert!(staging(&w.store, "b").is_none());
}

#[test]
fn abandoned_after_staging_rolls_back() {
    let w = world(10);
    let ts = stage_swap(&w);
    // Coordinator crashes here

    assert!(matches!(
        w.recovery.inspect("a").unwrap(),
        Inspection::StagedActive { timestamp, .. } if timestamp == ts
    ));

    w.clock.advance(10);
    assert!(matches!(
        w.recovery.inspect("a").unwrap(),
        Inspection::Abandoned { timestamp, .. } if timestamp == ts
    ));

    let resolution = w.recovery.resolve("a").unwrap();

    assert!(matches!(resolution, Resolution::RolledBack { .. }));
    assert_eq!(value(&w.store, "a"), b"");
    assert_eq!(value(&w.store, "b"), b"");
    assert!(staging(&w.store, "a").is_none());
    assert!(staging(&w.store, "b").is_none());
    assert_eq!(w.recovery.inspect("b").unwrap(), Inspection::Clean);
}

#[test]
fn abandoned_after_partial_commit_rolls_forward() {
    let w = world(10);
    let ts = stage_swap(&w);
    w.committer.commit("a").unwrap();
    // Coordinator crashes here
    w.clock.advance(10);

    let resolution = w.recovery.resolve("b").unwrap();

    assert!(matches!(resolution, Resolution::Committed { timestamp, .. } if timestamp == ts));
    assert_eq!(value(&w.store, "a"), b"jeff");
    assert_eq!(value(&w.store, "b"), b"mike");
    assert!(staging(&w.store, "b").is_none());
}

#[test]
fn crash_between_marker_and_replace_rolls_forward() {
    let w = world(0);
    stage_swap(&w);

    // Promote `a` by hand up to the marker write only
    let doc = w.store.get_document("a").unwrap();
    let mut marker = ramptx_codec::CommitMarker::new();
    marker.record(Timestamp::new(7), 16, 0);
    w.store
        .upsert_field("a", COMMIT_MARKER_FIELD, &marker.encode().unwrap(), Some(doc.cas))
        .unwrap();

    // Recovery entered through the unmarked sibling still rolls forward
    w.recovery.resolve("b").unwrap();

    assert_eq!(value(&w.store, "a"), b"jeff");
    assert_eq!(value(&w.store, "b"), b"mike");
}

#[test]
fn busy_participant_keeps_evidence_until_sibling_is_abandoned() {
    let w = world(64);
    let ts = stage_swap(&w);
    assert_eq!(w.committer.commit_at("a", ts).unwrap(), CommitStatus::Committed);

    // More later commits on `a` than its marker's nominal history
    let coordinator = TransactionCoordinator::new(w.store.clone(), w.clock.clone(), Config::new());
    for i in 0..16 {
        let outcome = coordinator.execute([("a", format!("later-{i}"))]).unwrap();
        assert!(outcome.is_complete());
    }
    w.clock.advance(64);
    assert!(w.recovery.inspect("b").unwrap().is_abandoned());

    let resolution = w.recovery.resolve("b").unwrap();

    assert!(matches!(resolution, Resolution::Committed { timestamp, .. } if timestamp == ts));
    assert_eq!(value(&w.store, "b"), b"mike");
    assert_eq!(value(&w.store, "a"), b"later-15");
}

#[test]
fn commit_is_idempotent() {
    let w = world(64);
    stage_swap(&w);
    w.committer.commit("a").unwrap();
    let before = w.store.get_document("a").unwrap();

    for _ in 0..3 {
        assert_eq!(
            w.committer.commit("a").unwrap(),
            CommitStatus::AlreadyCommitted
        );
    }
    assert_eq!(w.store.get_document("a").unwrap(), before);
}

#[test]
fn resolve_is_idempotent() {
    let w = world(0);
    stage_swap(&w);

    w.recovery.resolve("a").unwrap();
    let a = w.store.get_document("a").unwrap();
    let b = w.store.get_document("b").unwrap();

    assert_eq!(w.recovery.resolve("a").unwrap(), Resolution::AlreadyClean);
    assert_eq!(w.recovery.resolve("b").unwrap(), Resolution::AlreadyClean);
    assert_eq!(w.store.get_document("a").unwrap(), a);
    assert_eq!(w.store.get_document("b").unwrap(), b);
}

#[test]
fn concurrent_stagers_exclude_each_other() {
    for round in 0..20 {
        let store = Arc::new(InMemoryStore::new());
        let key = format!("doc-{round}");
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (1..=2u64)
            .map(|ts| {
                let store = store.clone();
                let key = key.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let stager = ParticipantStager::new(store, Config::default());
                    barrier.wait();
                    stager.stage(&key, b"mine", Timestamp::new(ts), &[])
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(CoreError::Conflict { .. })))
            .count();

        assert_eq!(wins, 1, "round {round}: {results:?}");
        assert_eq!(conflicts, 1, "round {round}: {results:?}");
        assert!(staging(&store, &key).is_some());
    }
}

#[test]
fn concurrent_transfers_preserve_total() {
    let store = Arc::new(InMemoryStore::new());
    store.insert("left", b"100").unwrap();
    store.insert("right", b"100").unwrap();
    let clock: Arc<dyn TimestampSource> = Arc::new(StoreClock::new(store.clone()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let coordinator = TransactionCoordinator::new(
                store.clone(),
                clock.clone(),
                Config::new()
                    .max_conflict_retries(1_000)
                    .recover_on_conflict(false)
                    .retry(RetryConfig::immediate(3)),
            );
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    loop {
                        let left = parse(&store.get("left").unwrap().value);
                        let right = parse(&store.get("right").unwrap().value);
                        let mut txn = coordinator.begin().unwrap();
                        txn.write("left", (left - 1).to_string()).unwrap();
                        txn.write("right", (right + 1).to_string()).unwrap();
                        if coordinator.stage(&mut txn).is_err() {
                            continue;
                        }
                        // Values may have moved between the read and the stage
                        if parse(&store.get("left").unwrap().value) != left
                            || parse(&store.get("right").unwrap().value) != right
                        {
                            coordinator.rollback(&mut txn).unwrap();
                            continue;
                        }
                        coordinator.commit(&mut txn).unwrap();
                        break;
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(parse(&value(&store, "left")), 60);
    assert_eq!(parse(&value(&store, "right")), 140);
}

fn parse(raw: &[u8]) -> i64 {
    std::str::from_utf8(raw).unwrap().parse().unwrap()
}
