//! End-to-end sync scenarios and cross-replica properties.
//!
//! Each scenario drives full engines through the public surface the way a
//! host application would: tick, apply, exchange, reconcile, acknowledge.

use serde_json::json;
use tidemark::{
    CollectionDef, ConflictResolution, Engine, Error, FieldKind, FieldSpec, HybridClock,
    MergeStrategy, Operation, RejectReason, Schema,
};

fn todos_schema() -> Schema {
    Schema::new(1).with_collection(CollectionDef::new(
        "todos",
        vec![FieldSpec::required("title", FieldKind::String)],
    ))
}

fn engine(node_id: &str) -> Engine {
    Engine::new(todos_schema(), node_id)
}

fn a1_create() -> Operation {
    Operation::create(
        "a1",
        "r1",
        "todos",
        json!({"title": "x"}),
        1000,
        HybridClock::at("A", 1),
    )
}

fn a3_update(timestamp: i64) -> Operation {
    Operation::update(
        "a3",
        "r1",
        "todos",
        json!({"title": "A-wins"}),
        1,
        timestamp,
        HybridClock::at("A", 3),
    )
}

fn b2_update(timestamp: i64) -> Operation {
    Operation::update(
        "b2",
        "r1",
        "todos",
        json!({"title": "B-loses"}),
        1,
        timestamp,
        HybridClock::at("B", 2),
    )
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn create_then_update_on_a_single_replica() {
    let mut a = engine("A");

    let applied = a.apply(a1_create(), 1000).unwrap();
    assert_eq!(applied.op_id, "a1");
    assert_eq!(applied.record_id, "r1");
    assert_eq!(applied.version, 1);

    let applied = a
        .apply(
            Operation::update(
                "a2",
                "r1",
                "todos",
                json!({"title": "y"}),
                1,
                2000,
                HybridClock::at("A", 2),
            ),
            2000,
        )
        .unwrap();
    assert_eq!(applied.version, 2);

    assert_eq!(a.get("todos", "r1").unwrap().payload, json!({"title": "y"}));
    assert_eq!(a.pending_count(), 2);
}

#[test]
fn concurrent_update_clock_wins_higher_counter() {
    // B sees A's create and update before issuing its own change: the stale
    // base version is caught at apply time and nothing conflicts.
    let mut b = engine("B");
    let result = b.reconcile(vec![a1_create(), a3_update(3000)], MergeStrategy::ClockWins);
    assert_eq!(result.applied_remote, vec!["a1", "a3"]);
    assert!(result.conflicts.is_empty());

    let issued = b.apply(b2_update(2500), 2500);
    assert!(matches!(
        issued,
        Err(Error::VersionMismatch {
            expected: 1,
            actual: 2
        })
    ));

    let record = b.get("todos", "r1").unwrap();
    assert_eq!(record.payload, json!({"title": "A-wins"}));
    assert_eq!(record.version, 2);
    assert_eq!(record.metadata.clock, HybridClock::at("A", 3));
}

#[test]
fn concurrent_update_clock_wins_after_local_apply() {
    // B applies its own update first; A's higher-counter update arrives later
    // and wins, displacing the pending local op.
    let mut b = engine("B");
    b.reconcile(vec![a1_create()], MergeStrategy::ClockWins);
    b.apply(b2_update(2500), 2500).unwrap();
    assert_eq!(b.pending_count(), 1);

    let result = b.reconcile(vec![a3_update(3000)], MergeStrategy::ClockWins);

    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].winner_op_id, "a3");
    assert_eq!(result.conflicts[0].resolution, ConflictResolution::RemoteWins);
    assert_eq!(result.rejected_local, vec!["b2"]);
    assert_eq!(b.pending_count(), 0);

    let record = b.get("todos", "r1").unwrap();
    assert_eq!(record.payload, json!({"title": "A-wins"}));
    assert_eq!(record.version, 2);
    assert_eq!(record.metadata.clock, HybridClock::at("A", 3));
}

#[test]
fn timestamp_wins_agrees_when_timestamps_align_with_clocks() {
    let mut b = engine("B");
    b.reconcile(vec![a1_create()], MergeStrategy::TimestampWins);
    b.apply(b2_update(2500), 2500).unwrap();

    let result = b.reconcile(vec![a3_update(3000)], MergeStrategy::TimestampWins);

    assert_eq!(result.rejected_local, vec!["b2"]);
    assert_eq!(
        b.get("todos", "r1").unwrap().payload,
        json!({"title": "A-wins"})
    );
}

#[test]
fn timestamp_wins_overrides_clock_order() {
    // Flip the timestamps: b2 is later on the wall clock, so a3 loses even
    // though its hybrid clock is higher.
    let mut b = engine("B");
    b.reconcile(vec![a1_create()], MergeStrategy::TimestampWins);
    b.apply(b2_update(3000), 3000).unwrap();

    let result = b.reconcile(vec![a3_update(2500)], MergeStrategy::TimestampWins);

    assert_eq!(result.rejected_remote.len(), 1);
    assert_eq!(result.rejected_remote[0].op_id, "a3");
    assert_eq!(result.rejected_remote[0].reason, RejectReason::Stale);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].resolution, ConflictResolution::LocalWins);
    assert_eq!(result.conflicts[0].winner_op_id, "b2");

    assert_eq!(
        b.get("todos", "r1").unwrap().payload,
        json!({"title": "B-loses"})
    );
}

#[test]
fn delete_then_create_resurrection() {
    let mut a = engine("A");
    a.apply(a1_create(), 1000).unwrap();
    a.apply(
        Operation::delete("d1", "r1", "todos", 1, 2000, HybridClock::at("A", 2)),
        2000,
    )
    .unwrap();

    let record = a.get("todos", "r1").unwrap();
    assert!(record.deleted);
    assert_eq!(record.version, 2);

    let result = a.reconcile(
        vec![Operation::create(
            "c2",
            "r1",
            "todos",
            json!({"title": "new"}),
            3000,
            HybridClock::at("B", 5),
        )],
        MergeStrategy::ClockWins,
    );

    assert_eq!(result.applied_remote, vec!["c2"]);
    let record = a.get("todos", "r1").unwrap();
    assert!(!record.deleted);
    assert_eq!(record.version, 3);
    assert_eq!(record.payload, json!({"title": "new"}));
}

#[test]
fn duplicate_remote_batch() {
    let mut a = engine("A");
    let clock = a.tick();
    let op = Operation::create("c1", "r1", "todos", json!({"title": "x"}), 1000, clock);
    a.apply(op.clone(), 1000).unwrap();

    let mut b = engine("B");
    let first = b.reconcile(vec![op.clone()], MergeStrategy::ClockWins);
    assert_eq!(first.applied_remote, vec!["c1"]);

    let before = b.export().to_json().unwrap();
    let second = b.reconcile(vec![op], MergeStrategy::ClockWins);

    assert!(second.applied_remote.is_empty());
    assert_eq!(second.rejected_remote.len(), 1);
    assert_eq!(second.rejected_remote[0].op_id, "c1");
    assert_eq!(second.rejected_remote[0].reason, RejectReason::Duplicate);
    assert_eq!(b.export().to_json().unwrap(), before);
}

#[test]
fn acknowledge_clears_pending() {
    let mut a = engine("A");
    a.apply(a1_create(), 1000).unwrap();
    a.apply(
        Operation::update(
            "a2",
            "r1",
            "todos",
            json!({"title": "y"}),
            1,
            2000,
            HybridClock::at("A", 2),
        ),
        2000,
    )
    .unwrap();
    assert_eq!(a.pending_count(), 2);

    let record_before = a.get("todos", "r1").unwrap().clone();
    a.acknowledge(&["a1".to_string(), "a2".to_string()]);

    assert_eq!(a.pending_count(), 0);
    assert_eq!(a.get("todos", "r1").unwrap(), &record_before);
}

// ============================================================================
// Universal properties
// ============================================================================

#[test]
fn determinism_same_inputs_same_canonical_export() {
    let run = || {
        let mut e = engine("A");
        e.apply(a1_create(), 1000).unwrap();
        e.apply(
            Operation::update(
                "a2",
                "r1",
                "todos",
                json!({"title": "y"}),
                1,
                2000,
                HybridClock::at("A", 2),
            ),
            2000,
        )
        .unwrap();
        e.reconcile(
            vec![
                Operation::create(
                    "b1",
                    "r2",
                    "todos",
                    json!({"title": "other"}),
                    1500,
                    HybridClock::at("B", 1),
                ),
                Operation::update(
                    "b3",
                    "r1",
                    "todos",
                    json!({"title": "B-wins"}),
                    1,
                    2500,
                    HybridClock::at("B", 9),
                ),
            ],
            MergeStrategy::ClockWins,
        );
        e.export().to_json().unwrap()
    };

    assert_eq!(run(), run());
}

#[test]
fn convergence_observers_agree_regardless_of_batch_order() {
    // Two fresh observers receive the same multiset of operations, in
    // different orders and groupings. Their record maps must be byte-equal.
    let ops = vec![
        Operation::create(
            "c1",
            "r1",
            "todos",
            json!({"title": "one"}),
            1000,
            HybridClock::at("A", 1),
        ),
        Operation::update(
            "u2",
            "r1",
            "todos",
            json!({"title": "two"}),
            1,
            2000,
            HybridClock::at("B", 4),
        ),
        Operation::create(
            "c3",
            "r2",
            "todos",
            json!({"title": "three"}),
            1500,
            HybridClock::at("B", 2),
        ),
        Operation::delete("d4", "r2", "todos", 1, 2500, HybridClock::at("A", 6)),
    ];

    let mut c = engine("C");
    c.reconcile(ops.clone(), MergeStrategy::ClockWins);

    // Same multiset, shuffled and split into two pulls.
    let mut d = engine("D");
    d.reconcile(
        vec![ops[2].clone(), ops[0].clone()],
        MergeStrategy::ClockWins,
    );
    d.reconcile(
        vec![ops[3].clone(), ops[1].clone()],
        MergeStrategy::ClockWins,
    );

    assert_eq!(
        serde_json::to_string(&c.export().records).unwrap(),
        serde_json::to_string(&d.export().records).unwrap()
    );
}

#[test]
fn convergence_authoring_replicas_agree_on_content() {
    // A and B author concurrent updates and exchange them. Versions, clocks,
    // payloads, and tombstones must agree on both sides.
    let create = a1_create();

    let mut a = engine("A");
    a.apply(create.clone(), 1000).unwrap();
    let u_a = Operation::update(
        "ua",
        "r1",
        "todos",
        json!({"title": "from A"}),
        1,
        2000,
        HybridClock::at("A", 2),
    );
    a.apply(u_a.clone(), 2000).unwrap();

    let mut b = engine("B");
    b.reconcile(vec![create.clone()], MergeStrategy::ClockWins);
    let u_b = Operation::update(
        "ub",
        "r1",
        "todos",
        json!({"title": "from B"}),
        1,
        2100,
        HybridClock::at("B", 7),
    );
    b.apply(u_b.clone(), 2100).unwrap();

    // Exchange.
    a.reconcile(vec![u_b], MergeStrategy::ClockWins);
    b.reconcile(vec![create, u_a], MergeStrategy::ClockWins);

    let ra = a.get("todos", "r1").unwrap();
    let rb = b.get("todos", "r1").unwrap();
    assert_eq!(ra.payload, rb.payload);
    assert_eq!(ra.version, rb.version);
    assert_eq!(ra.deleted, rb.deleted);
    assert_eq!(ra.metadata.clock, rb.metadata.clock);
    assert_eq!(ra.metadata.updated_at, rb.metadata.updated_at);
    assert_eq!(ra.payload, json!({"title": "from B"}));
}

#[test]
fn reconcile_is_idempotent() {
    let batch = vec![
        Operation::create(
            "c1",
            "r1",
            "todos",
            json!({"title": "one"}),
            1000,
            HybridClock::at("B", 1),
        ),
        Operation::update(
            "u2",
            "r1",
            "todos",
            json!({"title": "two"}),
            1,
            2000,
            HybridClock::at("B", 2),
        ),
    ];

    let mut e = engine("A");
    e.reconcile(batch.clone(), MergeStrategy::ClockWins);
    let once = e.export().to_json().unwrap();

    let second = e.reconcile(batch, MergeStrategy::ClockWins);
    assert!(second.applied_remote.is_empty());
    assert!(second.conflicts.is_empty());
    assert!(second
        .rejected_remote
        .iter()
        .all(|r| r.reason == RejectReason::Duplicate));
    assert_eq!(e.export().to_json().unwrap(), once);
}

#[test]
fn snapshot_roundtrip_preserves_canonical_state() {
    let mut e = engine("A");
    e.apply(a1_create(), 1000).unwrap();
    e.apply(
        Operation::delete("d1", "r1", "todos", 1, 2000, HybridClock::at("A", 2)),
        2000,
    )
    .unwrap();
    e.reconcile(
        vec![Operation::create(
            "b1",
            "r2",
            "todos",
            json!({"title": "b"}),
            1500,
            HybridClock::at("B", 1),
        )],
        MergeStrategy::ClockWins,
    );

    let exported = e.export();
    let mut restored = engine("A");
    restored.import(exported.clone()).unwrap();

    assert_eq!(
        restored.export().to_json().unwrap(),
        exported.to_json().unwrap()
    );
}

#[test]
fn pending_ops_are_subsumed_by_record_clocks() {
    let mut e = engine("A");
    e.apply(a1_create(), 1000).unwrap();
    e.apply(
        Operation::update(
            "a2",
            "r1",
            "todos",
            json!({"title": "y"}),
            1,
            2000,
            HybridClock::at("A", 2),
        ),
        2000,
    )
    .unwrap();
    e.reconcile(
        vec![Operation::create(
            "b1",
            "r2",
            "todos",
            json!({"title": "b"}),
            1500,
            HybridClock::at("B", 9),
        )],
        MergeStrategy::ClockWins,
    );

    for entry in e.pending_entries() {
        let op = &entry.operation;
        let record = e.get(op.collection(), op.record_id()).unwrap();
        assert!(
            record.metadata.clock >= *op.clock(),
            "record clock must dominate every pending op"
        );
    }
}

#[test]
fn versions_never_decrease() {
    let mut e = engine("A");
    let mut last_version = 0;

    e.apply(a1_create(), 1000).unwrap();
    let observe = |e: &Engine, last: &mut u64| {
        let v = e.get("todos", "r1").unwrap().version;
        assert!(v >= *last);
        *last = v;
    };
    observe(&e, &mut last_version);

    e.apply(
        Operation::update(
            "a2",
            "r1",
            "todos",
            json!({"title": "y"}),
            1,
            2000,
            HybridClock::at("A", 2),
        ),
        2000,
    )
    .unwrap();
    observe(&e, &mut last_version);

    // A stale remote leaves the version alone.
    e.reconcile(
        vec![Operation::update(
            "b1",
            "r1",
            "todos",
            json!({"title": "late"}),
            1,
            1500,
            HybridClock::at("B", 1),
        )],
        MergeStrategy::ClockWins,
    );
    observe(&e, &mut last_version);

    // A winning remote never rolls it back.
    e.reconcile(
        vec![Operation::update(
            "b2",
            "r1",
            "todos",
            json!({"title": "ahead"}),
            2,
            3000,
            HybridClock::at("B", 9),
        )],
        MergeStrategy::ClockWins,
    );
    observe(&e, &mut last_version);
}
