//! End-to-end reconciliation scenarios over two sources of one entity.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;

use accord_core::{
    AdapterSpec, Catalog, Document, EntitySpec, EntityTag, ForeignKey, InternalKey, SourceSpec,
    SourceTag,
};
use accord_engine::{ChangeNotice, DispatchOutcome, Dispatcher, Operation, Outcome};
use accord_store::{MemoryStore, SqliteStore, Store};

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Fixture {
    root_a: TempDir,
    root_b: TempDir,
    store: Arc<dyn Store>,
    dispatcher: Dispatcher,
}

fn dir_catalog(root_a: &TempDir, root_b: &TempDir) -> Catalog {
    let now = Utc::now();
    Catalog {
        version: 1,
        entities: vec![EntitySpec {
            tag: EntityTag::from("user"),
            sources: vec![
                SourceSpec {
                    tag: SourceTag::from("a"),
                    adapter: AdapterSpec::Directory {
                        root: root_a.path().to_path_buf(),
                    },
                },
                SourceSpec {
                    tag: SourceTag::from("b"),
                    adapter: AdapterSpec::Directory {
                        root: root_b.path().to_path_buf(),
                    },
                },
            ],
        }],
        created_at: now,
        updated_at: now,
    }
}

fn fixture_with(store: Arc<dyn Store>) -> Fixture {
    let root_a = TempDir::new().expect("root a");
    let root_b = TempDir::new().expect("root b");
    let catalog = dir_catalog(&root_a, &root_b);
    let dispatcher = Dispatcher::new(&catalog, store.clone()).expect("dispatcher");
    Fixture {
        root_a,
        root_b,
        store,
        dispatcher,
    }
}

fn fixture() -> Fixture {
    fixture_with(Arc::new(MemoryStore::new()))
}

fn write_record(root: &Path, id: &str, value: &Value) {
    std::fs::write(
        root.join(format!("{id}.json")),
        serde_json::to_string_pretty(value).expect("serialize"),
    )
    .expect("write record");
}

fn read_record(root: &Path, id: &str) -> Value {
    let contents = std::fs::read_to_string(root.join(format!("{id}.json"))).expect("read record");
    serde_json::from_str(&contents).expect("parse record")
}

fn record_count(root: &Path) -> usize {
    std::fs::read_dir(root).expect("read dir").count()
}

fn notice(source: &str, key: &str) -> ChangeNotice {
    ChangeNotice {
        entity: "user".to_string(),
        source: source.to_string(),
        key: key.to_string(),
    }
}

/// Register an existing record: internal key, both foreign keys, baseline.
fn seed_record(fixture: &Fixture, fk_a: &str, fk_b: &str, baseline: &Value) -> InternalKey {
    let key = fixture
        .store
        .create_internal_key(&EntityTag::from("user"))
        .expect("create key");
    fixture
        .store
        .record_foreign_key(&key, &ForeignKey::new("user", "a", fk_a))
        .expect("fk a");
    fixture
        .store
        .record_foreign_key(&key, &ForeignKey::new("user", "b", fk_b))
        .expect("fk b");
    fixture
        .store
        .record_initial_document(&key, &Document::new(baseline.clone()))
        .expect("baseline");
    key
}

fn handled(outcome: DispatchOutcome) -> Outcome {
    match outcome {
        DispatchOutcome::Handled(outcome) => outcome,
        DispatchOutcome::Ignored { reason } => panic!("notice was ignored: {reason}"),
    }
}

// ---------------------------------------------------------------------------
// Scenario 1 — create path
// ---------------------------------------------------------------------------

#[test]
fn create_registers_the_record_and_broadcasts_to_every_source() {
    let fixture = fixture();
    write_record(fixture.root_a.path(), "u-1", &json!({"name": "Hubert"}));

    let outcome = handled(
        fixture
            .dispatcher
            .dispatch(&notice("a", "u-1"))
            .expect("dispatch"),
    );
    let key = match outcome {
        Outcome::Created { key, failures } => {
            assert!(failures.is_empty(), "both writes must succeed");
            key
        }
        other => panic!("expected create, got {other:?}"),
    };

    // One internal key, mapped from both sources.
    assert_eq!(
        fixture
            .store
            .lookup_internal_key(&ForeignKey::new("user", "a", "u-1"))
            .expect("lookup"),
        Some(key.clone())
    );
    let fk_b = fixture
        .store
        .lookup_foreign_key(&key, &SourceTag::from("b"))
        .expect("lookup")
        .expect("fk for b recorded");

    // Both sources hold the document; the baseline matches it.
    assert_eq!(
        read_record(fixture.root_a.path(), "u-1"),
        json!({"name": "Hubert"})
    );
    assert_eq!(
        read_record(fixture.root_b.path(), &fk_b.id),
        json!({"name": "Hubert"})
    );
    assert_eq!(
        fixture
            .store
            .lookup_initial_document(&key)
            .expect("lookup")
            .expect("baseline"),
        Document::new(json!({"name": "Hubert"}))
    );
    assert!(fixture.store.notifications().expect("notifications").is_empty());
}

// ---------------------------------------------------------------------------
// Scenario 2 — unknown-key error path
// ---------------------------------------------------------------------------

#[test]
fn unknown_key_with_no_document_is_a_problem_without_mutation() {
    let fixture = fixture();

    let outcome = handled(
        fixture
            .dispatcher
            .dispatch(&notice("a", "999"))
            .expect("dispatch"),
    );
    assert!(
        matches!(outcome, Outcome::Problem { ref fk, .. } if fk.id == "999"),
        "expected problem, got {outcome:?}"
    );

    assert_eq!(
        fixture
            .store
            .lookup_internal_key(&ForeignKey::new("user", "a", "999"))
            .expect("lookup"),
        None
    );
    assert!(fixture.store.notifications().expect("notifications").is_empty());
    assert_eq!(record_count(fixture.root_a.path()), 0);
    assert_eq!(record_count(fixture.root_b.path()), 0);
}

// ---------------------------------------------------------------------------
// Scenario 3 — convergent update
// ---------------------------------------------------------------------------

#[test]
fn convergent_update_propagates_and_advances_the_baseline() {
    let fixture = fixture();
    let key = seed_record(&fixture, "u-1", "b-1", &json!({}));
    write_record(fixture.root_a.path(), "u-1", &json!({"address": "123 Pony"}));
    write_record(fixture.root_b.path(), "b-1", &json!({}));

    let outcome = handled(
        fixture
            .dispatcher
            .dispatch(&notice("a", "u-1"))
            .expect("dispatch"),
    );
    match outcome {
        Outcome::Updated {
            conflicts,
            ref failures,
            ..
        } => {
            assert_eq!(conflicts, 0);
            assert!(failures.is_empty());
        }
        other => panic!("expected update, got {other:?}"),
    }

    assert_eq!(
        read_record(fixture.root_a.path(), "u-1"),
        json!({"address": "123 Pony"})
    );
    assert_eq!(
        read_record(fixture.root_b.path(), "b-1"),
        json!({"address": "123 Pony"})
    );

    let diffs = fixture.store.diffs(&key).expect("diffs");
    assert_eq!(diffs.len(), 1);
    assert!(!diffs[0].is_conflict);
    assert_eq!(
        fixture
            .store
            .lookup_initial_document(&key)
            .expect("lookup")
            .expect("baseline"),
        Document::new(json!({"address": "123 Pony"}))
    );
    assert!(fixture.store.notifications().expect("notifications").is_empty());
}

// ---------------------------------------------------------------------------
// Scenario 4 — conflicting update
// ---------------------------------------------------------------------------

#[test]
fn conflicting_update_fragments_both_sides_and_notifies() {
    let fixture = fixture();
    let key = seed_record(&fixture, "u-1", "b-1", &json!({}));
    write_record(fixture.root_a.path(), "u-1", &json!({"name": "X"}));
    write_record(fixture.root_b.path(), "b-1", &json!({"name": "Y"}));

    let outcome = handled(
        fixture
            .dispatcher
            .dispatch(&notice("a", "u-1"))
            .expect("dispatch"),
    );
    match outcome {
        Outcome::Updated { conflicts, .. } => assert_eq!(conflicts, 2),
        other => panic!("expected update, got {other:?}"),
    }

    // Sources keep their own sides of the conflict.
    assert_eq!(read_record(fixture.root_a.path(), "u-1"), json!({"name": "X"}));
    assert_eq!(read_record(fixture.root_b.path(), "b-1"), json!({"name": "Y"}));

    // Empty merged diff, one fragment per source, one notification.
    let diffs = fixture.store.diffs(&key).expect("diffs");
    assert_eq!(diffs.len(), 3);
    let merged = diffs.iter().find(|d| !d.is_conflict).expect("merged row");
    assert!(merged.diff.is_empty());
    let origins: Vec<_> = diffs
        .iter()
        .filter(|d| d.is_conflict)
        .map(|d| d.origin)
        .collect();
    assert_eq!(origins, vec![Some(0), Some(1)]);

    let notifications = fixture.store.notifications().expect("notifications");
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].key, key);
    assert_eq!(notifications[0].diff_id, merged.id);

    // The baseline did not move at the conflicting path.
    assert_eq!(
        fixture
            .store
            .lookup_initial_document(&key)
            .expect("lookup")
            .expect("baseline"),
        Document::new(json!({}))
    );
}

// ---------------------------------------------------------------------------
// Scenario 5 — delete path
// ---------------------------------------------------------------------------

#[test]
fn delete_removes_the_record_everywhere() {
    let fixture = fixture();
    let key = seed_record(&fixture, "u-1", "b-1", &json!({"name": "H"}));
    write_record(fixture.root_b.path(), "b-1", &json!({"name": "H"}));
    // The origin copy is already gone; only the notice remains.

    let outcome = handled(
        fixture
            .dispatcher
            .dispatch(&notice("a", "u-1"))
            .expect("dispatch"),
    );
    match outcome {
        Outcome::Deleted {
            removed_rows,
            ref failures,
            ..
        } => {
            assert!(failures.is_empty());
            assert!(removed_rows > 0);
        }
        other => panic!("expected delete, got {other:?}"),
    }

    assert_eq!(record_count(fixture.root_b.path()), 0, "b-side delete ran");
    assert_eq!(
        fixture
            .store
            .lookup_internal_key(&ForeignKey::new("user", "a", "u-1"))
            .expect("lookup"),
        None
    );
    assert_eq!(
        fixture.store.lookup_initial_document(&key).expect("lookup"),
        None
    );
    assert!(fixture.store.diffs(&key).expect("diffs").is_empty());
    assert!(fixture.store.notifications().expect("notifications").is_empty());
    assert_eq!(
        fixture.store.delete_internal_key(&key).expect("redelete"),
        0,
        "no table still references the key"
    );
}

// ---------------------------------------------------------------------------
// Scenario 6 — partial adapter failure on create
// ---------------------------------------------------------------------------

#[test]
fn create_succeeds_with_a_failing_source_reported() {
    let root_a = TempDir::new().expect("root a");
    let now = Utc::now();
    let catalog = Catalog {
        version: 1,
        entities: vec![EntitySpec {
            tag: EntityTag::from("user"),
            sources: vec![
                SourceSpec {
                    tag: SourceTag::from("a"),
                    adapter: AdapterSpec::Directory {
                        root: root_a.path().to_path_buf(),
                    },
                },
                SourceSpec {
                    tag: SourceTag::from("b"),
                    adapter: AdapterSpec::Command {
                        get: vec!["false".into()],
                        set: vec!["false".into()],
                        delete: vec!["false".into()],
                    },
                },
            ],
        }],
        created_at: now,
        updated_at: now,
    };
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let dispatcher = Dispatcher::new(&catalog, store.clone()).expect("dispatcher");

    write_record(root_a.path(), "u-1", &json!({"name": "Hubert"}));
    let outcome = handled(dispatcher.dispatch(&notice("a", "u-1")).expect("dispatch"));

    let key = match outcome {
        Outcome::Created { key, failures } => {
            assert_eq!(failures.len(), 1, "b's write failure is reported");
            assert_eq!(failures[0].source, SourceTag::from("b"));
            key
        }
        other => panic!("expected create, got {other:?}"),
    };

    assert!(fixture_lookup(&store, "a", "u-1").is_some());
    assert_eq!(
        store
            .lookup_foreign_key(&key, &SourceTag::from("b"))
            .expect("lookup"),
        None,
        "no foreign key is recorded for the failed source"
    );
    assert!(
        store
            .lookup_initial_document(&key)
            .expect("lookup")
            .is_some(),
        "baseline recorded despite the partial failure"
    );
}

fn fixture_lookup(store: &Arc<dyn Store>, source: &str, id: &str) -> Option<InternalKey> {
    store
        .lookup_internal_key(&ForeignKey::new("user", source, id))
        .expect("lookup")
}

// ---------------------------------------------------------------------------
// Determination table
// ---------------------------------------------------------------------------

#[test]
fn determination_follows_the_decision_table() {
    let fixture = fixture();
    let engine = fixture
        .dispatcher
        .engine(&EntityTag::from("user"))
        .expect("engine");

    // Unknown key, no document → problem.
    let op = engine
        .determine(&ForeignKey::new("user", "a", "ghost"))
        .expect("determine");
    assert!(matches!(op, Operation::Problem { .. }));

    // Unknown key, document present → create.
    write_record(fixture.root_a.path(), "fresh", &json!({"name": "N"}));
    let op = engine
        .determine(&ForeignKey::new("user", "a", "fresh"))
        .expect("determine");
    assert!(matches!(op, Operation::Create { .. }));

    // Known key, document present → update.
    let key = seed_record(&fixture, "u-1", "b-1", &json!({}));
    write_record(fixture.root_a.path(), "u-1", &json!({"name": "N"}));
    let op = engine
        .determine(&ForeignKey::new("user", "a", "u-1"))
        .expect("determine");
    assert!(matches!(op, Operation::Update { key: ref k } if k == &key));

    // Known key, document gone → delete.
    std::fs::remove_file(fixture.root_a.path().join("u-1.json")).expect("remove");
    let op = engine
        .determine(&ForeignKey::new("user", "a", "u-1"))
        .expect("determine");
    assert!(matches!(op, Operation::Delete { key: ref k } if k == &key));
}

// ---------------------------------------------------------------------------
// Update resilience
// ---------------------------------------------------------------------------

#[test]
fn update_restores_a_source_that_lost_its_document() {
    let fixture = fixture();
    seed_record(&fixture, "u-1", "b-1", &json!({"name": "H"}));
    write_record(
        fixture.root_a.path(),
        "u-1",
        &json!({"name": "H", "address": "123 Pony"}),
    );
    // b's copy is missing even though its mapping exists.

    let outcome = handled(
        fixture
            .dispatcher
            .dispatch(&notice("a", "u-1"))
            .expect("dispatch"),
    );
    match outcome {
        Outcome::Updated {
            conflicts,
            ref failures,
            ..
        } => {
            assert_eq!(conflicts, 0);
            assert_eq!(failures.len(), 1, "b's read failure is reported");
            assert_eq!(failures[0].source, SourceTag::from("b"));
        }
        other => panic!("expected update, got {other:?}"),
    }

    // b was rebuilt from the baseline plus the unanimous diff.
    assert_eq!(
        read_record(fixture.root_b.path(), "b-1"),
        json!({"name": "H", "address": "123 Pony"})
    );
}

#[test]
fn update_without_baseline_synthesises_one_and_proceeds() {
    let fixture = fixture();
    // A record registered before baselining existed: mappings but no baseline.
    let key = fixture
        .store
        .create_internal_key(&EntityTag::from("user"))
        .expect("create key");
    fixture
        .store
        .record_foreign_key(&key, &ForeignKey::new("user", "a", "u-1"))
        .expect("fk a");
    fixture
        .store
        .record_foreign_key(&key, &ForeignKey::new("user", "b", "b-1"))
        .expect("fk b");
    write_record(fixture.root_a.path(), "u-1", &json!({"name": "H"}));
    write_record(fixture.root_b.path(), "b-1", &json!({"name": "H"}));

    let outcome = handled(
        fixture
            .dispatcher
            .dispatch(&notice("a", "u-1"))
            .expect("dispatch"),
    );
    match outcome {
        Outcome::Updated { conflicts, .. } => assert_eq!(conflicts, 0),
        other => panic!("expected update, got {other:?}"),
    }

    // The synthesised union of identical copies is the copy itself, so the
    // baseline lands there without any diff to apply.
    assert_eq!(
        fixture
            .store
            .lookup_initial_document(&key)
            .expect("lookup")
            .expect("baseline"),
        Document::new(json!({"name": "H"}))
    );
}

// ---------------------------------------------------------------------------
// Dispatch edge cases
// ---------------------------------------------------------------------------

#[test]
fn notices_with_unknown_tags_are_ignored_successfully() {
    let fixture = fixture();

    let outcome = fixture
        .dispatcher
        .dispatch(&ChangeNotice {
            entity: "ghost".to_string(),
            source: "a".to_string(),
            key: "1".to_string(),
        })
        .expect("dispatch must succeed");
    assert!(
        matches!(outcome, DispatchOutcome::Ignored { ref reason } if reason.contains("unknown entity"))
    );

    let outcome = fixture
        .dispatcher
        .dispatch(&ChangeNotice {
            entity: "user".to_string(),
            source: "ghost".to_string(),
            key: "1".to_string(),
        })
        .expect("dispatch must succeed");
    assert!(
        matches!(outcome, DispatchOutcome::Ignored { ref reason } if reason.contains("unknown source"))
    );
}

// ---------------------------------------------------------------------------
// SQLite-backed end-to-end
// ---------------------------------------------------------------------------

#[test]
fn full_cycle_against_the_sqlite_store() {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().expect("sqlite"));
    let fixture = fixture_with(store);

    write_record(fixture.root_a.path(), "u-1", &json!({"name": "Hubert"}));
    let created = handled(
        fixture
            .dispatcher
            .dispatch(&notice("a", "u-1"))
            .expect("create"),
    );
    let key = match created {
        Outcome::Created { key, .. } => key,
        other => panic!("expected create, got {other:?}"),
    };

    write_record(
        fixture.root_a.path(),
        "u-1",
        &json!({"name": "Hubert", "address": "123 Pony"}),
    );
    let updated = handled(
        fixture
            .dispatcher
            .dispatch(&notice("a", "u-1"))
            .expect("update"),
    );
    assert!(matches!(updated, Outcome::Updated { conflicts: 0, .. }));

    let fk_b = fixture
        .store
        .lookup_foreign_key(&key, &SourceTag::from("b"))
        .expect("lookup")
        .expect("fk b");
    assert_eq!(
        read_record(fixture.root_b.path(), &fk_b.id),
        json!({"name": "Hubert", "address": "123 Pony"})
    );

    std::fs::remove_file(fixture.root_a.path().join("u-1.json")).expect("remove");
    let deleted = handled(
        fixture
            .dispatcher
            .dispatch(&notice("a", "u-1"))
            .expect("delete"),
    );
    assert!(matches!(deleted, Outcome::Deleted { .. }));
    assert_eq!(record_count(fixture.root_b.path()), 0);
}
