// tests/integration_test.rs

//! Cross-module integration tests: open a file-backed store, write, close,
//! reopen, and merge two file-backed replicas — exercising the schema,
//! gate, and engine together rather than in isolation.

use driftdb::{ApplicationId, Store};

fn app() -> ApplicationId {
    ApplicationId::new("org.driftdb.tests", 1, 0)
}

#[test]
fn file_backed_round_trip_preserves_data_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replica.driftdb");

    {
        let mut store = Store::open(&path, app(), "writer", |_, _| Ok(())).unwrap();
        store.write_text("notes", "today", "hello world").unwrap();
        store.write_json("config", "limits", r#"{"max": 10}"#).unwrap();
    }

    assert!(path.exists());

    let reopened = Store::open(&path, app(), "reader", |_, _| Ok(())).unwrap();
    assert_eq!(
        reopened.read("notes", "today").unwrap().text().unwrap(),
        Some("hello world")
    );
    assert_eq!(
        reopened.read("config", "limits").unwrap().json().unwrap(),
        Some(r#"{"max": 10}"#)
    );
}

#[test]
fn file_backed_merge_carries_entries_between_replicas() {
    let dir = tempfile::tempdir().unwrap();
    let path_a = dir.path().join("a.driftdb");
    let path_b = dir.path().join("b.driftdb");

    let mut a = Store::open(&path_a, app(), "A", |_, _| Ok(())).unwrap();
    let b_result = {
        let mut b = Store::open(&path_b, app(), "B", |_, _| Ok(())).unwrap();
        b.write_text("", "shared", "from-b").unwrap();
        b
    };

    let report = a.merge(&b_result).unwrap();
    assert_eq!(report.changed, vec![("".to_string(), "shared".to_string())]);
    assert_eq!(a.read("", "shared").unwrap().text().unwrap(), Some("from-b"));
}

#[test]
fn backup_produces_an_independently_openable_copy() {
    let dir = tempfile::tempdir().unwrap();
    let original_path = dir.path().join("original.driftdb");
    let backup_path = dir.path().join("backup.driftdb");

    {
        let mut store = Store::open(&original_path, app(), "A", |_, _| Ok(())).unwrap();
        store.write_text("", "k", "v").unwrap();
        store.backup(&backup_path).unwrap();
    }

    let backup = Store::open(&backup_path, app(), "B", |_, _| Ok(())).unwrap();
    assert_eq!(backup.read("", "k").unwrap().text().unwrap(), Some("v"));
}

#[test]
fn search_text_finds_entries_across_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("searchable.driftdb");

    {
        let mut store = Store::open(&path, app(), "A", |_, _| Ok(())).unwrap();
        store.write_text("notes", "a", "the quick brown fox").unwrap();
        store.write_text("notes", "b", "lazy dog").unwrap();
    }

    let store = Store::open(&path, app(), "B", |_, _| Ok(())).unwrap();
    let hits = store.search_text("fox").unwrap();
    assert_eq!(hits, vec![("notes".to_string(), "a".to_string())]);
}
