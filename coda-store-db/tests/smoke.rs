// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Smoke tests for coda-store-db.
//!
//! These tests verify the schema and the query surface the collector
//! depends on, using an in-memory database.

use std::collections::BTreeSet;

use coda_store_db::{Error, RegisterPathParams, StoreDb};

fn make_path(hash: &str, name: &str) -> String {
    format!("/nix/store/{hash}-{name}")
}

fn register(db: &mut StoreDb, path: &str, references: &[&str]) -> i64 {
    let params = RegisterPathParams {
        path: path.to_owned(),
        hash: "sha256:".to_string() + &"0".repeat(64),
        nar_size: Some(1024),
        references: references.iter().map(|r| r.to_string()).collect(),
        ..Default::default()
    };
    db.register_valid_path(&params).unwrap()
}

/// Verify schema creation and empty queries work.
#[test]
fn test_schema_creation() {
    let db = StoreDb::open_memory().unwrap();
    assert!(db.has_schema().unwrap());
    assert!(!db.is_valid_path("/nix/store/nope").unwrap());
}

/// Verify path registration and query roundtrip.
#[test]
fn test_path_roundtrip() {
    let mut db = StoreDb::open_memory().unwrap();

    let path = make_path(&"a".repeat(32), "hello");
    register(&mut db, &path, &[]);

    assert!(db.is_valid_path(&path).unwrap());
    let info = db.query_path_info(&path).unwrap().unwrap();
    assert_eq!(info.path, path);
    assert_eq!(info.nar_size, Some(1024));
    assert!(info.references.is_empty());
}

/// References show up in both directions.
#[test]
fn test_references_and_referrers() {
    let mut db = StoreDb::open_memory().unwrap();

    let dep = make_path(&"b".repeat(32), "dep");
    let app = make_path(&"c".repeat(32), "app");
    register(&mut db, &dep, &[]);
    register(&mut db, &app, &[&dep]);

    assert_eq!(
        db.query_references(&app).unwrap(),
        BTreeSet::from([dep.clone()])
    );
    assert_eq!(
        db.query_referrers(&dep).unwrap(),
        BTreeSet::from([app.clone()])
    );
    assert!(db.query_referrers(&app).unwrap().is_empty());
}

/// Derivation outputs and the inverse valid-derivers query.
#[test]
fn test_derivation_outputs() {
    let mut db = StoreDb::open_memory().unwrap();

    let drv = make_path(&"d".repeat(32), "hello.drv");
    let out = make_path(&"e".repeat(32), "hello");
    register(&mut db, &drv, &[]);
    register(&mut db, &out, &[]);
    db.register_derivation_output(&drv, "out", &out).unwrap();

    assert_eq!(
        db.query_derivation_outputs(&drv).unwrap(),
        BTreeSet::from([out.clone()])
    );
    assert_eq!(
        db.query_valid_derivers(&out).unwrap(),
        BTreeSet::from([drv.clone()])
    );
}

/// Invalidation refuses while a referrer is valid and succeeds once the
/// referrer is gone.
#[test]
fn test_invalidate_checked() {
    let mut db = StoreDb::open_memory().unwrap();

    let dep = make_path(&"f".repeat(32), "dep");
    let app = make_path(&"g".repeat(32), "app");
    register(&mut db, &dep, &[]);
    register(&mut db, &app, &[&dep]);

    match db.invalidate_path_checked(&dep) {
        Err(Error::PathInUse { referrers, .. }) => assert_eq!(referrers, vec![app.clone()]),
        other => panic!("expected PathInUse, got {other:?}"),
    }
    assert!(db.is_valid_path(&dep).unwrap());

    db.invalidate_path_checked(&app).unwrap();
    db.invalidate_path_checked(&dep).unwrap();
    assert!(!db.is_valid_path(&dep).unwrap());
}

/// A self-referencing path can still be invalidated.
#[test]
fn test_invalidate_self_reference() {
    let mut db = StoreDb::open_memory().unwrap();

    let path = make_path(&"h".repeat(32), "selfref");
    register(&mut db, &path, &[]);
    db.add_reference(&path, &path).unwrap();

    db.invalidate_path_checked(&path).unwrap();
    assert!(!db.is_valid_path(&path).unwrap());
}

/// Topological sort puts referrers before the paths they reference.
#[test]
fn test_topo_sort() {
    let mut db = StoreDb::open_memory().unwrap();

    let base = make_path(&"i".repeat(32), "base");
    let lib = make_path(&"j".repeat(32), "lib");
    let app = make_path(&"k".repeat(32), "app");
    register(&mut db, &base, &[]);
    register(&mut db, &lib, &[&base]);
    register(&mut db, &app, &[&lib]);

    let set: BTreeSet<String> = [&base, &lib, &app].iter().map(|s| s.to_string()).collect();
    let sorted = db.topo_sort_paths(&set).unwrap();

    let pos = |p: &str| sorted.iter().position(|s| s == p).unwrap();
    assert!(pos(&app) < pos(&lib));
    assert!(pos(&lib) < pos(&base));
}
