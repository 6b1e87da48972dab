mod common;

use docstore::index::Order;
use docstore::schema::{DbSchema, IndexSchema, StoreSchema};
use docstore::{Database, EngineConfig};
use docstore::keypath::KeyPath;
use serde_json::json;

#[test]
fn adding_backfilled_index_across_reopen_is_queryable() {
    common::init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.sqlite3");

    {
        let db = Database::open(
            &path,
            DbSchema {
                version: 1,
                last_usable_version: None,
                stores: vec![StoreSchema::new("widgets", KeyPath::single("id"))],
            },
            EngineConfig::for_sqlite(),
        )
        .unwrap();
        let tx = db.write_transaction("widgets").unwrap();
        tx.put(
            "widgets",
            &[json!({"id": "a", "v": 1}), json!({"id": "b", "v": 2}), json!({"id": "c", "v": 3})],
        )
        .unwrap();
        tx.commit().unwrap();
    }

    let v2 = DbSchema {
        version: 2,
        last_usable_version: None,
        stores: vec![StoreSchema::new("widgets", KeyPath::single("id"))
            .with_index(IndexSchema::new("by_v", KeyPath::single("v")))],
    };
    let db = Database::open(&path, v2, EngineConfig::for_sqlite()).unwrap();
    let tx = db.read_transaction("widgets").unwrap();
    assert_eq!(tx.count_all("widgets", Some("by_v")).unwrap(), 3);
    let rows = tx.get_all("widgets", Some("by_v"), Order::Forward, None, None).unwrap();
    assert_eq!(rows.len(), 3);
}

#[test]
fn do_not_backfill_index_starts_empty_then_fills_on_write() {
    common::init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.sqlite3");

    {
        let db = Database::open(
            &path,
            DbSchema {
                version: 1,
                last_usable_version: None,
                stores: vec![StoreSchema::new("widgets", KeyPath::single("id"))],
            },
            EngineConfig::for_sqlite(),
        )
        .unwrap();
        let tx = db.write_transaction("widgets").unwrap();
        tx.put("widgets", &[json!({"id": "a", "v": 1})]).unwrap();
        tx.commit().unwrap();
    }

    let v2 = DbSchema {
        version: 2,
        last_usable_version: None,
        stores: vec![StoreSchema::new("widgets", KeyPath::single("id"))
            .with_index(IndexSchema::new("by_v", KeyPath::single("v")).do_not_backfill())],
    };
    let db = Database::open(&path, v2, EngineConfig::for_sqlite()).unwrap();
    let tx = db.write_transaction("widgets").unwrap();
    assert_eq!(tx.count_all("widgets", Some("by_v")).unwrap(), 0);
    tx.put("widgets", &[json!({"id": "b", "v": 2})]).unwrap();
    assert_eq!(tx.count_all("widgets", Some("by_v")).unwrap(), 1);
    tx.commit().unwrap();
}

#[test]
fn reopen_with_unchanged_schema_is_noop() {
    common::init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.sqlite3");
    let schema = common::widgets_schema(1);

    {
        let db = Database::open(&path, schema.clone(), EngineConfig::for_sqlite()).unwrap();
        let tx = db.write_transaction("widgets").unwrap();
        tx.put("widgets", &[json!({"id": "a", "v": 1})]).unwrap();
        tx.commit().unwrap();
    }

    // Reopening twice more with the identical schema, including once with
    // wipe_if_exists set, must never discard the row: a matching version
    // never forces a wipe.
    for wipe in [false, true] {
        let db = Database::open(&path, schema.clone(), EngineConfig::for_sqlite().with_wipe_if_exists(wipe)).unwrap();
        let tx = db.read_transaction("widgets").unwrap();
        assert_eq!(tx.get("widgets", &json!("a")).unwrap(), Some(json!({"id": "a", "v": 1})));
    }
}

#[test]
fn persisted_version_below_last_usable_forces_wipe() {
    common::init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.sqlite3");

    {
        let db = Database::open(&path, common::widgets_schema(1), EngineConfig::for_sqlite()).unwrap();
        let tx = db.write_transaction("widgets").unwrap();
        tx.put("widgets", &[json!({"id": "a", "v": 1})]).unwrap();
        tx.commit().unwrap();
    }

    let v2 = DbSchema {
        version: 2,
        last_usable_version: Some(2),
        stores: common::widgets_schema(2).stores,
    };
    let db = Database::open(&path, v2, EngineConfig::for_sqlite()).unwrap();
    let tx = db.read_transaction("widgets").unwrap();
    assert_eq!(tx.get("widgets", &json!("a")).unwrap(), None);
}

#[test]
fn newer_persisted_version_without_wipe_retries_once_then_succeeds() {
    common::init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.sqlite3");

    {
        let db = Database::open(&path, common::widgets_schema(5), EngineConfig::for_sqlite()).unwrap();
        let tx = db.write_transaction("widgets").unwrap();
        tx.put("widgets", &[json!({"id": "a", "v": 1})]).unwrap();
        tx.commit().unwrap();
    }

    // Opening with an older target version and wipe_if_exists left false:
    // the first attempt hits IncompatibleSchema internally, but `open`
    // automatically retries once with a forced wipe rather than failing.
    let db = Database::open(&path, common::widgets_schema(1), EngineConfig::for_sqlite()).unwrap();
    let tx = db.read_transaction("widgets").unwrap();
    assert_eq!(tx.get("widgets", &json!("a")).unwrap(), None);
    assert_eq!(db.schema().version, 1);
}
