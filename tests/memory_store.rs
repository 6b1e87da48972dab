mod common;

use docstore::index::{Order, Resolution};
use docstore::{EngineConfig, MemoryDatabase};
use serde_json::json;

#[test]
fn simple_round_trip() {
    common::init_test_logging();
    let db = MemoryDatabase::open(common::widgets_schema(1), EngineConfig::for_memory()).unwrap();

    let tx = db.write_transaction("widgets").unwrap();
    tx.put("widgets", &[json!({"id": "w1", "v": 5})]).unwrap();
    tx.commit().unwrap();

    let tx = db.read_transaction("widgets").unwrap();
    assert_eq!(tx.get("widgets", &json!("w1")).unwrap(), Some(json!({"id": "w1", "v": 5})));
}

#[test]
fn compound_key_and_multi_entry_index() {
    common::init_test_logging();
    let db = MemoryDatabase::open(common::docs_schema(1), EngineConfig::for_memory()).unwrap();

    let tx = db.write_transaction("docs").unwrap();
    tx.put(
        "docs",
        &[
            json!({"tenant": "acme", "id": "d1", "tags": ["red", "blue"], "body": "a fox"}),
            json!({"tenant": "acme", "id": "d2", "tags": ["blue"], "body": "a hound"}),
        ],
    )
    .unwrap();
    tx.commit().unwrap();

    let tx = db.read_transaction("docs").unwrap();
    assert!(tx.get("docs", &json!(["acme", "d1"])).unwrap().is_some());
    let blue = tx
        .get_only("docs", Some("tags"), &json!("blue"), Order::Forward, None, None)
        .unwrap();
    assert_eq!(blue.len(), 2);
}

#[test]
fn full_text_search_matches_token_prefix() {
    common::init_test_logging();
    let db = MemoryDatabase::open(common::docs_schema(1), EngineConfig::for_memory()).unwrap();

    let tx = db.write_transaction("docs").unwrap();
    tx.put(
        "docs",
        &[json!({"tenant": "acme", "id": "d1", "tags": [], "body": "The Quick Brown Fox"})],
    )
    .unwrap();
    tx.commit().unwrap();

    let tx = db.read_transaction("docs").unwrap();
    let hits = tx
        .full_text_search("docs", "body", "quick fox", Resolution::And, None)
        .unwrap();
    assert_eq!(hits.len(), 1);
    let hits = tx.full_text_search("docs", "body", "giraffe", Resolution::Or, None).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn unique_index_rejects_duplicate_value() {
    common::init_test_logging();
    let db = MemoryDatabase::open(common::widgets_schema(1), EngineConfig::for_memory()).unwrap();

    let tx = db.write_transaction("widgets").unwrap();
    tx.put("widgets", &[json!({"id": "w1", "v": 5})]).unwrap();
    tx.put("widgets", &[json!({"id": "w2", "v": 5})]).unwrap_err();
}

#[test]
fn aborted_transaction_restores_prior_state() {
    common::init_test_logging();
    let db = MemoryDatabase::open(common::widgets_schema(1), EngineConfig::for_memory()).unwrap();

    let tx = db.write_transaction("widgets").unwrap();
    tx.put("widgets", &[json!({"id": "w1", "v": 1})]).unwrap();
    tx.commit().unwrap();

    let tx = db.write_transaction("widgets").unwrap();
    tx.put("widgets", &[json!({"id": "w2", "v": 2})]).unwrap();
    tx.abort();

    let tx = db.read_transaction("widgets").unwrap();
    assert!(tx.get("widgets", &json!("w1")).unwrap().is_some());
    assert_eq!(tx.get("widgets", &json!("w2")).unwrap(), None);
}

#[test]
fn remove_range_prunes_index_entries() {
    common::init_test_logging();
    let db = MemoryDatabase::open(common::widgets_schema(1), EngineConfig::for_memory()).unwrap();

    let tx = db.write_transaction("widgets").unwrap();
    tx.put(
        "widgets",
        &[json!({"id": "w1", "v": 1}), json!({"id": "w2", "v": 2})],
    )
    .unwrap();
    tx.commit().unwrap();

    let tx = db.write_transaction("widgets").unwrap();
    tx.remove_range("widgets", None, Some(&json!("w1")), Some(&json!("w1")), false, false)
        .unwrap();
    tx.commit().unwrap();

    let tx = db.read_transaction("widgets").unwrap();
    assert_eq!(tx.get("widgets", &json!("w1")).unwrap(), None);
    // The unique index on "v" must no longer reject reusing v=1 once w1 is gone.
    let tx = db.write_transaction("widgets").unwrap();
    tx.put("widgets", &[json!({"id": "w3", "v": 1})]).unwrap();
    tx.commit().unwrap();
}
