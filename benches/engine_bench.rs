//! Throughput benchmarks for the store/index operations over both backends.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use docstore::index::Order;
use docstore::keypath::KeyPath;
use docstore::schema::{DbSchema, IndexSchema, StoreSchema};
use docstore::{Database, EngineConfig, MemoryDatabase};
use serde_json::json;

fn schema() -> DbSchema {
    DbSchema {
        version: 1,
        last_usable_version: None,
        stores: vec![StoreSchema::new("widgets", KeyPath::single("id"))
            .with_index(IndexSchema::new("by_v", KeyPath::single("v")))],
    }
}

fn bench_sqlite_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("sqlite_put");
    for count in [100usize, 1_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("put_{count}_rows"), |b| {
            b.iter(|| {
                let db = Database::open_memory(schema(), EngineConfig::for_sqlite()).unwrap();
                let tx = db.write_transaction("widgets").unwrap();
                let items: Vec<_> = (0..count).map(|i| json!({"id": format!("k{i}"), "v": i})).collect();
                tx.put("widgets", black_box(&items)).unwrap();
                tx.commit().unwrap();
            });
        });
    }
    group.finish();
}

fn bench_sqlite_get_only(c: &mut Criterion) {
    let db = Database::open_memory(schema(), EngineConfig::for_sqlite()).unwrap();
    let tx = db.write_transaction("widgets").unwrap();
    let items: Vec<_> = (0..1_000).map(|i| json!({"id": format!("k{i}"), "v": i % 50})).collect();
    tx.put("widgets", &items).unwrap();
    tx.commit().unwrap();

    c.bench_function("sqlite_get_only_by_index", |b| {
        let tx = db.read_transaction("widgets").unwrap();
        b.iter(|| {
            tx.get_only("widgets", Some("by_v"), &json!(25), Order::Forward, None, None)
                .unwrap()
        });
    });
}

fn bench_memory_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_put");
    for count in [100usize, 1_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("put_{count}_rows"), |b| {
            b.iter(|| {
                let db = MemoryDatabase::open(schema(), EngineConfig::for_memory()).unwrap();
                let tx = db.write_transaction("widgets").unwrap();
                let items: Vec<_> = (0..count).map(|i| json!({"id": format!("k{i}"), "v": i})).collect();
                tx.put("widgets", black_box(&items)).unwrap();
                tx.commit().unwrap();
            });
        });
    }
    group.finish();
}

fn bench_memory_get_only(c: &mut Criterion) {
    let db = MemoryDatabase::open(schema(), EngineConfig::for_memory()).unwrap();
    let tx = db.write_transaction("widgets").unwrap();
    let items: Vec<_> = (0..1_000).map(|i| json!({"id": format!("k{i}"), "v": i % 50})).collect();
    tx.put("widgets", &items).unwrap();
    tx.commit().unwrap();

    c.bench_function("memory_get_only_by_index", |b| {
        let tx = db.read_transaction("widgets").unwrap();
        b.iter(|| {
            tx.get_only("widgets", Some("by_v"), &json!(25), Order::Forward, None, None)
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_sqlite_put, bench_sqlite_get_only, bench_memory_put, bench_memory_get_only);
criterion_main!(benches);
