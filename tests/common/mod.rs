#![allow(dead_code)]

use docstore::{DbSchema, IndexSchema, StoreSchema};

pub fn init_test_logging() {
    docstore::logging::init_test_logging();
}

/// A single `widgets` store keyed by `id`, with a unique `by_v` index on `v`.
pub fn widgets_schema(version: u32) -> DbSchema {
    DbSchema {
        version,
        last_usable_version: None,
        stores: vec![StoreSchema::new("widgets", docstore::keypath::KeyPath::single("id"))
            .with_index(IndexSchema::new("by_v", docstore::keypath::KeyPath::single("v")).unique())],
    }
}

/// A `docs` store keyed by a compound `(tenant, id)` path, with a multi-entry
/// `tags` index and a full-text `body` index.
pub fn docs_schema(version: u32) -> DbSchema {
    DbSchema {
        version,
        last_usable_version: None,
        stores: vec![StoreSchema::new(
            "docs",
            docstore::keypath::KeyPath::compound(["tenant", "id"]),
        )
        .with_index(IndexSchema::new("tags", docstore::keypath::KeyPath::single("tags")).multi_entry())
        .with_index(IndexSchema::new("body", docstore::keypath::KeyPath::single("body")).full_text())],
    }
}
