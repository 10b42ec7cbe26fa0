//! A file-backed collection keeps its documents and index definitions
//! across restarts, and rebuilds identical indexes.

use crate::collection::{Collection, Filter};
use crate::config::StoreConfig;
use crate::index::IndexSpec;
use crate::testing::temp_collection_path;
use crate::types::Document;

#[test]
fn test_reopen_rebuilds_identical_indexes() {
    let (_dir, path) = temp_collection_path();
    let config = StoreConfig::default();

    let (ids, stats_before) = {
        let collection = Collection::create(&path, &config).expect("create");
        collection
            .ensure_unique_index("a_1", &["a"])
            .expect("index a");
        collection
            .ensure_unique_index("b_1_c_1", &["b", "c"])
            .expect("index b, c");

        let ids: Vec<_> = (0..20)
            .map(|n| {
                collection
                    .insert(&Document::new().with("a", n).with("b", "x").with("c", n))
                    .expect("insert")
            })
            .collect();
        for &id in ids.iter().step_by(3) {
            collection
                .apply_update(id, |doc| {
                    let mut next = doc.clone();
                    next.set("filler", "f".repeat(120));
                    next
                })
                .expect("relocating update");
        }
        collection.delete(ids[1]).expect("delete");
        collection.sync().expect("sync");
        (ids, collection.stats().expect("stats"))
    };

    let collection = Collection::open(&path, &config).expect("open");
    assert_eq!(
        collection.indexes().expect("indexes"),
        vec![
            IndexSpec::single("a_1", "a"),
            IndexSpec::new("b_1_c_1", vec!["b".into(), "c".into()]).expect("spec"),
        ]
    );
    let stats_after = collection.stats().expect("stats");
    assert_eq!(stats_after.indexes, stats_before.indexes);
    assert_eq!(stats_after.store.num_records, 19);
    assert!(collection.validate().expect("validate").is_valid());

    assert!(collection.fetch(ids[1]).is_err());
    assert_eq!(
        collection
            .find_one(&Filter::eq("a", 3))
            .expect("find")
            .map(|(id, _)| id),
        Some(ids[3])
    );
    assert!(collection
        .insert(&Document::new().with("a", 4))
        .expect_err("a:4 is taken")
        .is_duplicate_key());

    // Ids are never reused, not even the deleted one.
    let fresh = collection
        .insert(&Document::new().with("a", 100))
        .expect("insert");
    assert!(ids.iter().all(|&id| fresh > id));
}

#[test]
fn test_open_or_create() {
    let (_dir, path) = temp_collection_path();
    let config = StoreConfig::default();

    let id = {
        let collection = Collection::open_or_create(&path, &config).expect("create");
        collection
            .ensure_unique_index("a_1", &["a"])
            .expect("index");
        collection
            .insert(&Document::new().with("a", 1))
            .expect("insert")
    };

    let collection = Collection::open_or_create(&path, &config).expect("open");
    assert_eq!(
        collection.fetch(id).expect("fetch"),
        Document::new().with("a", 1)
    );
    assert!(!collection
        .ensure_unique_index("a_1", &["a"])
        .expect("already there"));
}

#[test]
fn test_create_refuses_existing_file() {
    let (_dir, path) = temp_collection_path();
    let config = StoreConfig::default();
    drop(Collection::create(&path, &config).expect("create"));
    assert!(Collection::create(&path, &config).is_err());
}
