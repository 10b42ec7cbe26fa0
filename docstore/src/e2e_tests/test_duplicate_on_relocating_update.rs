//! An update that both outgrows its slot and takes another document's
//! unique key must fail without touching storage.

use crate::collection::{CollectionError, Filter};
use crate::storage::slot::capacity;
use crate::testing::{memory_collection, slot_bytes};
use crate::types::Document;

#[test]
fn test_duplicate_key_on_relocating_update_changes_nothing() {
    let collection = memory_collection(&["a"]);

    let first = collection
        .insert(&Document::new().with("a", 1))
        .expect("insert a:1");
    assert_eq!(collection.count(&Filter::eq("a", 1)).expect("count"), 1);

    let second = collection
        .insert(&Document::new().with("a", 2))
        .expect("insert a:2");
    assert_ne!(first, second);
    assert_eq!(collection.count(&Filter::all()).expect("count"), 2);

    let grown = Document::new().with("a", 1).with("filler", "x".repeat(59));
    let location = collection
        .location(second)
        .expect("location")
        .expect("live");
    // The new document cannot fit: accepting it would relocate.
    assert!(grown.serialized_size() > capacity(location.units));

    let bytes_before = slot_bytes(&collection, second);
    let writes_before = collection
        .with_storage_mut(|s| s.stats().writes)
        .expect("stats");

    let err = collection
        .update(second, &grown)
        .expect_err("duplicate key");
    match &err {
        CollectionError::DuplicateKey(e) => {
            assert_eq!(e.index_name(), "a_1");
            assert_eq!(e.existing, first);
        }
        other => panic!("expected duplicate key, got {other}"),
    }
    assert_eq!(
        err.to_string(),
        "E11000 duplicate key error index: a_1 dup key: { a: 1 }"
    );

    assert_eq!(collection.count(&Filter::all()).expect("count"), 2);
    assert_eq!(collection.count(&Filter::eq("a", 1)).expect("count"), 1);
    assert_eq!(collection.count(&Filter::eq("a", 2)).expect("count"), 1);

    // Storage was never written: same slot, same bytes.
    let writes_after = collection
        .with_storage_mut(|s| s.stats().writes)
        .expect("stats");
    assert_eq!(writes_before, writes_after);
    assert_eq!(
        collection.location(second).expect("location"),
        Some(location)
    );
    assert_eq!(slot_bytes(&collection, second), bytes_before);
    assert_eq!(
        collection.fetch(second).expect("fetch"),
        Document::new().with("a", 2)
    );
    assert!(collection.validate().expect("validate").is_valid());
}

#[test]
fn test_same_growth_without_conflict_relocates() {
    let collection = memory_collection(&["a"]);
    collection
        .insert(&Document::new().with("a", 1))
        .expect("insert");
    let id = collection
        .insert(&Document::new().with("a", 2))
        .expect("insert");

    let grown = Document::new().with("a", 3).with("filler", "x".repeat(59));
    let outcome = collection.update(id, &grown).expect("update");
    assert!(outcome.relocated);

    assert_eq!(collection.count(&Filter::all()).expect("count"), 2);
    assert_eq!(collection.count(&Filter::eq("a", 2)).expect("count"), 0);
    assert_eq!(collection.count(&Filter::eq("a", 3)).expect("count"), 1);
    assert_eq!(collection.fetch(id).expect("fetch"), grown);
}

#[test]
fn test_duplicate_on_in_place_update_is_also_rejected() {
    let collection = memory_collection(&["a"]);
    collection
        .insert(&Document::new().with("a", 1).with("pad", "y".repeat(40)))
        .expect("insert");
    let id = collection
        .insert(&Document::new().with("a", 2).with("pad", "y".repeat(40)))
        .expect("insert");

    let bytes_before = slot_bytes(&collection, id);
    let err = collection
        .apply_update(id, |_| Document::new().with("a", 1))
        .expect_err("duplicate");
    assert!(err.is_duplicate_key());
    assert_eq!(slot_bytes(&collection, id), bytes_before);
}
