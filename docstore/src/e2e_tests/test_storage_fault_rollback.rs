//! A write that fails, in storage or while encoding the document, leaves the
//! indexes as they were.

use crate::collection::{CollectionError, Filter};
use crate::storage::{RecordStoreError, SimulatedStorage};
use crate::testing::memory_collection;
use crate::types::{Document, DocumentError};

#[test]
fn test_failed_relocation_rolls_back_index() {
    let collection = memory_collection(&["a"]);
    collection
        .insert(&Document::new().with("a", 1))
        .expect("insert");
    let id = collection
        .insert(&Document::new().with("a", 2))
        .expect("insert");
    let location = collection.location(id).expect("location");

    collection
        .with_storage_mut(|s| s.fail_after_writes(0))
        .expect("inject");
    let err = collection
        .update(id, &Document::new().with("a", 5).with("filler", "x".repeat(100)))
        .expect_err("write fails");
    assert!(matches!(err, CollectionError::Storage(_)), "{err}");
    collection
        .with_storage_mut(SimulatedStorage::clear_faults)
        .expect("clear");

    assert_eq!(
        collection.fetch(id).expect("fetch"),
        Document::new().with("a", 2)
    );
    assert_eq!(collection.location(id).expect("location"), location);
    assert_eq!(collection.count(&Filter::eq("a", 5)).expect("count"), 0);
    assert_eq!(collection.count(&Filter::eq("a", 2)).expect("count"), 1);
    assert!(collection.validate().expect("validate").is_valid());

    // Key 5 was never committed, so another document can take it.
    collection
        .insert(&Document::new().with("a", 5))
        .expect("insert a:5");
    assert!(collection
        .update(id, &Document::new().with("a", 5))
        .expect_err("now taken")
        .is_duplicate_key());
}

#[test]
fn test_failed_in_place_update_rolls_back_index() {
    let collection = memory_collection(&["a"]);
    let id = collection
        .insert(&Document::new().with("a", 1).with("pad", "p".repeat(30)))
        .expect("insert");

    collection
        .with_storage_mut(|s| s.fail_after_writes(0))
        .expect("inject");
    assert!(collection
        .update(id, &Document::new().with("a", 9))
        .is_err());
    collection
        .with_storage_mut(SimulatedStorage::clear_faults)
        .expect("clear");

    assert_eq!(collection.count(&Filter::eq("a", 9)).expect("count"), 0);
    assert_eq!(
        collection
            .find_one(&Filter::eq("a", 1))
            .expect("find")
            .map(|(found, _)| found),
        Some(id)
    );
}

#[test]
fn test_failed_delete_keeps_document_and_key() {
    let collection = memory_collection(&["a"]);
    let id = collection
        .insert(&Document::new().with("a", 1))
        .expect("insert");

    collection
        .with_storage_mut(|s| s.fail_after_writes(0))
        .expect("inject");
    assert!(collection.delete(id).is_err());
    collection
        .with_storage_mut(SimulatedStorage::clear_faults)
        .expect("clear");

    assert!(collection.fetch(id).is_ok());
    assert!(collection
        .insert(&Document::new().with("a", 1))
        .expect_err("key still held")
        .is_duplicate_key());
    assert!(collection.validate().expect("validate").is_valid());
}

#[test]
fn test_free_failure_after_relocation_keeps_update() {
    let collection = memory_collection(&["a"]);
    let id = collection
        .insert(&Document::new().with("a", 1))
        .expect("insert");

    // The new slot lands, freeing the old one fails.
    collection
        .with_storage_mut(|s| s.fail_after_writes(1))
        .expect("inject");
    let grown = Document::new().with("a", 2).with("filler", "x".repeat(100));
    let outcome = collection.update(id, &grown).expect("committed update");
    assert!(outcome.relocated);
    collection
        .with_storage_mut(SimulatedStorage::clear_faults)
        .expect("clear");

    assert_eq!(collection.fetch(id).expect("fetch"), grown);
    assert_eq!(collection.count(&Filter::eq("a", 2)).expect("count"), 1);
    assert_eq!(collection.count(&Filter::eq("a", 1)).expect("count"), 0);

    // The pending free is retried on sync.
    collection.sync().expect("sync");
    assert!(collection.validate().expect("validate").is_valid());
}

#[test]
fn test_unencodable_insert_rolls_back_index() {
    let collection = memory_collection(&["a"]);
    let long_name = Document::new().with("a", 5).with(&"n".repeat(70_000), 1);

    let err = collection.insert(&long_name).expect_err("cannot encode");
    assert!(
        matches!(
            err,
            CollectionError::RecordStore(RecordStoreError::Unencodable(
                DocumentError::FieldNameTooLong(70_000)
            ))
        ),
        "{err}"
    );
    assert_eq!(collection.count(&Filter::eq("a", 5)).expect("count"), 0);

    collection
        .insert(&Document::new().with("a", 5))
        .expect("insert a:5");
    assert!(collection.validate().expect("validate").is_valid());
}
