//! Reopening from a crash image recovers the committed documents and
//! rebuilds indexes that match them.

use crate::collection::{Collection, Filter};
use crate::config::StoreConfig;
use crate::storage::{FaultConfig, SimulatedStorage};
use crate::testing::memory_collection;
use crate::types::Document;

fn reopen(collection: &Collection<SimulatedStorage>) -> Collection<SimulatedStorage> {
    let image = collection
        .with_storage_mut(|s| s.crash_image())
        .expect("crash image");
    Collection::with_storage(SimulatedStorage::from_image(image, 1), &StoreConfig::default())
        .expect("reopen")
}

#[test]
fn test_crash_between_relocation_and_free() {
    let collection = memory_collection(&["a"]);
    collection
        .insert(&Document::new().with("a", 1))
        .expect("insert");
    let id = collection
        .insert(&Document::new().with("a", 2))
        .expect("insert");

    // New slot written, old slot never freed, then the process dies.
    collection
        .with_storage_mut(|s| s.fail_after_writes(1))
        .expect("inject");
    let grown = Document::new().with("a", 3).with("filler", "x".repeat(80));
    assert!(collection.update(id, &grown).expect("update").relocated);

    let recovered = reopen(&collection);
    assert_eq!(recovered.recovery().stale_versions_discarded, 1);
    assert_eq!(recovered.fetch(id).expect("fetch"), grown);
    assert_eq!(recovered.count(&Filter::all()).expect("count"), 2);
    assert_eq!(recovered.count(&Filter::eq("a", 2)).expect("count"), 0);
    assert_eq!(recovered.count(&Filter::eq("a", 3)).expect("count"), 1);
    assert!(recovered.validate().expect("validate").is_valid());

    // The stale version is gone for good, even after deleting the record.
    recovered.delete(id).expect("delete");
    let again = reopen(&recovered);
    assert!(again.fetch(id).is_err());
    assert_eq!(again.count(&Filter::all()).expect("count"), 1);
}

#[test]
fn test_crash_after_rejected_update_changes_nothing() {
    let collection = memory_collection(&["a"]);
    collection
        .insert(&Document::new().with("a", 1))
        .expect("insert");
    let id = collection
        .insert(&Document::new().with("a", 2))
        .expect("insert");
    assert!(collection
        .update(id, &Document::new().with("a", 1).with("filler", "x".repeat(59)))
        .is_err());

    let recovered = reopen(&collection);
    assert_eq!(
        recovered.fetch(id).expect("fetch"),
        Document::new().with("a", 2)
    );
    assert_eq!(recovered.count(&Filter::eq("a", 1)).expect("count"), 1);
    assert_eq!(recovered.count(&Filter::eq("a", 2)).expect("count"), 1);
}

#[test]
fn test_torn_insert_is_discarded() {
    let collection = memory_collection(&["a"]);
    let kept = collection
        .insert(&Document::new().with("a", 1))
        .expect("insert");

    collection
        .with_storage_mut(|s| {
            s.set_fault_config(FaultConfig {
                partial_write_rate: 1.0,
                ..FaultConfig::no_faults()
            });
        })
        .expect("inject");
    assert!(collection
        .insert(&Document::new().with("a", 2).with("filler", "t".repeat(200)))
        .is_err());

    let recovered = reopen(&collection);
    assert_eq!(recovered.count(&Filter::all()).expect("count"), 1);
    assert!(recovered.fetch(kept).is_ok());
    assert!(recovered.validate().expect("validate").is_valid());

    // The torn slot's key was never committed.
    recovered
        .insert(&Document::new().with("a", 2))
        .expect("insert a:2");
}

#[test]
fn test_torn_writes_during_in_place_update_keep_previous_version() {
    let collection = memory_collection(&["a"]);
    let original = Document::new().with("a", 1).with("pad", "p".repeat(40));
    let id = collection.insert(&original).expect("insert");

    collection
        .with_storage_mut(|s| {
            s.set_fault_config(FaultConfig {
                partial_write_rate: 1.0,
                ..FaultConfig::no_faults()
            });
        })
        .expect("inject");
    let replacement = Document::new().with("a", 9).with("pad", "q".repeat(40));
    // A write whose torn tail only covers padding still counts as landed.
    let (current, key) = match collection.update(id, &replacement) {
        Ok(_) => (&replacement, 9),
        Err(_) => (&original, 1),
    };
    collection
        .with_storage_mut(SimulatedStorage::clear_faults)
        .expect("clear");

    assert_eq!(&collection.fetch(id).expect("fetch"), current);
    assert_eq!(collection.count(&Filter::eq("a", key)).expect("count"), 1);
    assert_eq!(collection.count(&Filter::eq("a", 10 - key)).expect("count"), 0);

    let recovered = reopen(&collection);
    assert_eq!(&recovered.fetch(id).expect("fetch"), current);
    assert_eq!(recovered.count(&Filter::eq("a", key)).expect("count"), 1);
    assert!(recovered.validate().expect("validate").is_valid());
}

#[test]
fn test_torn_overwrite_falls_back_to_shadow_copy() {
    let collection = memory_collection(&["a"]);
    let original = Document::new().with("a", 1).with("pad", "p".repeat(40));
    let id = collection.insert(&original).expect("insert");
    let location = collection.location(id).expect("location");

    // The shadow copy lands, the in-place overwrite is torn.
    collection
        .with_storage_mut(|s| s.tear_after_writes(1))
        .expect("inject");
    let replacement = Document::new().with("a", 9).with("pad", "q".repeat(40));
    assert!(collection.update(id, &replacement).is_err());
    collection
        .with_storage_mut(SimulatedStorage::clear_faults)
        .expect("clear");

    assert_ne!(collection.location(id).expect("location"), location);
    assert_eq!(collection.fetch(id).expect("fetch"), original);
    assert_eq!(
        collection
            .find_one(&Filter::eq("a", 1))
            .expect("find")
            .map(|(found, _)| found),
        Some(id)
    );

    let recovered = reopen(&collection);
    assert_eq!(recovered.recovery().torn_slots_discarded, 1);
    assert_eq!(recovered.fetch(id).expect("fetch"), original);
    assert_eq!(recovered.count(&Filter::eq("a", 9)).expect("count"), 0);
    assert!(recovered.validate().expect("validate").is_valid());

    // Key 9 was never committed.
    collection
        .insert(&Document::new().with("a", 9))
        .expect("insert a:9");
}
