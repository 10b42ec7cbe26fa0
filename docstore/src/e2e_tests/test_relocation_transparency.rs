//! Relocation moves a document's bytes but never its id.

use crate::collection::{Collection, Filter};
use crate::config::StoreConfig;
use crate::storage::AllocationPolicy;
use crate::testing::memory_collection;
use crate::types::Document;

#[test]
fn test_relocated_document_keeps_its_id() {
    let collection = memory_collection(&["a"]);
    let id = collection
        .insert(&Document::new().with("a", 1))
        .expect("insert");
    let neighbor = collection
        .insert(&Document::new().with("a", 2))
        .expect("insert");
    let before = collection.location(id).expect("location").expect("live");

    let grown = Document::new().with("a", 1).with("filler", "f".repeat(200));
    let outcome = collection.update(id, &grown).expect("update");

    assert!(outcome.relocated);
    assert_ne!(outcome.location, before);
    assert_eq!(
        collection.location(id).expect("location"),
        Some(outcome.location)
    );
    assert_eq!(collection.fetch(id).expect("fetch"), grown);
    assert_eq!(
        collection.fetch(neighbor).expect("fetch"),
        Document::new().with("a", 2)
    );
    assert_eq!(
        collection
            .find_one(&Filter::eq("a", 1))
            .expect("find")
            .map(|(found, _)| found),
        Some(id)
    );

    let stats = collection.stats().expect("stats");
    assert_eq!(stats.store.relocations, 1);
    assert_eq!(stats.store.num_records, 2);
}

#[test]
fn test_padding_lets_later_growth_stay_in_place() {
    let collection = memory_collection(&["a"]);
    let id = collection
        .insert(&Document::new().with("a", 1))
        .expect("insert");
    let grow = |len: usize| Document::new().with("a", 1).with("filler", "f".repeat(len));

    assert!(collection.update(id, &grow(100)).expect("update").relocated);
    // The first move raised the padding factor, so the next slot has room
    // to spare.
    assert!(collection.update(id, &grow(200)).expect("update").relocated);
    let padding = collection.stats().expect("stats").store.padding_factor;
    assert!(padding > 1.0);

    let outcome = collection.update(id, &grow(300)).expect("grow a little");
    assert!(!outcome.relocated);
    assert_eq!(collection.fetch(id).expect("fetch"), grow(300));
}

#[test]
fn test_relocation_with_power_of_two_slots() {
    let config = StoreConfig::default().with_allocation(AllocationPolicy::PowerOf2Sizes);
    let collection = Collection::in_memory(&config).expect("collection");
    collection
        .ensure_unique_index("a_1", &["a"])
        .expect("index");

    let id = collection
        .insert(&Document::new().with("a", 1))
        .expect("insert");
    let mut last = collection.location(id).expect("location").expect("live");
    for len in [40, 100, 300, 700] {
        let doc = Document::new().with("a", 1).with("filler", "p".repeat(len));
        let outcome = collection.update(id, &doc).expect("update");
        if outcome.relocated {
            assert!(outcome.location.units.is_power_of_two());
            assert!(outcome.location.units > last.units);
        }
        last = outcome.location;
        assert_eq!(collection.fetch(id).expect("fetch"), doc);
    }
    assert!(collection.validate().expect("validate").is_valid());
}
