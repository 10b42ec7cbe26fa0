//! Updates that keep a document's unique key never conflict with itself.

use crate::collection::Filter;
use crate::testing::memory_collection;
use crate::types::{Document, Value};

#[test]
fn test_update_keeping_key_succeeds() {
    let collection = memory_collection(&["a"]);
    let id = collection
        .insert(&Document::new().with("a", 1).with("n", 0))
        .expect("insert");

    collection
        .update(id, &Document::new().with("a", 1).with("n", 1))
        .expect("same key");
    // An equal number of another type is the same key.
    collection
        .update(id, &Document::new().with("a", 1.0).with("n", 2))
        .expect("equal key");

    let outcome = collection
        .update(
            id,
            &Document::new()
                .with("a", 1)
                .with("n", 3)
                .with("filler", "z".repeat(500)),
        )
        .expect("same key, relocating");
    assert!(outcome.relocated);

    assert_eq!(collection.count(&Filter::eq("a", 1)).expect("count"), 1);
    assert!(collection.validate().expect("validate").is_valid());
}

#[test]
fn test_update_keeping_missing_key_succeeds() {
    let collection = memory_collection(&["a"]);
    let id = collection
        .insert(&Document::new().with("b", 1))
        .expect("insert");
    collection
        .update(id, &Document::new().with("b", 2))
        .expect("still missing a");
    // Explicit null is the same key as a missing field.
    collection
        .update(id, &Document::new().with("a", Value::Null).with("b", 3))
        .expect("explicit null");
    assert_eq!(
        collection
            .count(&Filter::eq("a", Value::Null))
            .expect("count"),
        1
    );
}

#[test]
fn test_swapping_keys_through_a_free_value() {
    let collection = memory_collection(&["a"]);
    let x = collection
        .insert(&Document::new().with("a", 1))
        .expect("insert");
    let y = collection
        .insert(&Document::new().with("a", 2))
        .expect("insert");

    collection
        .update(x, &Document::new().with("a", 3))
        .expect("x to 3");
    collection
        .update(y, &Document::new().with("a", 1))
        .expect("y to 1");
    collection
        .update(x, &Document::new().with("a", 2))
        .expect("x to 2");

    assert_eq!(
        collection
            .find_one(&Filter::eq("a", 1))
            .expect("find")
            .map(|(id, _)| id),
        Some(y)
    );
    assert_eq!(
        collection
            .find_one(&Filter::eq("a", 2))
            .expect("find")
            .map(|(id, _)| id),
        Some(x)
    );
}
