//! With several unique indexes, one conflict aborts the whole write.

use crate::collection::{CollectionError, Filter};
use crate::testing::{memory_collection, slot_bytes};
use crate::types::Document;

fn person(a: i64, email: &str, first: &str, last: &str) -> Document {
    Document::new()
        .with("a", a)
        .with("email", email)
        .with("first", first)
        .with("last", last)
}

fn people() -> crate::collection::Collection<crate::storage::SimulatedStorage> {
    let collection = memory_collection(&["a", "email"]);
    collection
        .ensure_unique_index("first_1_last_1", &["first", "last"])
        .expect("compound index");
    collection
}

#[test]
fn test_one_conflict_aborts_every_index_change() {
    let collection = people();
    collection
        .insert(&person(1, "ada@example.com", "Ada", "Lovelace"))
        .expect("insert");
    let alan = collection
        .insert(&person(2, "alan@example.com", "Alan", "Turing"))
        .expect("insert");
    let bytes_before = slot_bytes(&collection, alan);

    // `a` and the name are free, the email is taken.
    let err = collection
        .update(
            alan,
            &person(3, "ada@example.com", "Grace", "Hopper").with("filler", "x".repeat(300)),
        )
        .expect_err("duplicate email");
    match err {
        CollectionError::DuplicateKey(e) => assert_eq!(e.index_name(), "email_1"),
        other => panic!("expected duplicate key, got {other}"),
    }

    assert_eq!(slot_bytes(&collection, alan), bytes_before);
    // The checks that passed left nothing behind.
    assert_eq!(collection.count(&Filter::eq("a", 3)).expect("count"), 0);
    assert_eq!(collection.count(&Filter::eq("a", 2)).expect("count"), 1);
    assert!(collection
        .find(&Filter::eq("first", "Grace").and_eq("last", "Hopper"))
        .expect("find")
        .is_empty());
    collection
        .insert(&person(3, "grace@example.com", "Grace", "Hopper"))
        .expect("keys are still free");
    assert!(collection.validate().expect("validate").is_valid());
}

#[test]
fn test_compound_key_conflicts_only_on_every_field() {
    let collection = people();
    collection
        .insert(&person(1, "ada@example.com", "Ada", "Lovelace"))
        .expect("insert");
    collection
        .insert(&person(2, "ada2@example.com", "Ada", "Byron"))
        .expect("same first name, different last name");

    let err = collection
        .insert(&person(3, "ada3@example.com", "Ada", "Lovelace"))
        .expect_err("same name");
    match err {
        CollectionError::DuplicateKey(e) => {
            assert_eq!(e.index_name(), "first_1_last_1");
            assert_eq!(
                e.to_string(),
                "E11000 duplicate key error index: first_1_last_1 dup key: { first: \"Ada\", last: \"Lovelace\" }"
            );
        }
        other => panic!("expected duplicate key, got {other}"),
    }
    assert_eq!(collection.count(&Filter::all()).expect("count"), 2);
}

#[test]
fn test_index_created_after_data_enforces_from_then_on() {
    let collection = memory_collection(&[]);
    let id = collection
        .insert(&Document::new().with("sku", "A-1"))
        .expect("insert");
    collection
        .insert(&Document::new().with("sku", "B-2"))
        .expect("insert");

    assert!(collection
        .ensure_unique_index("sku_1", &["sku"])
        .expect("build"));
    assert!(collection
        .update(id, &Document::new().with("sku", "B-2"))
        .expect_err("taken")
        .is_duplicate_key());
    assert_eq!(
        collection.stats().expect("stats").indexes[0].entries,
        2
    );
}
