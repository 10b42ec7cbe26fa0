//! Writers racing for the same unique key: exactly one wins.

use std::sync::Arc;
use std::thread;

use crate::collection::{CollectionError, Filter};
use crate::testing::memory_collection;
use crate::types::Document;

const WRITERS: i64 = 8;

#[test]
fn test_concurrent_inserts_of_one_key() {
    let collection = Arc::new(memory_collection(&["a"]));

    let results: Vec<Result<_, CollectionError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|writer| {
                let collection = &collection;
                scope.spawn(move || {
                    collection.insert(&Document::new().with("a", 7).with("writer", writer))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("writer thread"))
            .collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(CollectionError::is_duplicate_key));
    assert_eq!(collection.count(&Filter::eq("a", 7)).expect("count"), 1);
    assert!(collection.validate().expect("validate").is_valid());
}

#[test]
fn test_concurrent_relocating_updates_to_one_key() {
    let collection = Arc::new(memory_collection(&["a"]));
    let ids: Vec<_> = (0..WRITERS)
        .map(|n| {
            collection
                .insert(&Document::new().with("a", n))
                .expect("insert")
        })
        .collect();

    let winners = thread::scope(|scope| {
        let handles: Vec<_> = ids
            .iter()
            .map(|&id| {
                let collection = &collection;
                scope.spawn(move || {
                    let grown = Document::new().with("a", 100).with("filler", "w".repeat(256));
                    collection.update(id, &grown)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("writer thread"))
            .filter(Result::is_ok)
            .count()
    });

    assert_eq!(winners, 1);
    assert_eq!(collection.count(&Filter::eq("a", 100)).expect("count"), 1);
    assert_eq!(
        collection.count(&Filter::all()).expect("count"),
        usize::try_from(WRITERS).expect("small")
    );
    assert!(collection.validate().expect("validate").is_valid());
}

#[test]
fn test_readers_see_only_committed_state() {
    let collection = Arc::new(memory_collection(&["a"]));
    let id = collection
        .insert(&Document::new().with("a", 0))
        .expect("insert");

    thread::scope(|scope| {
        let writer = &collection;
        scope.spawn(move || {
            for n in 1..200 {
                writer
                    .update(id, &Document::new().with("a", n).with("filler", "r".repeat(usize::try_from(n).expect("small"))))
                    .expect("update");
            }
        });

        let reader = &collection;
        scope.spawn(move || {
            for _ in 0..200 {
                let docs = reader.find(&Filter::all()).expect("find");
                assert_eq!(docs.len(), 1);
                let (found, doc) = &docs[0];
                assert_eq!(*found, id);
                let key = doc.get("a").cloned().expect("a is always set");
                // The index agrees with whatever version was read.
                let by_key = reader.find(&Filter::eq("a", key)).expect("find");
                assert!(by_key.len() <= 1);
            }
        });
    });
}
