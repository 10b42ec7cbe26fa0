// Life of a write:
// 1. Lock the unique indexes, then the record store
// 2. Fetch the current document and compute the new one
// 3. Check and stage every changed unique key
//     - Any conflict: roll back, report the duplicate key, touch nothing
// 4. Write the record store (in place, or relocate to a new slot)
//     - Storage failure: roll back staged index changes
// 5. Commit staged index changes
//
// System components:
//  - Record store over fixed-size allocation units
//  - In-memory unique indexes, rebuilt from the documents at open
//  - Collection coordinating the two

#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod collection;
pub mod config;
pub mod index;
pub mod storage;
pub mod types;

mod e2e_tests;
#[cfg(test)]
mod simulation;
#[cfg(test)]
mod testing;

pub use collection::{Collection, CollectionError, Filter};
