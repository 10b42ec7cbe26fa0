//! Reproducible random workload generation.
//!
//! Documents draw their keys from small domains so unique-key conflicts are
//! frequent, and carry filler of random length so updates regularly outgrow
//! their slots and relocate.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::Document;

/// Shape of the generated workload.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Values of `a` are drawn from `0..key_space`.
    pub key_space: i64,
    /// Longest filler string.
    pub max_filler: usize,
    /// Probability that a document has no `a` field (indexes as null).
    pub missing_key_rate: f64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            key_space: 40,
            max_filler: 300,
            missing_key_rate: 0.02,
        }
    }
}

/// One generated operation. `pick` selects a live document by position.
#[derive(Debug, Clone)]
pub enum Operation {
    Insert(Document),
    /// Replace a whole document.
    Replace { pick: usize, doc: Document },
    /// Append filler without touching any indexed field.
    Grow { pick: usize, extra: usize },
    /// Change `a` and grow the document at the same time.
    ChangeKeyAndGrow { pick: usize, a: i64, extra: usize },
    Delete { pick: usize },
    FindByKey { a: i64 },
    Sync,
}

/// Seeded generator of operations.
pub struct WorkloadGenerator {
    rng: StdRng,
    config: WorkloadConfig,
}

const B_VALUES: [&str; 4] = ["red", "green", "blue", "gold"];

impl WorkloadGenerator {
    #[must_use]
    pub fn new(seed: u64, config: WorkloadConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            config,
        }
    }

    /// A random document with fields `a`, `b`, `c` and `filler`.
    pub fn document(&mut self) -> Document {
        let mut doc = Document::new();
        if !self.rng.random_bool(self.config.missing_key_rate) {
            // Half the keys are doubles, which must collide with equal ints.
            let a = self.rng.random_range(0..self.config.key_space);
            if self.rng.random_bool(0.5) {
                doc.set("a", a);
            } else {
                #[allow(clippy::cast_precision_loss)]
                doc.set("a", a as f64);
            }
        }
        let b = B_VALUES[self.rng.random_range(0..B_VALUES.len())];
        doc.set("b", b);
        doc.set("c", self.rng.random_range(0..8i64));
        let filler = self.rng.random_range(0..=self.config.max_filler);
        doc.set("filler", "x".repeat(filler));
        doc
    }

    /// Next operation.
    pub fn next_operation(&mut self) -> Operation {
        let pick = self.rng.random_range(0..usize::MAX);
        match self.rng.random_range(0..100u32) {
            0..30 => Operation::Insert(self.document()),
            30..45 => Operation::Replace {
                pick,
                doc: self.document(),
            },
            45..60 => Operation::Grow {
                pick,
                extra: self.rng.random_range(1..=self.config.max_filler),
            },
            60..80 => Operation::ChangeKeyAndGrow {
                pick,
                a: self.rng.random_range(0..self.config.key_space),
                extra: self.rng.random_range(0..=self.config.max_filler),
            },
            80..90 => Operation::Delete { pick },
            90..98 => Operation::FindByKey {
                a: self.rng.random_range(0..self.config.key_space),
            },
            _ => Operation::Sync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_operations() {
        let mut first = WorkloadGenerator::new(7, WorkloadConfig::default());
        let mut second = WorkloadGenerator::new(7, WorkloadConfig::default());
        for _ in 0..50 {
            let a = format!("{:?}", first.next_operation());
            let b = format!("{:?}", second.next_operation());
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_documents_stay_within_domains() {
        let mut generator = WorkloadGenerator::new(1, WorkloadConfig::default());
        for _ in 0..100 {
            let doc = generator.document();
            assert!(doc.contains("b"));
            assert!(doc.contains("filler"));
            assert!(doc.serialized_size() < 1024);
        }
    }
}
