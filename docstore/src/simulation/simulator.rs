//! Simulation harness: a seeded workload against a collection on
//! `SimulatedStorage`, compared with a model after every operation.

use crate::collection::{Collection, CollectionError, Filter};
use crate::config::StoreConfig;
use crate::index::IndexSpec;
use crate::storage::{FaultConfig, SimulatedStorage};
use crate::types::{Document, RecordId, Value};

use super::invariants::{InvariantChecker, InvariantViolation, Model};
use super::workload::{Operation, WorkloadConfig, WorkloadGenerator};

/// Run a full validation every this many operations.
const FULL_CHECK_INTERVAL: usize = 25;

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Faults injected once the indexes exist.
    pub fault_config: FaultConfig,
    pub workload: WorkloadConfig,
    pub store: StoreConfig,
}

impl SimulatorConfig {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            fault_config: FaultConfig::no_faults(),
            workload: WorkloadConfig::default(),
            store: StoreConfig::default(),
        }
    }

    /// Fail this fraction of storage writes.
    #[must_use]
    pub const fn with_write_error_rate(mut self, rate: f64) -> Self {
        self.fault_config.write_error_rate = rate;
        self
    }

    /// Tear this fraction of storage writes: a prefix lands, then the write
    /// fails.
    #[must_use]
    pub const fn with_partial_write_rate(mut self, rate: f64) -> Self {
        self.fault_config.partial_write_rate = rate;
        self
    }

    #[must_use]
    pub fn with_store_config(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }
}

/// Results from a simulation run.
#[derive(Debug, Default)]
pub struct SimulationResult {
    pub seed: u64,
    pub operations: usize,
    pub inserts: u64,
    pub updates: u64,
    pub relocations: u64,
    pub deletes: u64,
    pub duplicate_rejections: u64,
    pub storage_failures: u64,
    pub invariant_violations: Vec<InvariantViolation>,
}

impl SimulationResult {
    /// Whether every invariant held.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.invariant_violations.is_empty()
    }
}

/// The simulator.
pub struct Simulator {
    config: SimulatorConfig,
    generator: WorkloadGenerator,
    model: Model,
    result: SimulationResult,
}

impl Simulator {
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        let generator = WorkloadGenerator::new(config.seed, config.workload.clone());
        let model = Model::new(vec![
            IndexSpec::single("a_1", "a"),
            IndexSpec::new("b_1_c_1", vec!["b".to_string(), "c".to_string()])
                .expect("valid index spec"),
        ]);
        let result = SimulationResult {
            seed: config.seed,
            ..SimulationResult::default()
        };
        Self {
            config,
            generator,
            model,
            result,
        }
    }

    fn faults_enabled(&self) -> bool {
        self.config.fault_config.write_error_rate > 0.0
            || self.config.fault_config.partial_write_rate > 0.0
    }

    fn violation(&mut self, message: String) {
        self.result.invariant_violations.push(InvariantViolation {
            operation: self.result.operations,
            message,
        });
    }

    /// Run `operation_count` operations, then reopen the collection from a
    /// crash image and check it again.
    pub fn run(mut self, operation_count: usize) -> SimulationResult {
        let storage = SimulatedStorage::new(self.config.seed);
        let collection = match Collection::with_storage(storage, &self.config.store) {
            Ok(collection) => collection,
            Err(e) => {
                self.violation(format!("failed to create collection: {e}"));
                return self.result;
            }
        };
        for fields in [&["a"][..], &["b", "c"][..]] {
            let name = IndexSpec::default_name(fields);
            if let Err(e) = collection.ensure_unique_index(&name, fields) {
                self.violation(format!("failed to create index {name}: {e}"));
                return self.result;
            }
        }

        let faults = self.config.fault_config.clone();
        if let Err(e) = collection.with_storage_mut(|s| s.set_fault_config(faults)) {
            self.violation(format!("failed to inject faults: {e}"));
            return self.result;
        }

        for n in 0..operation_count {
            self.result.operations = n;
            let operation = self.generator.next_operation();
            self.apply(&collection, operation);

            let violations = if n % FULL_CHECK_INTERVAL == 0 {
                InvariantChecker::check_full(&collection, &self.model, n)
            } else {
                InvariantChecker::check(&collection, &self.model, n)
            };
            if !violations.is_empty() {
                self.result.invariant_violations.extend(violations);
                return self.result;
            }
        }
        self.result.operations = operation_count;

        self.check_after_crash(&collection, operation_count);
        self.result
    }

    fn check_after_crash(&mut self, collection: &Collection<SimulatedStorage>, operation: usize) {
        let image = match collection.with_storage_mut(|s| s.crash_image()) {
            Ok(image) => image,
            Err(e) => {
                self.violation(format!("failed to take crash image: {e}"));
                return;
            }
        };
        let storage = SimulatedStorage::from_image(image, self.config.seed);
        match Collection::with_storage(storage, &self.config.store) {
            Ok(reopened) => {
                let violations = InvariantChecker::check_full(&reopened, &self.model, operation);
                self.result.invariant_violations.extend(violations);
            }
            Err(e) => self.violation(format!("failed to reopen after crash: {e}")),
        }
    }

    fn apply(&mut self, collection: &Collection<SimulatedStorage>, operation: Operation) {
        match operation {
            Operation::Insert(doc) => self.insert(collection, doc),
            Operation::Replace { pick, doc } => {
                if let Some(id) = self.model.pick(pick) {
                    self.update(collection, id, doc);
                }
            }
            Operation::Grow { pick, extra } => {
                if let Some((id, mut doc)) = self.current(pick) {
                    extend_filler(&mut doc, extra);
                    self.update(collection, id, doc);
                }
            }
            Operation::ChangeKeyAndGrow { pick, a, extra } => {
                if let Some((id, mut doc)) = self.current(pick) {
                    doc.set("a", a);
                    extend_filler(&mut doc, extra);
                    self.update(collection, id, doc);
                }
            }
            Operation::Delete { pick } => {
                if let Some(id) = self.model.pick(pick) {
                    self.delete(collection, id);
                }
            }
            Operation::FindByKey { a } => self.find_by_key(collection, a),
            Operation::Sync => {
                if let Err(e) = collection.sync() {
                    self.unexpected("sync", &e);
                }
            }
        }
    }

    fn current(&self, pick: usize) -> Option<(RecordId, Document)> {
        let id = self.model.pick(pick)?;
        self.model.get(id).map(|doc| (id, doc.clone()))
    }

    /// Record an error that is only acceptable as an injected storage fault.
    fn unexpected(&mut self, what: &str, e: &CollectionError) {
        if matches!(e, CollectionError::Storage(_)) && self.faults_enabled() {
            self.result.storage_failures += 1;
        } else {
            self.violation(format!("{what} failed unexpectedly: {e}"));
        }
    }

    fn insert(&mut self, collection: &Collection<SimulatedStorage>, doc: Document) {
        let expected = self.model.conflict(None, &doc);
        match collection.insert(&doc) {
            Ok(id) => {
                if let Some((index, other)) = expected {
                    self.violation(format!("insert of {doc} accepted, duplicates {other} in {index}"));
                }
                self.model.put(id, doc);
                self.result.inserts += 1;
            }
            Err(CollectionError::DuplicateKey(e)) => {
                if expected.is_none() {
                    self.violation(format!("insert of {doc} rejected without conflict: {e}"));
                }
                self.result.duplicate_rejections += 1;
            }
            Err(e) => self.unexpected("insert", &e),
        }
    }

    fn update(&mut self, collection: &Collection<SimulatedStorage>, id: RecordId, doc: Document) {
        let expected = self.model.conflict(Some(id), &doc);
        let before = collection.location(id).ok().flatten();

        match collection.update(id, &doc) {
            Ok(outcome) => {
                if let Some((index, other)) = expected {
                    self.violation(format!("update of {id} accepted, duplicates {other} in {index}"));
                }
                self.model.put(id, doc);
                self.result.updates += 1;
                if outcome.relocated {
                    self.result.relocations += 1;
                }
            }
            Err(CollectionError::DuplicateKey(e)) => {
                if expected.is_none() {
                    self.violation(format!("update of {id} rejected without conflict: {e}"));
                }
                let after = collection.location(id).ok().flatten();
                if before != after {
                    self.violation(format!("rejected update moved {id}"));
                }
                self.result.duplicate_rejections += 1;
            }
            Err(e) => self.unexpected("update", &e),
        }
    }

    fn delete(&mut self, collection: &Collection<SimulatedStorage>, id: RecordId) {
        match collection.delete(id) {
            Ok(removed) => {
                if self.model.get(id) != Some(&removed) {
                    self.violation(format!("delete of {id} returned {removed}"));
                }
                self.model.remove(id);
                self.result.deletes += 1;
            }
            Err(e) => self.unexpected("delete", &e),
        }
    }

    fn find_by_key(&mut self, collection: &Collection<SimulatedStorage>, a: i64) {
        let filter = Filter::eq("a", a);
        match collection.find(&filter) {
            Ok(found) => {
                let expected = self.model.count(&filter);
                if found.len() != expected {
                    self.violation(format!(
                        "find a == {a} returned {} documents, expected {expected}",
                        found.len()
                    ));
                }
            }
            Err(e) => self.unexpected("find", &e),
        }
    }
}

fn extend_filler(doc: &mut Document, extra: usize) {
    let mut filler = match doc.get("filler") {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };
    filler.push_str(&"y".repeat(extra));
    doc.set("filler", filler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::AllocationPolicy;

    fn assert_passed(result: &SimulationResult) {
        assert!(
            result.passed(),
            "seed {} failed: {:#?}",
            result.seed,
            result.invariant_violations
        );
    }

    #[test]
    fn test_simulation_without_faults() {
        for seed in 0..5 {
            let result = Simulator::new(SimulatorConfig::new(seed)).run(400);
            assert_passed(&result);
            assert_eq!(result.storage_failures, 0);
            assert!(result.duplicate_rejections > 0, "{result:?}");
            assert!(result.relocations > 0, "{result:?}");
        }
    }

    #[test]
    fn test_simulation_with_write_faults() {
        for seed in 100..105 {
            let config = SimulatorConfig::new(seed).with_write_error_rate(0.05);
            let result = Simulator::new(config).run(400);
            assert_passed(&result);
        }
    }

    #[test]
    fn test_simulation_with_torn_writes() {
        let mut failures = 0;
        for seed in 300..305 {
            let config = SimulatorConfig::new(seed).with_partial_write_rate(0.03);
            let result = Simulator::new(config).run(300);
            assert_passed(&result);
            failures += result.storage_failures;
        }
        assert!(failures > 0);
    }

    #[test]
    fn test_simulation_with_mixed_faults() {
        let store = StoreConfig::default().with_allocation(AllocationPolicy::PowerOf2Sizes);
        for seed in 400..403 {
            let config = SimulatorConfig::new(seed)
                .with_store_config(store.clone())
                .with_write_error_rate(0.02)
                .with_partial_write_rate(0.02);
            let result = Simulator::new(config).run(300);
            assert_passed(&result);
        }
    }

    #[test]
    fn test_simulation_with_power_of_two_slots() {
        let store = StoreConfig::default().with_allocation(AllocationPolicy::PowerOf2Sizes);
        for seed in 200..203 {
            let config = SimulatorConfig::new(seed)
                .with_store_config(store.clone())
                .with_write_error_rate(0.02);
            let result = Simulator::new(config).run(300);
            assert_passed(&result);
        }
    }

    #[test]
    fn test_simulation_is_deterministic() {
        let first = Simulator::new(SimulatorConfig::new(42)).run(200);
        let second = Simulator::new(SimulatorConfig::new(42)).run(200);
        assert_eq!(first.inserts, second.inserts);
        assert_eq!(first.relocations, second.relocations);
        assert_eq!(first.duplicate_rejections, second.duplicate_rejections);
    }
}
