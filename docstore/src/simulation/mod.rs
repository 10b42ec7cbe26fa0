//! Deterministic simulation testing.
//!
//! Runs seeded random workloads against a `Collection` on `SimulatedStorage`:
//! - Keys from small domains, so unique-key conflicts are frequent
//! - Growing documents, so updates relocate
//! - Injected write faults, including torn writes
//! - Invariant checks against a model after every operation
//! - A reopen from a crash image at the end
//!
//! Given the same seed, execution is identical.
//!
//! ```ignore
//! let config = SimulatorConfig::new(12345).with_write_error_rate(0.05);
//! let result = Simulator::new(config).run(1000);
//! assert!(result.passed());
//! ```

#![cfg(test)]

mod invariants;
mod simulator;
mod workload;
