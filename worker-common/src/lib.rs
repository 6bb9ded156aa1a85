//! Model Worker Common Types
//!
//! Shared types used by the worker runtime and by tooling that reads its
//! health and benchmark output.

pub mod benchmark;
pub mod capacity;
pub mod outcome;
pub mod readiness;

pub use benchmark::{BenchmarkReport, LatencySummary};
pub use capacity::CapacitySnapshot;
pub use outcome::OutcomeKind;
pub use readiness::{Readiness, ReadinessState};
