//! Evolution layer - per-kind performance tracking and genome mutation.

#![warn(missing_docs)]

pub mod analyzer;
pub mod candidate;
pub mod evolver;
pub mod metrics;

pub use analyzer::{Analyzer, Trigger};
pub use candidate::{Candidate, CandidateCheck, TEMPERATURE_RANGE};
pub use evolver::{EvolveError, Evolver, EvolverConfig, Result};
pub use metrics::{KindStatistics, PerformanceTracker, PerformanceWindow};
