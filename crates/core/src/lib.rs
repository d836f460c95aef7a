//! GENESIS core data models.
//!
//! This crate defines the data structures shared by every part of the
//! self-evolving orchestration loop: tasks and their results, cycle
//! outcomes, genomes and their lineage, evolution events, and the
//! environment snapshot a cycle starts from.

#![warn(missing_docs)]

// Core identities
mod id;
mod kind;

// Work units
mod task;
mod outcome;

// Population and lineage
mod genome;
mod evolution;

// Perception
mod context;

// Failure handling
mod error;
mod retry;

// Re-exports
pub use id::*;
pub use kind::ExecutorKind;

pub use task::{Task, TaskStatus, TaskResult};
pub use outcome::{CycleOutcome, Diagnostic, KindTally};

pub use genome::{Genome, GenomeSpec, GenomeStatus};
pub use evolution::{EvolutionEvent, EvolutionOutcome};

pub use context::{EnvironmentContext, MemoryState, MAX_RECENT_ERRORS};

pub use error::{ErrorKind, TaskError};
pub use retry::RetryPolicy;

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
