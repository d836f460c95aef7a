//! What a cycle reports back.

use std::fmt;
use std::time::Duration;

use genesis_core::{CycleId, CycleOutcome, EvolutionEvent, ExecutorKind};
use serde::Serialize;

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Between cycles
    Idle,
    /// Taking the environment snapshot
    Perceiving,
    /// Decomposing the request into a plan
    Thinking,
    /// Running the plan
    Acting,
    /// Persisting and publishing the outcome
    Remembering,
    /// Considering genome mutations
    Evolving,
}

impl Phase {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Perceiving => "perceiving",
            Phase::Thinking => "thinking",
            Phase::Acting => "acting",
            Phase::Remembering => "remembering",
            Phase::Evolving => "evolving",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evolution work attributed to one cycle.
#[derive(Debug, Clone, Default)]
pub struct EvolutionSummary {
    /// Events recorded, including those of earlier deferred runs that
    /// finished since
    pub events: Vec<EvolutionEvent>,
    /// Kinds whose evolution is still pending
    pub deferred: Vec<ExecutorKind>,
    /// Failures that aborted a kind's evolution
    pub errors: Vec<String>,
}

impl EvolutionSummary {
    /// Number of accepted events.
    pub fn accepted(&self) -> usize {
        self.events.iter().filter(|e| e.is_accepted()).count()
    }
}

/// Result of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Cycle id
    pub cycle_id: CycleId,
    /// Phases entered, in order
    pub phases: Vec<Phase>,
    /// Aggregated outcome
    pub outcome: CycleOutcome,
    /// True once the outcome is in the store
    pub persisted: bool,
    /// True if persistence or evolution failed, or a phase panicked
    pub degraded: bool,
    /// Evolution work of this cycle
    pub evolution: EvolutionSummary,
}

impl CycleReport {
    /// True if the cycle never got past perceiving.
    pub fn perceive_failed(&self) -> bool {
        self.phases.contains(&Phase::Perceiving) && !self.phases.contains(&Phase::Thinking)
    }

    /// True if the evolving phase ran.
    pub fn evolved(&self) -> bool {
        self.phases.contains(&Phase::Evolving)
    }
}

/// Point-in-time view of a controller.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    /// Current phase
    pub phase: Phase,
    /// Cycles completed
    pub cycles: u64,
    /// Cycles that ended degraded
    pub degraded_cycles: u64,
    /// Time since the controller was created
    pub uptime: Duration,
    /// Cycles until the next evolving phase
    pub next_evolution_in: u64,
    /// True while a deferred evolution run is in the background
    pub evolution_pending: bool,
    /// Kinds queued behind that run
    pub deferred: Vec<ExecutorKind>,
}
