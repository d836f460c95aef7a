//! Cycle outcome - the aggregated result of one cycle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::id::{CycleId, TaskId};
use crate::kind::ExecutorKind;
use crate::task::TaskResult;
use crate::Time;

/// One failed or timed-out task, surfaced without aborting its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Task that failed; `None` for cycle-level failures
    pub task_id: Option<TaskId>,

    /// Failure class
    pub kind: ErrorKind,

    /// Reason
    pub message: String,
}

/// Per-kind task counts for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindTally {
    /// Tasks that succeeded
    pub succeeded: u32,

    /// Tasks that failed or timed out
    pub failed: u32,
}

impl KindTally {
    /// Count one result.
    pub fn record(&mut self, success: bool) {
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Aggregation of all task results of one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleOutcome {
    /// Cycle this outcome belongs to
    pub cycle_id: CycleId,

    /// Top-level success flag
    pub success: bool,

    /// True when the plan was empty and nothing ran
    pub noop: bool,

    /// Successful terminal outputs in submission order
    pub output: String,

    /// Every task result, in submission order
    pub results: Vec<TaskResult>,

    /// One entry per failed or timed-out task
    pub diagnostics: Vec<Diagnostic>,

    /// Executor kinds that ran at least one task
    pub kinds_touched: Vec<ExecutorKind>,

    /// Result counts per kind, over every task of the plan
    #[serde(default)]
    pub tally: BTreeMap<ExecutorKind, KindTally>,

    /// Hash of the environment context the cycle started from
    pub context_hash: String,

    /// When the cycle started
    pub started_at: Time,

    /// When the outcome was produced
    pub completed_at: Time,
}

impl CycleOutcome {
    /// Outcome for a cycle whose plan was empty.
    pub fn noop(cycle_id: CycleId, context_hash: impl Into<String>, started_at: Time) -> Self {
        Self {
            cycle_id,
            success: true,
            noop: true,
            output: String::new(),
            results: Vec::new(),
            diagnostics: Vec::new(),
            kinds_touched: Vec::new(),
            tally: BTreeMap::new(),
            context_hash: context_hash.into(),
            started_at,
            completed_at: chrono::Utc::now(),
        }
    }

    /// Outcome for a cycle that failed before any task ran.
    pub fn failed(cycle_id: CycleId, kind: ErrorKind, message: impl Into<String>, started_at: Time) -> Self {
        Self {
            cycle_id,
            success: false,
            noop: false,
            output: String::new(),
            results: Vec::new(),
            diagnostics: vec![Diagnostic {
                task_id: None,
                kind,
                message: message.into(),
            }],
            kinds_touched: Vec::new(),
            tally: BTreeMap::new(),
            context_hash: String::new(),
            started_at,
            completed_at: chrono::Utc::now(),
        }
    }

    /// Number of successful task results.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }
}
