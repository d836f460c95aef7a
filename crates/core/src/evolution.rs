//! Evolution events - the append-only audit log of population changes.

use serde::{Deserialize, Serialize};

use crate::id::{EventId, GenomeId};
use crate::kind::ExecutorKind;
use crate::Time;

/// Result of a mutation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionOutcome {
    /// Candidate committed as the new active genome
    Accepted,
    /// Candidate discarded; population unchanged
    Rejected,
}

/// One entry in the evolution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionEvent {
    /// Unique identifier (also the bus de-duplication key)
    pub id: EventId,

    /// Sequence number assigned by the store on append; 0 until then
    pub seq: u64,

    /// Executor kind concerned
    pub kind: ExecutorKind,

    /// Executor name concerned
    pub name: String,

    /// Genome that was considered
    pub genome_id_from: GenomeId,

    /// Successor genome, if accepted
    pub genome_id_to: Option<GenomeId>,

    /// Why evolution was attempted
    pub trigger_reason: String,

    /// When the attempt concluded
    pub timestamp: Time,

    /// Accepted or rejected
    pub outcome: EvolutionOutcome,

    /// Rejection reason or acceptance note
    pub detail: String,
}

impl EvolutionEvent {
    /// Event for a committed successor.
    pub fn accepted(
        kind: ExecutorKind,
        name: impl Into<String>,
        from: GenomeId,
        to: GenomeId,
        trigger_reason: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            seq: 0,
            kind,
            name: name.into(),
            genome_id_from: from,
            genome_id_to: Some(to),
            trigger_reason: trigger_reason.into(),
            timestamp: chrono::Utc::now(),
            outcome: EvolutionOutcome::Accepted,
            detail: String::new(),
        }
    }

    /// Event for a discarded candidate.
    pub fn rejected(
        kind: ExecutorKind,
        name: impl Into<String>,
        from: GenomeId,
        trigger_reason: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            seq: 0,
            kind,
            name: name.into(),
            genome_id_from: from,
            genome_id_to: None,
            trigger_reason: trigger_reason.into(),
            timestamp: chrono::Utc::now(),
            outcome: EvolutionOutcome::Rejected,
            detail: detail.into(),
        }
    }

    /// True if the candidate was committed.
    pub fn is_accepted(&self) -> bool {
        self.outcome == EvolutionOutcome::Accepted
    }
}
