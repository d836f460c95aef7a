//! In-memory index shared by the storage backends.
//!
//! All invariant checks live here so that every backend enforces the same
//! rules. Backends call `check_*` before touching their medium and `apply_*`
//! once the write is durable.

use std::collections::{HashMap, HashSet};

use genesis_core::{
    CycleId, CycleOutcome, EventId, EvolutionEvent, ExecutorKind, Genome, GenomeId,
    GenomeStatus, MemoryState, MAX_RECENT_ERRORS,
};

use crate::{Result, StoreError};

/// Outcomes scanned when collecting recent errors.
const ERROR_SCAN_CYCLES: usize = 20;

/// Diagnostics taken from a single outcome.
const ERRORS_PER_CYCLE: usize = 5;

#[derive(Debug, Default)]
pub(crate) struct Ledger {
    genomes: HashMap<GenomeId, Genome>,
    events: Vec<EvolutionEvent>,
    event_ids: HashSet<EventId>,
    outcomes: Vec<CycleOutcome>,
    outcome_ids: HashSet<CycleId>,
}

impl Ledger {
    pub(crate) fn get(&self, id: GenomeId) -> Option<&Genome> {
        self.genomes.get(&id)
    }

    pub(crate) fn list_active(&self, kind: ExecutorKind) -> Vec<Genome> {
        let mut active: Vec<Genome> = self
            .genomes
            .values()
            .filter(|g| g.kind == kind && g.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        active
    }

    pub(crate) fn list_lineage(&self, kind: ExecutorKind) -> Vec<Genome> {
        let mut all: Vec<Genome> = self
            .genomes
            .values()
            .filter(|g| g.kind == kind)
            .cloned()
            .collect();
        all.sort_by(|a, b| {
            a.generation
                .cmp(&b.generation)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        all
    }

    pub(crate) fn lineage_of(&self, id: GenomeId) -> Result<Vec<Genome>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if !seen.insert(current) {
                return Err(StoreError::Corrupt(format!("lineage cycle at genome {}", current)));
            }
            let genome = self
                .genomes
                .get(&current)
                .ok_or_else(|| StoreError::NotFound(format!("genome {}", current)))?;
            chain.push(genome.clone());
            cursor = genome.parent_id;
        }
        chain.reverse();
        Ok(chain)
    }

    fn active_twin(&self, genome: &Genome) -> Option<&Genome> {
        self.genomes.values().find(|g| {
            g.id != genome.id && g.is_active() && g.kind == genome.kind && g.name == genome.name
        })
    }

    pub(crate) fn check_put(&self, genome: &Genome) -> Result<()> {
        if self.genomes.contains_key(&genome.id) {
            return Err(StoreError::Conflict(format!("genome {} already exists", genome.id)));
        }
        if genome.name.trim().is_empty() {
            return Err(StoreError::Invalid("genome name is empty".into()));
        }
        if let Some(parent) = genome.parent_id {
            if !self.genomes.contains_key(&parent) {
                return Err(StoreError::Invalid(format!("parent {} does not exist", parent)));
            }
        }
        if genome.is_active() {
            if let Some(twin) = self.active_twin(genome) {
                return Err(StoreError::Conflict(format!(
                    "{}/{} already has active genome {}",
                    genome.kind, genome.name, twin.id
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn apply_put(&mut self, genome: Genome) {
        self.genomes.insert(genome.id, genome);
    }

    /// Validate a supersede and return the retired copy of the prior genome.
    pub(crate) fn check_supersede(&self, prior_id: GenomeId, successor: &Genome) -> Result<Genome> {
        let prior = self
            .genomes
            .get(&prior_id)
            .ok_or_else(|| StoreError::NotFound(format!("genome {}", prior_id)))?;
        if !prior.is_active() {
            return Err(StoreError::Conflict(format!("genome {} is already retired", prior_id)));
        }
        if self.genomes.contains_key(&successor.id) {
            return Err(StoreError::Conflict(format!("genome {} already exists", successor.id)));
        }
        if successor.parent_id != Some(prior_id) {
            return Err(StoreError::Invalid("successor must point at the prior genome".into()));
        }
        if successor.kind != prior.kind || successor.name != prior.name {
            return Err(StoreError::Invalid("successor must keep kind and name".into()));
        }
        if successor.generation != prior.generation + 1 {
            return Err(StoreError::Invalid(format!(
                "successor generation {} does not follow {}",
                successor.generation, prior.generation
            )));
        }
        if !successor.is_active() {
            return Err(StoreError::Invalid("successor must be active".into()));
        }

        let mut retired = prior.clone();
        retired.status = GenomeStatus::Retired;
        Ok(retired)
    }

    pub(crate) fn apply_supersede(&mut self, retired: Genome, successor: Genome) {
        self.genomes.insert(retired.id, retired);
        self.genomes.insert(successor.id, successor);
    }

    /// Validate an event and return it with its sequence number assigned.
    pub(crate) fn check_event(&self, event: &EvolutionEvent) -> Result<EvolutionEvent> {
        if self.event_ids.contains(&event.id) {
            return Err(StoreError::Conflict(format!("event {} already appended", event.id)));
        }
        let mut stamped = event.clone();
        stamped.seq = self.events.last().map(|e| e.seq).unwrap_or(0) + 1;
        Ok(stamped)
    }

    pub(crate) fn apply_event(&mut self, event: EvolutionEvent) -> u64 {
        let seq = event.seq;
        self.event_ids.insert(event.id);
        self.events.push(event);
        seq
    }

    pub(crate) fn list_events(&self, limit: usize) -> Vec<EvolutionEvent> {
        let skip = self.events.len().saturating_sub(limit);
        self.events[skip..].to_vec()
    }

    pub(crate) fn has_outcome(&self, id: CycleId) -> bool {
        self.outcome_ids.contains(&id)
    }

    pub(crate) fn apply_outcome(&mut self, outcome: CycleOutcome) {
        self.outcome_ids.insert(outcome.cycle_id);
        self.outcomes.push(outcome);
    }

    pub(crate) fn recent_outcomes(&self, limit: usize) -> Vec<CycleOutcome> {
        self.outcomes.iter().rev().take(limit).cloned().collect()
    }

    pub(crate) fn memory_state(&self) -> MemoryState {
        let total = self.outcomes.len();
        let successes = self.outcomes.iter().filter(|o| o.success).count();
        let recent_errors = self
            .outcomes
            .iter()
            .rev()
            .take(ERROR_SCAN_CYCLES)
            .flat_map(|o| {
                o.diagnostics
                    .iter()
                    .take(ERRORS_PER_CYCLE)
                    .map(|d| format!("{}: {}", d.kind, d.message))
            })
            .take(MAX_RECENT_ERRORS)
            .collect();

        MemoryState {
            total_cycles: total as u64,
            success_rate: if total > 0 {
                successes as f64 / total as f64
            } else {
                0.0
            },
            recent_errors,
        }
    }

    /// Rebuild from records loaded off disk.
    ///
    /// A crash between writing a successor and retiring its parent leaves
    /// both active; the parent is returned so the caller can rewrite it retired.
    pub(crate) fn restore(
        genomes: Vec<Genome>,
        mut events: Vec<EvolutionEvent>,
        mut outcomes: Vec<CycleOutcome>,
    ) -> (Self, Vec<Genome>) {
        let mut ledger = Self::default();
        for genome in genomes {
            ledger.genomes.insert(genome.id, genome);
        }

        let superseded: HashSet<GenomeId> = ledger
            .genomes
            .values()
            .filter(|g| g.is_active())
            .filter_map(|g| g.parent_id)
            .collect();
        let mut repaired = Vec::new();
        for id in superseded {
            if let Some(parent) = ledger.genomes.get_mut(&id) {
                if parent.is_active() {
                    parent.status = GenomeStatus::Retired;
                    repaired.push(parent.clone());
                }
            }
        }

        events.sort_by_key(|e| e.seq);
        for event in events {
            ledger.event_ids.insert(event.id);
            ledger.events.push(event);
        }

        outcomes.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.cycle_id.cmp(&b.cycle_id)));
        for outcome in outcomes {
            ledger.apply_outcome(outcome);
        }

        (ledger, repaired)
    }
}
