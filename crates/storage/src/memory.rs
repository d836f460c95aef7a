//! In-memory storage backend.

use async_trait::async_trait;
use genesis_core::{
    CycleOutcome, EvolutionEvent, ExecutorKind, Genome, GenomeId, MemoryState,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::ledger::Ledger;
use crate::{GenomeStore, OutcomeStore, Result};

/// Volatile store, used by tests and single-process runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ledger: RwLock<Ledger>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GenomeStore for MemoryStore {
    async fn get_active(&self, kind: ExecutorKind) -> Result<Option<Genome>> {
        Ok(self.ledger.read().await.list_active(kind).into_iter().next())
    }

    async fn list_active(&self, kind: ExecutorKind) -> Result<Vec<Genome>> {
        Ok(self.ledger.read().await.list_active(kind))
    }

    async fn get(&self, id: GenomeId) -> Result<Option<Genome>> {
        Ok(self.ledger.read().await.get(id).cloned())
    }

    async fn put(&self, genome: &Genome) -> Result<GenomeId> {
        let mut ledger = self.ledger.write().await;
        ledger.check_put(genome)?;
        ledger.apply_put(genome.clone());
        debug!(genome = %genome.id, kind = %genome.kind, name = %genome.name, "genome stored");
        Ok(genome.id)
    }

    async fn supersede(&self, prior: GenomeId, successor: &Genome) -> Result<()> {
        let mut ledger = self.ledger.write().await;
        let retired = ledger.check_supersede(prior, successor)?;
        ledger.apply_supersede(retired, successor.clone());
        debug!(prior = %prior, successor = %successor.id, "genome superseded");
        Ok(())
    }

    async fn append_event(&self, event: &EvolutionEvent) -> Result<u64> {
        let mut ledger = self.ledger.write().await;
        let stamped = ledger.check_event(event)?;
        Ok(ledger.apply_event(stamped))
    }

    async fn list_lineage(&self, kind: ExecutorKind) -> Result<Vec<Genome>> {
        Ok(self.ledger.read().await.list_lineage(kind))
    }

    async fn lineage_of(&self, id: GenomeId) -> Result<Vec<Genome>> {
        self.ledger.read().await.lineage_of(id)
    }

    async fn list_events(&self, limit: usize) -> Result<Vec<EvolutionEvent>> {
        Ok(self.ledger.read().await.list_events(limit))
    }
}

#[async_trait]
impl OutcomeStore for MemoryStore {
    async fn persist_outcome(&self, outcome: &CycleOutcome) -> Result<bool> {
        let mut ledger = self.ledger.write().await;
        if ledger.has_outcome(outcome.cycle_id) {
            return Ok(false);
        }
        ledger.apply_outcome(outcome.clone());
        Ok(true)
    }

    async fn recent_outcomes(&self, limit: usize) -> Result<Vec<CycleOutcome>> {
        Ok(self.ledger.read().await.recent_outcomes(limit))
    }

    async fn memory_state(&self) -> Result<MemoryState> {
        Ok(self.ledger.read().await.memory_state())
    }
}
