//! JSON file storage implementation.
//!
//! Stores one JSON file per record under a root directory. Every write goes through
//! a temporary file and a rename, so a record file is either the old or the
//! new version, never a partial one. The full index is loaded on open and
//! kept in memory for reads.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use genesis_core::{
    CycleOutcome, EvolutionEvent, ExecutorKind, Genome, GenomeId, MemoryState,
};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::ledger::Ledger;
use crate::{GenomeStore, OutcomeStore, Result};

/// File-based JSON storage backend.
pub struct JsonStore {
    root: PathBuf,
    ledger: RwLock<Ledger>,
}

impl JsonStore {
    /// Open (or create) a store rooted at `root`.
    ///
    /// Creates the `genomes/`, `events/` and `outcomes/` directories
    /// and loads every record found there.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("genomes")).await?;
        fs::create_dir_all(root.join("events")).await?;
        fs::create_dir_all(root.join("outcomes")).await?;

        let genomes: Vec<Genome> = list_dir(&root.join("genomes")).await?;
        let events: Vec<EvolutionEvent> = list_dir(&root.join("events")).await?;
        let outcomes: Vec<CycleOutcome> = list_dir(&root.join("outcomes")).await?;
        info!(
            root = %root.display(),
            genomes = genomes.len(),
            events = events.len(),
            outcomes = outcomes.len(),
            "opened JSON store"
        );

        let (ledger, repaired) = Ledger::restore(genomes, events, outcomes);
        let store = Self {
            root,
            ledger: RwLock::new(ledger),
        };

        for genome in repaired {
            warn!(genome = %genome.id, "retiring genome left active by an interrupted supersede");
            store.write_genome(&genome).await?;
        }

        Ok(store)
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn genome_path(&self, id: GenomeId) -> PathBuf {
        self.root.join("genomes").join(format!("{}.json", id))
    }

    fn event_path(&self, seq: u64) -> PathBuf {
        self.root.join("events").join(format!("{:020}.json", seq))
    }

    fn outcome_path(&self, outcome: &CycleOutcome) -> PathBuf {
        self.root.join("outcomes").join(format!("{}.json", outcome.cycle_id))
    }

    async fn write_genome(&self, genome: &Genome) -> Result<()> {
        write_json(&self.genome_path(genome.id), genome).await?;
        debug!(genome = %genome.id, generation = genome.generation, "genome written");
        Ok(())
    }
}

#[async_trait]
impl GenomeStore for JsonStore {
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
        self.write_genome(genome).await?;
        ledger.apply_put(genome.clone());
        Ok(genome.id)
    }

    async fn supersede(&self, prior: GenomeId, successor: &Genome) -> Result<()> {
        let mut ledger = self.ledger.write().await;
        let retired = ledger.check_supersede(prior, successor)?;
        // Successor first: an interrupted supersede is repaired on open.
        self.write_genome(successor).await?;
        self.write_genome(&retired).await?;
        ledger.apply_supersede(retired, successor.clone());
        Ok(())
    }

    async fn append_event(&self, event: &EvolutionEvent) -> Result<u64> {
        let mut ledger = self.ledger.write().await;
        let stamped = ledger.check_event(event)?;
        write_json(&self.event_path(stamped.seq), &stamped).await?;
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
impl OutcomeStore for JsonStore {
    async fn persist_outcome(&self, outcome: &CycleOutcome) -> Result<bool> {
        let mut ledger = self.ledger.write().await;
        if ledger.has_outcome(outcome.cycle_id) {
            return Ok(false);
        }
        write_json(&self.outcome_path(outcome), outcome).await?;
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

async fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json.as_bytes()).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&entry.path()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => warn!(path = %entry.path().display(), error = %e, "skipping unreadable record"),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use genesis_core::{CycleId, GenomeSpec, GenomeStatus};

    fn founder(name: &str) -> Genome {
        Genome::founder(
            ExecutorKind::Code,
            name,
            "writes code",
            GenomeSpec {
                instructions: "Write Rust.".into(),
                temperature: 0.2,
                capabilities: vec!["rust".into()],
            },
        )
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let g0 = founder("coder");
        let g1 = g0.successor(g0.spec.clone(), "fn main() {}".into());
        let outcome = CycleOutcome::noop(CycleId::new(), "abc", chrono::Utc::now());
        {
            let store = JsonStore::open(dir.path()).await.unwrap();
            store.put(&g0).await.unwrap();
            store.supersede(g0.id, &g1).await.unwrap();
            let event = EvolutionEvent::accepted(g0.kind, &g0.name, g0.id, g1.id, "feedback");
            assert_eq!(store.append_event(&event).await.unwrap(), 1);
            store.persist_outcome(&outcome).await.unwrap();
        }

        let store = JsonStore::open(dir.path()).await.unwrap();
        let active = store.get_active(ExecutorKind::Code).await.unwrap().unwrap();
        assert_eq!(active.id, g1.id);
        assert_eq!(store.get(g0.id).await.unwrap().unwrap().status, GenomeStatus::Retired);
        assert_eq!(store.lineage_of(g1.id).await.unwrap().len(), 2);

        let events = store.list_events(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 1);

        // Persisting again after reopen is still a no-op.
        assert!(!store.persist_outcome(&outcome).await.unwrap());
        let next = EvolutionEvent::rejected(g1.kind, &g1.name, g1.id, "feedback", "bad");
        assert_eq!(store.append_event(&next).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_genome_write_is_a_single_record_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).await.unwrap();
        let g0 = founder("coder");
        store.put(&g0).await.unwrap();

        let mut entries = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        entries.sort();
        assert_eq!(entries, vec!["events", "genomes", "outcomes"]);
        assert_eq!(std::fs::read_dir(dir.path().join("genomes")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_open_repairs_interrupted_supersede() {
        let dir = tempfile::tempdir().unwrap();
        let g0 = founder("coder");
        let g1 = g0.successor(g0.spec.clone(), String::new());
        {
            let store = JsonStore::open(dir.path()).await.unwrap();
            store.put(&g0).await.unwrap();
            // Simulate a crash after the successor was written.
            store.write_genome(&g1).await.unwrap();
        }

        let store = JsonStore::open(dir.path()).await.unwrap();
        let active = store.list_active(ExecutorKind::Code).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, g1.id);

        let on_disk: Genome = read_json(&store.genome_path(g0.id)).await.unwrap().unwrap();
        assert_eq!(on_disk.status, GenomeStatus::Retired);
    }
}
