//! Population - the read-copy-update view of active genomes per kind.
//!
//! Readers take an `Arc<Membership>` snapshot and keep it for a whole
//! batch. Writers build a new membership and swap it in whole, so a batch
//! never observes a genome swap halfway through.

use std::collections::BTreeMap;
use std::sync::Arc;

use genesis_core::{ExecutorKind, Genome};
use genesis_storage::{GenomeStore, StoreError};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

/// Immutable kind -> active genomes mapping.
#[derive(Debug, Clone)]
pub struct Membership {
    by_kind: BTreeMap<ExecutorKind, Vec<Arc<Genome>>>,
    version: u64,
    loaded_at: Instant,
}

impl Membership {
    fn new(by_kind: BTreeMap<ExecutorKind, Vec<Arc<Genome>>>, version: u64) -> Self {
        Self {
            by_kind,
            version,
            loaded_at: Instant::now(),
        }
    }

    /// Active genomes of a kind, ordered by name.
    pub fn genomes(&self, kind: ExecutorKind) -> &[Arc<Genome>] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pick the genome for a task by rotating through the kind's genomes
    /// with the task's submission id.
    pub fn select(&self, kind: ExecutorKind, seq: u64) -> Option<Arc<Genome>> {
        let genomes = self.genomes(kind);
        if genomes.is_empty() {
            return None;
        }
        let idx = (seq % genomes.len() as u64) as usize;
        Some(genomes[idx].clone())
    }

    /// Kinds with at least one active genome.
    pub fn kinds(&self) -> Vec<ExecutorKind> {
        self.by_kind
            .iter()
            .filter(|(_, g)| !g.is_empty())
            .map(|(k, _)| *k)
            .collect()
    }

    /// Monotonic version, bumped on every swap.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Time since this membership was built.
    pub fn age(&self) -> std::time::Duration {
        self.loaded_at.elapsed()
    }
}

/// Shared, swappable membership.
#[derive(Debug)]
pub struct Population {
    current: RwLock<Arc<Membership>>,
}

impl Population {
    /// Empty population.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Membership::new(BTreeMap::new(), 0))),
        }
    }

    /// Population loaded from the store.
    pub async fn load(store: &dyn GenomeStore) -> Result<Self, StoreError> {
        let population = Self::new();
        population.reload(store).await?;
        Ok(population)
    }

    /// Point-in-time snapshot.
    pub async fn snapshot(&self) -> Arc<Membership> {
        self.current.read().await.clone()
    }

    /// Rebuild the whole membership from the store and swap it in.
    ///
    /// The rebuilt membership is discarded if another writer swapped in a
    /// newer one while the store was being read. Returns whether it was
    /// applied.
    pub async fn reload(&self, store: &dyn GenomeStore) -> Result<bool, StoreError> {
        let base = self.current.read().await.version;
        let mut by_kind = BTreeMap::new();
        for kind in ExecutorKind::ALL {
            let active = store.list_active(kind).await?;
            if !active.is_empty() {
                by_kind.insert(kind, active.into_iter().map(Arc::new).collect());
            }
        }

        let mut current = self.current.write().await;
        if current.version != base {
            debug!(base, current = current.version, "population changed during reload, keeping newer");
            return Ok(false);
        }
        let next = Membership::new(by_kind, current.version + 1);
        debug!(version = next.version, kinds = next.by_kind.len(), "population reloaded");
        *current = Arc::new(next);
        Ok(true)
    }

    /// Publish a new genome list for one kind; other kinds are kept.
    pub async fn replace(&self, kind: ExecutorKind, genomes: Vec<Genome>) {
        let mut current = self.current.write().await;
        let mut by_kind = current.by_kind.clone();
        let mut genomes: Vec<Arc<Genome>> = genomes.into_iter().map(Arc::new).collect();
        genomes.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        by_kind.insert(kind, genomes);

        let next = Membership::new(by_kind, current.version + 1);
        info!(kind = %kind, version = next.version, "population updated");
        *current = Arc::new(next);
    }
}

impl Default for Population {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genesis_core::GenomeSpec;
    use genesis_storage::MemoryStore;

    fn genome(kind: ExecutorKind, name: &str) -> Genome {
        Genome::founder(
            kind,
            name,
            "test",
            GenomeSpec {
                instructions: "x".into(),
                temperature: 0.5,
                capabilities: vec![],
            },
        )
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_swaps() {
        let store = MemoryStore::new();
        let g0 = genome(ExecutorKind::Research, "researcher");
        store.put(&g0).await.unwrap();
        let population = Population::load(&store).await.unwrap();

        let before = population.snapshot().await;
        let g1 = g0.successor(g0.spec.clone(), String::new());
        population.replace(ExecutorKind::Research, vec![g1.clone()]).await;

        assert_eq!(before.select(ExecutorKind::Research, 0).unwrap().id, g0.id);
        let after = population.snapshot().await;
        assert_eq!(after.select(ExecutorKind::Research, 0).unwrap().id, g1.id);
        assert!(after.version() > before.version());
    }

    /// Store whose Research listing stalls after reading, until released.
    struct StalledStore {
        inner: MemoryStore,
        read_done: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl GenomeStore for StalledStore {
        async fn get_active(&self, kind: ExecutorKind) -> genesis_storage::Result<Option<Genome>> {
            self.inner.get_active(kind).await
        }

        async fn list_active(&self, kind: ExecutorKind) -> genesis_storage::Result<Vec<Genome>> {
            let active = self.inner.list_active(kind).await?;
            if kind == ExecutorKind::Research {
                self.read_done.notify_one();
                self.release.notified().await;
            }
            Ok(active)
        }

        async fn get(&self, id: genesis_core::GenomeId) -> genesis_storage::Result<Option<Genome>> {
            self.inner.get(id).await
        }

        async fn put(&self, genome: &Genome) -> genesis_storage::Result<genesis_core::GenomeId> {
            self.inner.put(genome).await
        }

        async fn supersede(&self, prior: genesis_core::GenomeId, successor: &Genome) -> genesis_storage::Result<()> {
            self.inner.supersede(prior, successor).await
        }

        async fn append_event(&self, event: &genesis_core::EvolutionEvent) -> genesis_storage::Result<u64> {
            self.inner.append_event(event).await
        }

        async fn list_lineage(&self, kind: ExecutorKind) -> genesis_storage::Result<Vec<Genome>> {
            self.inner.list_lineage(kind).await
        }

        async fn lineage_of(&self, id: genesis_core::GenomeId) -> genesis_storage::Result<Vec<Genome>> {
            self.inner.lineage_of(id).await
        }

        async fn list_events(&self, limit: usize) -> genesis_storage::Result<Vec<genesis_core::EvolutionEvent>> {
            self.inner.list_events(limit).await
        }
    }

    #[tokio::test]
    async fn test_reload_does_not_revert_concurrent_replace() {
        let store = Arc::new(StalledStore {
            inner: MemoryStore::new(),
            read_done: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let g0 = genome(ExecutorKind::Research, "researcher");
        store.inner.put(&g0).await.unwrap();
        let population = Arc::new(Population::new());
        population.replace(ExecutorKind::Research, vec![g0.clone()]).await;

        let reload = tokio::spawn({
            let store = store.clone();
            let population = population.clone();
            async move { population.reload(store.as_ref()).await }
        });
        store.read_done.notified().await;

        // A commit lands while the reload holds a stale listing.
        let g1 = g0.successor(g0.spec.clone(), "v2".into());
        store.inner.supersede(g0.id, &g1).await.unwrap();
        population.replace(ExecutorKind::Research, vec![g1.clone()]).await;
        store.release.notify_one();

        assert!(!reload.await.unwrap().unwrap());
        let snap = population.snapshot().await;
        assert_eq!(snap.select(ExecutorKind::Research, 0).unwrap().id, g1.id);
    }

    #[tokio::test]
    async fn test_reload_applies_when_nothing_changed() {
        let store = MemoryStore::new();
        let g0 = genome(ExecutorKind::Research, "researcher");
        store.put(&g0).await.unwrap();
        let population = Population::new();

        assert!(population.reload(&store).await.unwrap());
        assert_eq!(population.snapshot().await.version(), 1);
    }

    #[tokio::test]
    async fn test_select_rotates_by_seq() {
        let population = Population::new();
        let a = genome(ExecutorKind::Analysis, "a");
        let b = genome(ExecutorKind::Analysis, "b");
        population.replace(ExecutorKind::Analysis, vec![b.clone(), a.clone()]).await;

        let snap = population.snapshot().await;
        assert_eq!(snap.select(ExecutorKind::Analysis, 0).unwrap().id, a.id);
        assert_eq!(snap.select(ExecutorKind::Analysis, 1).unwrap().id, b.id);
        assert_eq!(snap.select(ExecutorKind::Analysis, 2).unwrap().id, a.id);
        assert!(snap.select(ExecutorKind::Code, 0).is_none());
    }
}
