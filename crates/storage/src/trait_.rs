//! Storage trait abstraction.

use async_trait::async_trait;
use genesis_core::{
    CycleOutcome, EvolutionEvent, ExecutorKind, Genome, GenomeId, MemoryState,
};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write would break a uniqueness or immutability rule
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Record shape is not acceptable
    #[error("Invalid record: {0}")]
    Invalid(String),

    /// Persisted data violates an invariant (e.g. a lineage cycle)
    #[error("Corrupt store: {0}")]
    Corrupt(String),

    /// Backend temporarily unreachable
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// Versioned storage for genomes and the evolution log.
///
/// Implementations must be read-after-write consistent: a genome returned
/// by `put` or `supersede` is visible to the next `get_active` for its kind.
#[async_trait]
pub trait GenomeStore: Send + Sync {
    /// First active genome of a kind (ordered by name).
    async fn get_active(&self, kind: ExecutorKind) -> Result<Option<Genome>>;

    /// All active genomes of a kind, ordered by name.
    async fn list_active(&self, kind: ExecutorKind) -> Result<Vec<Genome>>;

    /// Load any genome version by id.
    async fn get(&self, id: GenomeId) -> Result<Option<Genome>>;

    /// Insert a new genome.
    ///
    /// Rejects an id that already exists and a second active genome for
    /// the same (kind, name).
    async fn put(&self, genome: &Genome) -> Result<GenomeId>;

    /// Atomically retire `prior` and insert its successor.
    ///
    /// The successor must be active, of the same kind and name, with
    /// `parent_id == prior` and `generation == prior.generation + 1`.
    /// The prior record changes only its `status`.
    async fn supersede(&self, prior: GenomeId, successor: &Genome) -> Result<()>;

    /// Append an evolution event and return the sequence number assigned.
    async fn append_event(&self, event: &EvolutionEvent) -> Result<u64>;

    /// Every version of a kind, oldest generation first.
    async fn list_lineage(&self, kind: ExecutorKind) -> Result<Vec<Genome>>;

    /// Parent chain of a genome, founder first, ending with the genome itself.
    async fn lineage_of(&self, id: GenomeId) -> Result<Vec<Genome>>;

    /// The most recent `limit` events in sequence order.
    async fn list_events(&self, limit: usize) -> Result<Vec<EvolutionEvent>>;
}

/// Storage for cycle outcomes.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Persist an outcome. Idempotent by cycle id.
    ///
    /// Returns `false` when the outcome was already stored.
    async fn persist_outcome(&self, outcome: &CycleOutcome) -> Result<bool>;

    /// The most recent `limit` outcomes, newest first.
    async fn recent_outcomes(&self, limit: usize) -> Result<Vec<CycleOutcome>>;

    /// Summary of all persisted outcomes.
    async fn memory_state(&self) -> Result<MemoryState>;
}
