//! Evolver - proposes, checks and commits genome mutations.
//!
//! A mutation never edits a genome. It creates a successor, supersedes the
//! prior in the store, appends an event and then publishes the kind's new
//! membership to the population.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use genesis_core::{CycleId, CycleOutcome, EvolutionEvent, ExecutorKind, Genome, RetryPolicy, Task};
use genesis_execution::{ExecutorRegistry, Population};
use genesis_provider::{InferenceProvider, InferenceRequest, ProviderError};
use genesis_storage::{GenomeStore, StoreError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::analyzer::{Analyzer, Trigger};
use crate::candidate::{Candidate, CandidateCheck};
use crate::metrics::{KindStatistics, PerformanceTracker};

const EVOLVER_SYSTEM: &str = "You revise the genomes of GENESIS executors. \
Keep changes small and targeted. Answer with a single JSON object.";

/// Errors that abort an evolution attempt without recording it.
#[derive(Debug, thiserror::Error)]
pub enum EvolveError {
    /// Store failed; nothing was recorded
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for evolution.
pub type Result<T> = std::result::Result<T, EvolveError>;

/// Evolver tuning.
#[derive(Debug, Clone)]
pub struct EvolverConfig {
    /// Task results kept per kind
    pub window: usize,
    /// Samples needed before the success rate counts
    pub min_samples: usize,
    /// Success rate below which a kind is underperforming
    pub threshold: f64,
    /// Shape and safety limits on candidates
    pub check: CandidateCheck,
    /// Run each candidate once against a sample task before committing
    pub smoke_test: bool,
    /// Payload of the smoke task
    pub smoke_payload: String,
    /// Bound on the smoke task
    pub smoke_timeout: Duration,
    /// Bound on each provider call
    pub call_timeout: Duration,
    /// Retries for transient provider failures
    pub retry: RetryPolicy,
    /// Ancestors included in the mutation prompt
    pub lineage_depth: usize,
}

impl Default for EvolverConfig {
    fn default() -> Self {
        Self {
            window: 10,
            min_samples: 3,
            threshold: 0.5,
            check: CandidateCheck::default(),
            smoke_test: false,
            smoke_payload: "Describe in one sentence what you do.".to_string(),
            smoke_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            lineage_depth: 5,
        }
    }
}

impl EvolverConfig {
    /// Set the window size.
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Set the minimum sample count.
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// Set the success-rate threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Enable the smoke run with the given payload.
    pub fn with_smoke_test(mut self, payload: impl Into<String>) -> Self {
        self.smoke_test = true;
        self.smoke_payload = payload.into();
        self
    }

    /// Set the provider retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the candidate limits.
    pub fn with_check(mut self, check: CandidateCheck) -> Self {
        self.check = check;
        self
    }
}

/// Watches per-kind performance and mutates underperforming genomes.
pub struct Evolver {
    store: Arc<dyn GenomeStore>,
    provider: Arc<dyn InferenceProvider>,
    population: Arc<Population>,
    registry: ExecutorRegistry,
    analyzer: Analyzer,
    config: EvolverConfig,
    tracker: Mutex<PerformanceTracker>,
}

impl Evolver {
    /// Create an evolver that commits to `store` and publishes to `population`.
    pub fn new(
        store: Arc<dyn GenomeStore>,
        provider: Arc<dyn InferenceProvider>,
        population: Arc<Population>,
        config: EvolverConfig,
    ) -> Self {
        Self {
            store,
            provider,
            population,
            registry: ExecutorRegistry::standard(),
            analyzer: Analyzer::new(config.threshold),
            tracker: Mutex::new(PerformanceTracker::new(config.window, config.min_samples)),
            config,
        }
    }

    /// Use a custom registry to load candidates.
    pub fn with_registry(mut self, registry: ExecutorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Configuration.
    pub fn config(&self) -> &EvolverConfig {
        &self.config
    }

    /// Feed a cycle's results into the per-kind windows.
    pub async fn observe(&self, outcome: &CycleOutcome) {
        self.tracker.lock().await.observe(outcome);
    }

    /// Current window statistics per kind.
    pub async fn statistics(&self) -> BTreeMap<ExecutorKind, KindStatistics> {
        self.tracker.lock().await.statistics()
    }

    /// Consider mutating `genome` after `outcome`, on the rate signal alone.
    pub async fn consider(&self, outcome: &CycleOutcome, genome: &Genome) -> Result<Option<EvolutionEvent>> {
        self.consider_with_feedback(outcome, genome, None).await
    }

    /// Consider mutating `genome`, with optional explicit feedback.
    ///
    /// Returns the recorded event, or `None` when nothing triggered.
    pub async fn consider_with_feedback(
        &self,
        outcome: &CycleOutcome,
        genome: &Genome,
        feedback: Option<&str>,
    ) -> Result<Option<EvolutionEvent>> {
        let Some(trigger) = self.assess(genome.kind, feedback).await else {
            return Ok(None);
        };
        let event = self.mutate(outcome, genome, &trigger).await?;
        if event.is_some() {
            self.tracker.lock().await.reset(genome.kind);
        }
        Ok(event)
    }

    /// Consider every active genome of a kind against one trigger.
    pub async fn evolve_kind(
        &self,
        outcome: &CycleOutcome,
        kind: ExecutorKind,
        feedback: Option<&str>,
    ) -> Result<Vec<EvolutionEvent>> {
        let Some(trigger) = self.assess(kind, feedback).await else {
            debug!(kind = %kind, "no evolution trigger");
            return Ok(Vec::new());
        };
        self.mutate_all(outcome, &trigger).await
    }

    /// Mutate every active genome of a kind without waiting for a signal.
    pub async fn force(&self, kind: ExecutorKind) -> Result<Vec<EvolutionEvent>> {
        let outcome = CycleOutcome::noop(CycleId::new(), "", chrono::Utc::now());
        self.mutate_all(&outcome, &Trigger::manual(kind)).await
    }

    async fn mutate_all(&self, outcome: &CycleOutcome, trigger: &Trigger) -> Result<Vec<EvolutionEvent>> {
        let mut events = Vec::new();
        for genome in self.store.list_active(trigger.kind).await? {
            if let Some(event) = self.mutate(outcome, &genome, trigger).await? {
                events.push(event);
            }
        }
        if !events.is_empty() {
            self.tracker.lock().await.reset(trigger.kind);
        }
        Ok(events)
    }

    async fn assess(&self, kind: ExecutorKind, feedback: Option<&str>) -> Option<Trigger> {
        let rate = self.tracker.lock().await.success_rate(kind);
        self.analyzer.assess(kind, feedback, rate)
    }

    async fn mutate(&self, outcome: &CycleOutcome, genome: &Genome, trigger: &Trigger) -> Result<Option<EvolutionEvent>> {
        // Work from the stored record; the caller's copy may be stale.
        let prior = match self.store.get(genome.id).await? {
            Some(prior) if prior.is_active() => prior,
            _ => {
                debug!(genome = %genome.id, "genome no longer active, skipping");
                return Ok(None);
            }
        };
        info!(kind = %prior.kind, name = %prior.name, generation = prior.generation, reason = %trigger, "evolution triggered");

        let lineage = self.store.lineage_of(prior.id).await?;
        let request = InferenceRequest::json(self.prompt(&prior, trigger, &lineage, outcome))
            .with_system(EVOLVER_SYSTEM)
            .with_temperature(0.7);

        let answer = match self.ask(&request).await {
            Ok(text) => text,
            Err(e) => return self.reject(&prior, trigger, format!("provider: {}", e)).await.map(Some),
        };
        let candidate = match Candidate::parse(&answer) {
            Ok(candidate) => candidate,
            Err(reason) => return self.reject(&prior, trigger, reason).await.map(Some),
        };

        let (spec, artifact) = candidate.resolve(&prior);
        let successor = prior.successor(spec, artifact);
        if let Err(reason) = self.validate(&candidate, &prior, &successor).await {
            return self.reject(&prior, trigger, reason).await.map(Some);
        }

        self.store.supersede(prior.id, &successor).await?;
        let mut event = EvolutionEvent::accepted(prior.kind, &prior.name, prior.id, successor.id, trigger.to_string());
        event.detail = candidate.rationale;
        event.seq = self.store.append_event(&event).await?;

        let active = self.store.list_active(prior.kind).await?;
        self.population.replace(prior.kind, active).await;

        info!(
            kind = %prior.kind,
            name = %prior.name,
            generation = successor.generation,
            seq = event.seq,
            "genome superseded"
        );
        Ok(Some(event))
    }

    async fn ask(&self, request: &InferenceRequest) -> std::result::Result<String, ProviderError> {
        let provider = &self.provider;
        let timeout = self.config.call_timeout;
        let response = self
            .config
            .retry
            .retry_if(
                |_| async move {
                    match tokio::time::timeout(timeout, provider.generate(request)).await {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Unavailable(format!("no answer within {:?}", timeout))),
                    }
                },
                ProviderError::is_transient,
            )
            .await?;
        Ok(response.into_text())
    }

    async fn validate(&self, candidate: &Candidate, prior: &Genome, successor: &Genome) -> std::result::Result<(), String> {
        self.config.check.check(candidate, prior, successor)?;

        let agent = self
            .registry
            .build(Arc::new(successor.clone()), self.provider.clone(), RetryPolicy::none())
            .map_err(|e| e.to_string())?;

        if self.config.smoke_test {
            let task = Task::new(0, successor.kind, self.config.smoke_payload.clone());
            let result = agent.execute(&task, self.config.smoke_timeout).await;
            if !result.is_success() {
                let reason = result.error.map(|e| e.to_string()).unwrap_or_default();
                return Err(format!("smoke test failed: {}", reason));
            }
        }
        Ok(())
    }

    async fn reject(&self, prior: &Genome, trigger: &Trigger, reason: String) -> Result<EvolutionEvent> {
        warn!(kind = %prior.kind, name = %prior.name, %reason, "candidate rejected");
        let mut event = EvolutionEvent::rejected(prior.kind, &prior.name, prior.id, trigger.to_string(), reason);
        event.seq = self.store.append_event(&event).await?;
        Ok(event)
    }

    fn prompt(&self, genome: &Genome, trigger: &Trigger, lineage: &[Genome], outcome: &CycleOutcome) -> String {
        let current = serde_json::json!({
            "instructions": genome.spec.instructions,
            "temperature": genome.spec.temperature,
            "capabilities": genome.spec.capabilities,
            "logic_artifact": genome.logic_artifact,
        });
        let current = serde_json::to_string_pretty(&current).unwrap_or_default();

        let mut prompt = format!(
            "Executor '{}' ({}, generation {}) needs a revised genome.\n\n\
             ## Current genome\n```json\n{}\n```\n\n## Trigger\n{}\n",
            genome.name, genome.kind, genome.generation, current, trigger
        );

        let ancestors: Vec<&Genome> = lineage
            .iter()
            .rev()
            .filter(|g| g.id != genome.id)
            .take(self.config.lineage_depth)
            .collect();
        if !ancestors.is_empty() {
            prompt.push_str("\n## Lineage (newest first)\n");
            for g in ancestors {
                let first_line = g.spec.instructions.lines().next().unwrap_or("");
                prompt.push_str(&format!("- generation {}: {}\n", g.generation, first_line));
            }
        }

        if !outcome.diagnostics.is_empty() {
            prompt.push_str("\n## Recent failures\n");
            for d in outcome.diagnostics.iter().take(5) {
                prompt.push_str(&format!("- {}: {}\n", d.kind, d.message));
            }
        }

        prompt.push_str(
            "\nReturn the revised genome as a JSON object with the same fields, \
             plus \"rationale\" and \"confidence\" (0.0-1.0).",
        );
        prompt
    }
}
