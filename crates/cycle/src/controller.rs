//! The cycle controller - runs the loop:
//!
//! ```text
//! Idle → Perceiving → Thinking → Acting → Remembering → Evolving → Idle
//! ```
//!
//! One control task drives the state machine. Evolution runs in a spawned
//! task bounded by a budget; when the budget elapses the task keeps running
//! and later cycles queue their kinds behind it.

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use genesis_core::{CycleId, CycleOutcome, EnvironmentContext, ErrorKind, EvolutionEvent, ExecutorKind, RetryPolicy};
use genesis_evolution::{EvolveError, Evolver};
use genesis_execution::Router;
use genesis_provider::{
    topic, Envelope, EnvironmentError, EnvironmentProvider, MessageBus, CYCLE_CHANNEL, EVOLUTION_CHANNEL,
};
use genesis_storage::{OutcomeStore, StoreError};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::report::{ControllerStatus, CycleReport, EvolutionSummary, Phase};

/// Configuration for the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Pause between cycles
    pub cycle_interval: Duration,
    /// Pause after a failed perceive
    pub failure_backoff: Duration,
    /// Bound on the environment snapshot
    pub perceive_timeout: Duration,
    /// Time the evolving phase may block the loop
    pub evolution_budget: Duration,
    /// Evolve on every Nth cycle
    pub evolve_every: u64,
    /// Whether the evolving phase runs at all
    pub auto_evolve: bool,
    /// Backoff for outcome persistence
    pub persist_retry: RetryPolicy,
    /// Stop after this many cycles (None = run until stopped)
    pub max_cycles: Option<u64>,
    /// Bus topic prefix
    pub topic_prefix: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(60),
            failure_backoff: Duration::from_secs(5),
            perceive_timeout: Duration::from_secs(30),
            evolution_budget: Duration::from_secs(30),
            evolve_every: 1,
            auto_evolve: true,
            persist_retry: RetryPolicy::exponential(3, Duration::from_millis(200)),
            max_cycles: None,
            topic_prefix: "genesis".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Set the pause between cycles.
    pub fn with_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    /// Set the pause after a failed perceive.
    pub fn with_failure_backoff(mut self, backoff: Duration) -> Self {
        self.failure_backoff = backoff;
        self
    }

    /// Set the evolution budget.
    pub fn with_evolution_budget(mut self, budget: Duration) -> Self {
        self.evolution_budget = budget;
        self
    }

    /// Evolve every `n` cycles.
    pub fn with_evolve_every(mut self, n: u64) -> Self {
        self.evolve_every = n;
        self
    }

    /// Enable or disable the evolving phase.
    pub fn with_auto_evolve(mut self, enabled: bool) -> Self {
        self.auto_evolve = enabled;
        self
    }

    /// Set the persistence backoff.
    pub fn with_persist_retry(mut self, retry: RetryPolicy) -> Self {
        self.persist_retry = retry;
        self
    }

    /// Stop after `max` cycles.
    pub fn with_max_cycles(mut self, max: u64) -> Self {
        self.max_cycles = Some(max);
        self
    }

    /// Set the bus topic prefix.
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }
}

/// Errors inside a cycle. None of them stops the loop.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    /// Environment snapshot failed
    #[error("perceive failed: {0}")]
    Perceive(#[from] EnvironmentError),

    /// Outcome could not be persisted
    #[error("persist failed: {0}")]
    Persist(#[from] StoreError),

    /// Evolution aborted on a store error
    #[error("evolution failed: {0}")]
    Evolve(#[from] EvolveError),

    /// Evolution task panicked or was cancelled
    #[error("evolution task failed: {0}")]
    EvolutionTask(String),

    /// Configuration rejected at construction
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Evolution running in the background past its budget.
struct PendingEvolution {
    handle: JoinHandle<EvolutionSummary>,
    kinds: Vec<ExecutorKind>,
}

/// Kinds to evolve, each with the feedback that applies to it.
type EvolutionWork = BTreeMap<ExecutorKind, Option<String>>;

/// Drives cycles.
pub struct CycleController {
    environment: Arc<dyn EnvironmentProvider>,
    router: Arc<Router>,
    evolver: Arc<Evolver>,
    outcomes: Arc<dyn OutcomeStore>,
    bus: Option<Arc<dyn MessageBus>>,
    config: ControllerConfig,
    phase: Phase,
    cycles: u64,
    degraded: u64,
    started: Instant,
    pending: Option<PendingEvolution>,
    deferred: EvolutionWork,
}

impl CycleController {
    /// Create a controller.
    pub fn new(
        environment: Arc<dyn EnvironmentProvider>,
        router: Arc<Router>,
        evolver: Arc<Evolver>,
        outcomes: Arc<dyn OutcomeStore>,
        config: ControllerConfig,
    ) -> Result<Self, CycleError> {
        if config.evolve_every == 0 {
            return Err(CycleError::Config("evolve_every must be at least 1".into()));
        }
        router
            .pool()
            .registry()
            .check(&ExecutorKind::ALL)
            .map_err(|e| CycleError::Config(e.to_string()))?;
        Ok(Self {
            environment,
            router,
            evolver,
            outcomes,
            bus: None,
            config,
            phase: Phase::Idle,
            cycles: 0,
            degraded: 0,
            started: Instant::now(),
            pending: None,
            deferred: BTreeMap::new(),
        })
    }

    /// Publish outcomes and evolution events on `bus`.
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run one cycle against the environment's own request.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.run_cycle_with(None).await
    }

    /// Run one cycle, optionally overriding the environment's request.
    pub async fn run_cycle_with(&mut self, request: Option<String>) -> CycleReport {
        let cycle_id = CycleId::new();
        let started_at = chrono::Utc::now();
        let mut phases = Vec::new();
        let mut degraded = false;
        info!(cycle = %cycle_id, n = self.cycles + 1, "cycle started");

        self.enter(Phase::Perceiving, &mut phases);
        // Feedback is only carried forward when the plan actually ran.
        let (outcome, feedback) = match self.perceive(request).await {
            Err(e) => {
                warn!(cycle = %cycle_id, error = %e, "perceive failed");
                (CycleOutcome::failed(cycle_id, ErrorKind::Unclassified, e.to_string(), started_at), None)
            }
            Ok(ctx) => {
                self.enter(Phase::Thinking, &mut phases);
                match guarded(self.router.decompose(&ctx)).await {
                    Err(panic) => {
                        degraded = true;
                        error!(cycle = %cycle_id, %panic, "thinking panicked");
                        (CycleOutcome::failed(cycle_id, ErrorKind::Unclassified, panic, started_at), None)
                    }
                    Ok(plan) if plan.is_empty() => {
                        info!(cycle = %cycle_id, rejected = plan.rejected.len(), "empty plan");
                        (self.router.execute_plan(cycle_id, plan).await, None)
                    }
                    Ok(plan) => {
                        self.enter(Phase::Acting, &mut phases);
                        match guarded(self.router.execute_plan(cycle_id, plan)).await {
                            Ok(outcome) => (outcome, Some(ctx.feedback)),
                            Err(panic) => {
                                degraded = true;
                                error!(cycle = %cycle_id, %panic, "acting panicked");
                                (CycleOutcome::failed(cycle_id, ErrorKind::Unclassified, panic, started_at), None)
                            }
                        }
                    }
                }
            }
        };

        self.enter(Phase::Remembering, &mut phases);
        let persisted = match self.persist(&outcome).await {
            Ok(_) => true,
            Err(e) => {
                error!(cycle = %cycle_id, error = %e, "outcome not persisted, cycle degraded");
                degraded = true;
                false
            }
        };
        publish(self.bus.as_ref(), &self.config.topic_prefix, CYCLE_CHANNEL, cycle_id.to_string(), &outcome).await;
        if !outcome.noop {
            self.evolver.observe(&outcome).await;
        }
        self.cycles += 1;

        let mut evolution = EvolutionSummary::default();
        match feedback {
            Some(feedback) if self.evolution_due() => {
                self.enter(Phase::Evolving, &mut phases);
                evolution = self.evolve(&outcome, feedback).await;
                if !evolution.errors.is_empty() {
                    degraded = true;
                }
            }
            Some(_) => debug!(cycle = %cycle_id, "evolution not due"),
            None => debug!(cycle = %cycle_id, "evolution skipped"),
        }

        self.enter(Phase::Idle, &mut phases);
        if degraded {
            self.degraded += 1;
        }
        info!(
            cycle = %cycle_id,
            success = outcome.success,
            tasks = outcome.results.len(),
            persisted,
            degraded,
            events = evolution.events.len(),
            "cycle completed"
        );

        CycleReport {
            cycle_id,
            phases,
            outcome,
            persisted,
            degraded,
            evolution,
        }
    }

    /// Run cycles until `stop` flips or `max_cycles` is reached.
    ///
    /// Returns the number of cycles run. Pending evolution is awaited
    /// before returning.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) -> u64 {
        info!(interval = ?self.config.cycle_interval, max_cycles = ?self.config.max_cycles, "controller started");
        let mut ran = 0;

        loop {
            if *stop.borrow() {
                info!("stop requested");
                break;
            }
            if self.limit_reached() {
                info!(cycles = self.cycles, "reached max cycles");
                break;
            }

            let report = self.run_cycle().await;
            ran += 1;
            if self.limit_reached() {
                continue;
            }

            let pause = if report.perceive_failed() {
                self.config.failure_backoff
            } else {
                self.config.cycle_interval
            };
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        info!("stop handle dropped");
                        break;
                    }
                }
            }
        }

        let drained = self.shutdown().await;
        info!(cycles = ran, late_events = drained.events.len(), "controller stopped");
        ran
    }

    /// Wait for background evolution, then run any deferred kinds.
    pub async fn shutdown(&mut self) -> EvolutionSummary {
        let mut summary = EvolutionSummary::default();
        if let Some(pending) = self.pending.take() {
            info!(kinds = ?pending.kinds, "waiting for background evolution");
            absorb(&mut summary, pending.handle.await);
        }
        if !self.deferred.is_empty() {
            let work = std::mem::take(&mut self.deferred);
            let outcome = CycleOutcome::noop(CycleId::new(), "", chrono::Utc::now());
            let job = evolution_job(self.evolver.clone(), self.bus.clone(), self.config.topic_prefix.clone(), outcome, work);
            absorb(&mut summary, tokio::spawn(job).await);
        }
        summary
    }

    /// Mutate every active genome now, whatever the signals say.
    pub async fn force_evolve(&mut self) -> Result<Vec<EvolutionEvent>, CycleError> {
        let mut events = self.shutdown().await.events;
        info!("forced evolution");
        for kind in ExecutorKind::ALL {
            for event in self.evolver.force(kind).await? {
                publish(self.bus.as_ref(), &self.config.topic_prefix, EVOLUTION_CHANNEL, event.id.to_string(), &event).await;
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Current status.
    pub fn status(&self) -> ControllerStatus {
        let every = self.config.evolve_every.max(1);
        ControllerStatus {
            phase: self.phase,
            cycles: self.cycles,
            degraded_cycles: self.degraded,
            uptime: self.started.elapsed(),
            next_evolution_in: every - (self.cycles % every),
            evolution_pending: self.pending.is_some(),
            deferred: self.deferred.keys().copied().collect(),
        }
    }

    fn enter(&mut self, phase: Phase, phases: &mut Vec<Phase>) {
        debug!(from = %self.phase, to = %phase, "phase transition");
        if phase != Phase::Idle {
            info!(phase = %phase, "entering phase");
        }
        self.phase = phase;
        phases.push(phase);
    }

    fn limit_reached(&self) -> bool {
        self.config.max_cycles.is_some_and(|max| self.cycles >= max)
    }

    fn evolution_due(&self) -> bool {
        self.config.auto_evolve && self.cycles % self.config.evolve_every.max(1) == 0
    }

    async fn perceive(&self, request: Option<String>) -> Result<EnvironmentContext, CycleError> {
        let mut ctx = tokio::time::timeout(self.config.perceive_timeout, self.environment.snapshot())
            .await
            .map_err(|_| EnvironmentError::Unavailable(format!("no snapshot within {:?}", self.config.perceive_timeout)))??;

        match self.outcomes.memory_state().await {
            Ok(memory) => ctx.memory = memory,
            Err(e) => warn!(error = %e, "memory state unavailable"),
        }
        if let Some(request) = request {
            ctx.request = Some(request);
        }
        debug!(hash = %ctx.hash(), facts = ctx.facts.len(), "context captured");
        Ok(ctx)
    }

    async fn persist(&self, outcome: &CycleOutcome) -> Result<bool, CycleError> {
        let outcomes = &self.outcomes;
        let written = self
            .config
            .persist_retry
            .retry(|attempt| async move {
                debug!(cycle = %outcome.cycle_id, attempt, "persisting outcome");
                outcomes.persist_outcome(outcome).await
            })
            .await?;
        if !written {
            debug!(cycle = %outcome.cycle_id, "outcome already persisted");
        }
        Ok(written)
    }

    async fn evolve(&mut self, outcome: &CycleOutcome, feedback: BTreeMap<ExecutorKind, String>) -> EvolutionSummary {
        let mut summary = EvolutionSummary::default();
        let touched = outcome.kinds_touched.iter().map(|k| (*k, feedback.get(k).cloned()));

        if let Some(pending) = self.pending.take() {
            if !pending.handle.is_finished() {
                for (kind, feedback) in touched {
                    queue(&mut self.deferred, kind, feedback);
                }
                summary.deferred = self.deferred.keys().copied().collect();
                info!(running = ?pending.kinds, deferred = ?summary.deferred, "evolution still running, kinds deferred");
                self.pending = Some(pending);
                return summary;
            }
            absorb(&mut summary, pending.handle.await);
        }

        let mut work = std::mem::take(&mut self.deferred);
        for (kind, feedback) in touched {
            queue(&mut work, kind, feedback);
        }
        if work.is_empty() {
            return summary;
        }

        let kinds: Vec<ExecutorKind> = work.keys().copied().collect();
        let job = evolution_job(
            self.evolver.clone(),
            self.bus.clone(),
            self.config.topic_prefix.clone(),
            outcome.clone(),
            work,
        );
        let mut handle = tokio::spawn(job);

        match tokio::time::timeout(self.config.evolution_budget, &mut handle).await {
            Ok(joined) => absorb(&mut summary, joined),
            Err(_) => {
                warn!(budget = ?self.config.evolution_budget, kinds = ?kinds, "evolution over budget, continuing in background");
                summary.deferred = kinds.clone();
                self.pending = Some(PendingEvolution { handle, kinds });
            }
        }
        summary
    }
}

/// Queue a kind, keeping the newest non-empty feedback.
fn queue(work: &mut EvolutionWork, kind: ExecutorKind, feedback: Option<String>) {
    let slot = work.entry(kind).or_insert(None);
    if feedback.is_some() {
        *slot = feedback;
    }
}

fn absorb(summary: &mut EvolutionSummary, joined: Result<EvolutionSummary, JoinError>) {
    match joined {
        Ok(run) => {
            summary.events.extend(run.events);
            summary.errors.extend(run.errors);
        }
        Err(e) => {
            error!(error = %e, "evolution task failed");
            summary.errors.push(CycleError::EvolutionTask(e.to_string()).to_string());
        }
    }
}

async fn evolution_job(
    evolver: Arc<Evolver>,
    bus: Option<Arc<dyn MessageBus>>,
    prefix: String,
    outcome: CycleOutcome,
    work: EvolutionWork,
) -> EvolutionSummary {
    let mut summary = EvolutionSummary::default();
    for (kind, feedback) in work {
        match evolver.evolve_kind(&outcome, kind, feedback.as_deref()).await {
            Ok(events) => {
                for event in events {
                    publish(bus.as_ref(), &prefix, EVOLUTION_CHANNEL, event.id.to_string(), &event).await;
                    summary.events.push(event);
                }
            }
            Err(e) => {
                let e = CycleError::from(e);
                error!(kind = %kind, error = %e, "evolution aborted");
                summary.errors.push(format!("{}: {}", kind, e));
            }
        }
    }
    summary
}

async fn publish<T: Serialize>(
    bus: Option<&Arc<dyn MessageBus>>,
    prefix: &str,
    channel: &str,
    id: String,
    payload: &T,
) {
    let Some(bus) = bus else { return };
    let topic = topic(prefix, channel);
    let envelope = match Envelope::new(topic.clone(), id, payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(%topic, error = %e, "could not encode bus message");
            return;
        }
    };
    if let Err(e) = bus.publish(envelope).await {
        warn!(%topic, error = %e, "bus publish failed");
    }
}

/// Run a phase, turning a panic into an error message.
async fn guarded<T>(fut: impl Future<Output = T>) -> Result<T, String> {
    AssertUnwindSafe(fut).catch_unwind().await.map_err(panic_message)
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use genesis_core::MemoryState;
    use genesis_evolution::EvolverConfig;
    use genesis_execution::{
        default_founders, seed_founders, ExecutorPool, ExecutorRegistry, Population, PoolConfig, RouterConfig,
    };
    use genesis_provider::{
        EchoProvider, InMemoryBus, InferenceProvider, InferenceRequest, InferenceResponse, PlanDraft, PlanStep,
        ProviderError, Reply, ScriptedProvider, StaticEnvironment,
    };
    use genesis_storage::{GenomeStore, MemoryStore};
    use tokio::sync::Semaphore;

    /// Executors answer "done" unless the prompt mentions "fail".
    fn executor_provider() -> Arc<dyn InferenceProvider> {
        Arc::new(ScriptedProvider::new(|req| {
            if req.prompt.contains("fail") {
                Reply::error(ProviderError::Malformed("refused".into()))
            } else {
                Reply::text("done")
            }
        }))
    }

    fn environment(ctx: EnvironmentContext) -> Arc<dyn EnvironmentProvider> {
        Arc::new(StaticEnvironment::new(ctx))
    }

    struct Harness {
        store: Arc<MemoryStore>,
        bus: Arc<InMemoryBus>,
        controller: CycleController,
    }

    async fn harness(
        env: Arc<dyn EnvironmentProvider>,
        planner: Arc<dyn InferenceProvider>,
        mutator: Arc<dyn InferenceProvider>,
        outcomes: Option<Arc<dyn OutcomeStore>>,
        config: ControllerConfig,
    ) -> Harness {
        let store = Arc::new(MemoryStore::new());
        seed_founders(store.as_ref(), default_founders()).await.unwrap();
        let population = Arc::new(Population::load(store.as_ref()).await.unwrap());

        let pool = ExecutorPool::new(
            PoolConfig::default(),
            ExecutorRegistry::standard(),
            executor_provider(),
            population.clone(),
        );
        let router = Arc::new(Router::new(planner, Arc::new(pool), RouterConfig::default()));
        let evolver = Arc::new(Evolver::new(
            store.clone(),
            mutator,
            population,
            EvolverConfig::default().with_retry(RetryPolicy::none()),
        ));
        let outcomes = outcomes.unwrap_or_else(|| store.clone() as Arc<dyn OutcomeStore>);
        let bus = Arc::new(InMemoryBus::default());
        let controller = CycleController::new(env, router, evolver, outcomes, config)
            .unwrap()
            .with_bus(bus.clone());

        Harness { store, bus, controller }
    }

    fn planner_for(steps: Vec<PlanStep>) -> Arc<dyn InferenceProvider> {
        let draft = PlanDraft {
            reasoning: "scripted".into(),
            confidence: Some(0.9),
            steps,
        };
        Arc::new(ScriptedProvider::new(move |_| Reply::plan(draft.clone(), 0.9)))
    }

    /// Persists only after a number of failures.
    struct FlakyOutcomes {
        inner: MemoryStore,
        failures_left: AtomicU32,
        attempts: AtomicU32,
    }

    impl FlakyOutcomes {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures_left: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl OutcomeStore for FlakyOutcomes {
        async fn persist_outcome(&self, outcome: &CycleOutcome) -> genesis_storage::Result<bool> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("disk busy".into()));
            }
            self.inner.persist_outcome(outcome).await
        }

        async fn recent_outcomes(&self, limit: usize) -> genesis_storage::Result<Vec<CycleOutcome>> {
            self.inner.recent_outcomes(limit).await
        }

        async fn memory_state(&self) -> genesis_storage::Result<MemoryState> {
            self.inner.memory_state().await
        }
    }

    struct BrokenEnvironment;

    #[async_trait]
    impl EnvironmentProvider for BrokenEnvironment {
        async fn snapshot(&self) -> Result<EnvironmentContext, EnvironmentError> {
            Err(EnvironmentError::Unavailable("sensor offline".into()))
        }
    }

    /// Answers only once the test opens the gate.
    struct GatedProvider {
        gate: Semaphore,
        answer: String,
    }

    #[async_trait]
    impl InferenceProvider for GatedProvider {
        fn name(&self) -> &str {
            "gated"
        }

        async fn generate(&self, _request: &InferenceRequest) -> Result<InferenceResponse, ProviderError> {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| ProviderError::Unavailable("gate closed".into()))?;
            Ok(InferenceResponse::text(self.answer.clone(), 1.0))
        }
    }

    #[tokio::test]
    async fn test_empty_plan_skips_evolving() {
        let mut h = harness(
            environment(EnvironmentContext::default()),
            Arc::new(EchoProvider::new()),
            Arc::new(EchoProvider::new()),
            None,
            ControllerConfig::default(),
        )
        .await;

        let report = h.controller.run_cycle().await;
        assert_eq!(
            report.phases,
            vec![Phase::Perceiving, Phase::Thinking, Phase::Remembering, Phase::Idle]
        );
        assert!(report.outcome.noop);
        assert!(report.persisted);
        assert!(!report.degraded);
        assert!(report.evolution.events.is_empty());
        assert_eq!(h.store.recent_outcomes(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_success_cycle() {
        let planner = planner_for(vec![
            PlanStep::new("research", "alpha"),
            PlanStep::new("research", "please fail"),
            PlanStep::new("research", "gamma"),
        ]);
        let mut h = harness(
            environment(EnvironmentContext::with_request("three things")),
            planner,
            Arc::new(EchoProvider::new()),
            None,
            ControllerConfig::default(),
        )
        .await;
        let mut sub = h.bus.subscribe("genesis.");

        let report = h.controller.run_cycle().await;
        assert_eq!(
            report.phases,
            vec![
                Phase::Perceiving,
                Phase::Thinking,
                Phase::Acting,
                Phase::Remembering,
                Phase::Evolving,
                Phase::Idle
            ]
        );
        assert!(report.outcome.success);
        assert_eq!(report.outcome.diagnostics.len(), 1);
        assert_eq!(report.outcome.output, "done\n\ndone");
        // Two of three succeeded: above the threshold, so no mutation.
        assert!(report.evolution.events.is_empty());

        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.topic, "genesis.cycle");
        assert_eq!(envelope.id, report.cycle_id.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_retries_then_stores_once() {
        let flaky = Arc::new(FlakyOutcomes::new(2));
        let config = ControllerConfig::default().with_persist_retry(RetryPolicy::exponential(3, Duration::from_millis(10)));
        let mut h = harness(
            environment(EnvironmentContext::with_request("hello")),
            Arc::new(EchoProvider::new()),
            Arc::new(EchoProvider::new()),
            Some(flaky.clone() as Arc<dyn OutcomeStore>),
            config,
        )
        .await;

        let report = h.controller.run_cycle().await;
        assert!(report.persisted);
        assert!(!report.degraded);
        assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
        let stored = flaky.inner.recent_outcomes(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].cycle_id, report.cycle_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_exhaustion_degrades_cycle() {
        let flaky = Arc::new(FlakyOutcomes::new(u32::MAX));
        let config = ControllerConfig::default().with_persist_retry(RetryPolicy::exponential(3, Duration::from_millis(10)));
        let mut h = harness(
            environment(EnvironmentContext::with_request("hello")),
            Arc::new(EchoProvider::new()),
            Arc::new(EchoProvider::new()),
            Some(flaky.clone() as Arc<dyn OutcomeStore>),
            config,
        )
        .await;

        let report = h.controller.run_cycle().await;
        assert!(!report.persisted);
        assert!(report.degraded);
        assert_eq!(report.phases.last(), Some(&Phase::Idle));
        assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(h.controller.status().degraded_cycles, 1);
    }

    #[tokio::test]
    async fn test_perceive_failure_is_remembered() {
        let mut h = harness(
            Arc::new(BrokenEnvironment),
            Arc::new(EchoProvider::new()),
            Arc::new(EchoProvider::new()),
            None,
            ControllerConfig::default(),
        )
        .await;

        let report = h.controller.run_cycle().await;
        assert!(report.perceive_failed());
        assert_eq!(report.phases, vec![Phase::Perceiving, Phase::Remembering, Phase::Idle]);
        assert!(!report.outcome.success);
        assert!(report.outcome.diagnostics[0].message.contains("sensor offline"));
        assert_eq!(report.outcome.diagnostics[0].kind, ErrorKind::Unclassified);
        assert!(report.persisted);
    }

    #[tokio::test]
    async fn test_feedback_evolves_touched_kind() {
        let ctx = EnvironmentContext::with_request("hello").feedback_for(ExecutorKind::Research, "cite sources");
        let mutator = Arc::new(ScriptedProvider::queue([Reply::text(
            r#"{"instructions": "Research carefully and cite every source."}"#,
        )]));
        let mut h = harness(
            environment(ctx),
            Arc::new(EchoProvider::new()),
            mutator,
            None,
            ControllerConfig::default(),
        )
        .await;
        let mut sub = h.bus.subscribe("genesis.evolution");

        let report = h.controller.run_cycle().await;
        assert_eq!(report.evolution.accepted(), 1);
        let active = h.store.get_active(ExecutorKind::Research).await.unwrap().unwrap();
        assert_eq!(active.generation, 1);

        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.id, report.evolution.events[0].id.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_evolution_is_deferred_not_abandoned() {
        let ctx = EnvironmentContext::with_request("hello").feedback_for(ExecutorKind::Research, "cite sources");
        let mutator = Arc::new(GatedProvider {
            gate: Semaphore::new(0),
            answer: r#"{"instructions": "Cite every source."}"#.into(),
        });
        let config = ControllerConfig::default().with_evolution_budget(Duration::from_millis(50));
        let mut h = harness(environment(ctx), Arc::new(EchoProvider::new()), mutator.clone(), None, config).await;

        let first = h.controller.run_cycle().await;
        assert!(first.evolution.events.is_empty());
        assert_eq!(first.evolution.deferred, vec![ExecutorKind::Research]);
        assert!(h.controller.status().evolution_pending);

        // The next cycle does not wait; its kinds queue behind the running job.
        let second = h.controller.run_cycle().await;
        assert!(second.evolved());
        assert_eq!(second.evolution.deferred, vec![ExecutorKind::Research]);
        assert_eq!(h.controller.status().deferred, vec![ExecutorKind::Research]);

        mutator.gate.add_permits(4);
        let drained = h.controller.shutdown().await;
        // The background run commits; the queued rerun sees an unchanged candidate.
        assert_eq!(drained.events.len(), 2);
        assert!(drained.events[0].is_accepted());
        assert!(!drained.events[1].is_accepted());
        assert_eq!(h.store.list_events(10).await.unwrap().len(), 2);
        assert!(!h.controller.status().evolution_pending);
    }

    #[tokio::test]
    async fn test_evolve_every_other_cycle() {
        let config = ControllerConfig::default().with_evolve_every(2);
        let mut h = harness(
            environment(EnvironmentContext::with_request("hello")),
            Arc::new(EchoProvider::new()),
            Arc::new(EchoProvider::new()),
            None,
            config,
        )
        .await;

        assert_eq!(h.controller.status().next_evolution_in, 2);
        assert!(!h.controller.run_cycle().await.evolved());
        assert_eq!(h.controller.status().next_evolution_in, 1);
        assert!(h.controller.run_cycle().await.evolved());
        assert_eq!(h.controller.status().cycles, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_at_max_cycles() {
        let config = ControllerConfig::default()
            .with_cycle_interval(Duration::from_secs(1))
            .with_max_cycles(3);
        let mut h = harness(
            environment(EnvironmentContext::with_request("hello")),
            Arc::new(EchoProvider::new()),
            Arc::new(EchoProvider::new()),
            None,
            config,
        )
        .await;

        let (_handle, stop) = crate::stop_signal();
        assert_eq!(h.controller.run(stop).await, 3);
        assert_eq!(h.store.recent_outcomes(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_run_honours_prior_stop() {
        let mut h = harness(
            environment(EnvironmentContext::with_request("hello")),
            Arc::new(EchoProvider::new()),
            Arc::new(EchoProvider::new()),
            None,
            ControllerConfig::default(),
        )
        .await;

        let (handle, stop) = crate::stop_signal();
        handle.stop();
        assert_eq!(h.controller.run(stop).await, 0);
    }

    #[tokio::test]
    async fn test_zero_evolve_every_is_rejected() {
        let h = harness(
            environment(EnvironmentContext::default()),
            Arc::new(EchoProvider::new()),
            Arc::new(EchoProvider::new()),
            None,
            ControllerConfig::default(),
        )
        .await;
        let c = &h.controller;
        let result = CycleController::new(
            c.environment.clone(),
            c.router.clone(),
            c.evolver.clone(),
            c.outcomes.clone(),
            ControllerConfig::default().with_evolve_every(0),
        );
        assert!(matches!(result, Err(CycleError::Config(_))));
    }

    #[tokio::test]
    async fn test_missing_constructor_is_rejected_at_startup() {
        let h = harness(
            environment(EnvironmentContext::default()),
            Arc::new(EchoProvider::new()),
            Arc::new(EchoProvider::new()),
            None,
            ControllerConfig::default(),
        )
        .await;
        let c = &h.controller;
        let registry = ExecutorRegistry::empty().register(ExecutorKind::Research, |_| Ok(genesis_execution::Variant::Research));
        let pool = ExecutorPool::new(
            PoolConfig::default(),
            registry,
            executor_provider(),
            c.router.pool().population().clone(),
        );
        let router = Arc::new(Router::new(Arc::new(EchoProvider::new()), Arc::new(pool), RouterConfig::default()));

        let result = CycleController::new(
            c.environment.clone(),
            router,
            c.evolver.clone(),
            c.outcomes.clone(),
            ControllerConfig::default(),
        );
        match result {
            Err(CycleError::Config(message)) => assert!(message.contains("analysis")),
            _ => panic!("expected a configuration error"),
        }
    }

    #[test]
    fn test_queue_keeps_latest_feedback() {
        let mut work = EvolutionWork::new();
        queue(&mut work, ExecutorKind::Code, Some("a".into()));
        queue(&mut work, ExecutorKind::Code, None);
        assert_eq!(work[&ExecutorKind::Code].as_deref(), Some("a"));
        queue(&mut work, ExecutorKind::Code, Some("b".into()));
        assert_eq!(work[&ExecutorKind::Code].as_deref(), Some("b"));
    }
}
