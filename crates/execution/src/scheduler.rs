//! Executor pool - bounded, FIFO dispatch of task batches.

use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use genesis_core::{ErrorKind, ExecutorKind, RetryPolicy, Task, TaskError, TaskResult};
use genesis_provider::InferenceProvider;
use genesis_storage::GenomeStore;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::{AgentError, ExecutorAgent};
use crate::population::{Membership, Population};
use crate::registry::ExecutorRegistry;

/// Default concurrency limit.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Pool limits and timeouts.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Max tasks running at once
    pub max_concurrency: NonZeroUsize,
    /// Upper bound for any single task
    pub task_timeout: Duration,
    /// Scheduling boundary for a whole batch
    pub batch_timeout: Duration,
    /// Max age of the population snapshot before a refresh from the store
    pub refresh_interval: Duration,
    /// Retry policy for provider calls
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: NonZeroUsize::new(DEFAULT_MAX_CONCURRENCY).unwrap_or(NonZeroUsize::MIN),
            task_timeout: Duration::from_secs(60),
            batch_timeout: Duration::from_secs(300),
            refresh_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Create a new config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max concurrent tasks.
    pub fn with_max_concurrency(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Set the per-task timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Set the batch timeout.
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Set the staleness interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the provider retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Errors from acquiring an executor.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No active genome for the kind
    #[error("no active genome for kind {0}")]
    NoExecutor(ExecutorKind),

    /// Genome could not be loaded
    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl PoolError {
    fn into_task_error(self) -> TaskError {
        TaskError::new(ErrorKind::Config, self.to_string())
    }
}

/// Owns the executor population and runs batches under a concurrency cap.
pub struct ExecutorPool {
    config: PoolConfig,
    registry: ExecutorRegistry,
    provider: Arc<dyn InferenceProvider>,
    population: Arc<Population>,
    store: Option<Arc<dyn GenomeStore>>,
    permits: Arc<Semaphore>,
}

impl ExecutorPool {
    /// Create a pool over a population.
    pub fn new(
        config: PoolConfig,
        registry: ExecutorRegistry,
        provider: Arc<dyn InferenceProvider>,
        population: Arc<Population>,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrency.get())),
            config,
            registry,
            provider,
            population,
            store: None,
        }
    }

    /// Refresh the population from `store` between batches when stale.
    pub fn with_store(mut self, store: Arc<dyn GenomeStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Shared population.
    pub fn population(&self) -> &Arc<Population> {
        &self.population
    }

    /// Registry used to load genomes.
    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Provider shared by all agents.
    pub fn provider(&self) -> &Arc<dyn InferenceProvider> {
        &self.provider
    }

    /// Executor for the first active genome of `kind`.
    pub async fn acquire(&self, kind: ExecutorKind) -> Result<ExecutorAgent, PoolError> {
        let membership = self.population.snapshot().await;
        self.acquire_from(&membership, kind, 0)
    }

    fn acquire_from(
        &self,
        membership: &Membership,
        kind: ExecutorKind,
        seq: u64,
    ) -> Result<ExecutorAgent, PoolError> {
        let genome = membership.select(kind, seq).ok_or(PoolError::NoExecutor(kind))?;
        Ok(self.registry.build(genome, self.provider.clone(), self.config.retry)?)
    }

    async fn refresh_if_stale(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let age = self.population.snapshot().await.age();
        if age < self.config.refresh_interval {
            return;
        }
        match self.population.reload(store.as_ref()).await {
            Ok(true) => {}
            Ok(false) => debug!("population refresh superseded by a newer swap"),
            Err(e) => warn!(error = %e, "population refresh failed, keeping previous snapshot"),
        }
    }

    /// Run a batch and return one result per task, in submission order.
    ///
    /// At most `max_concurrency` tasks run at once; the rest wait and start
    /// in submission order. When the batch deadline passes, tasks that have
    /// not started are reported as timed out and never start; tasks already
    /// running are reported as timed out but keep running under their own
    /// deadline. Results that arrived before the deadline are kept.
    pub async fn dispatch_all(&self, tasks: Vec<Task>) -> Vec<TaskResult> {
        if tasks.is_empty() {
            return Vec::new();
        }
        self.refresh_if_stale().await;

        let membership = self.population.snapshot().await;
        let batch_start = Instant::now();
        let deadline = batch_start + self.config.batch_timeout;
        let n = tasks.len();
        let ids: Vec<_> = tasks.iter().map(|t| t.id).collect();

        info!(tasks = n, version = membership.version(), "dispatching batch");

        let started: Arc<Vec<AtomicBool>> = Arc::new((0..n).map(|_| AtomicBool::new(false)).collect());
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, TaskResult)>();

        // Resolve agents up front against the snapshot.
        let jobs: Vec<(Task, Result<ExecutorAgent, PoolError>)> = tasks
            .into_iter()
            .map(|task| {
                let agent = self.acquire_from(&membership, task.kind, task.seq);
                (task, agent)
            })
            .collect();

        let feeder = {
            let permits = self.permits.clone();
            let started = started.clone();
            let closed = closed.clone();
            let task_timeout = self.config.task_timeout;
            tokio::spawn(async move {
                for (idx, (task, agent)) in jobs.into_iter().enumerate() {
                    let agent = match agent {
                        Ok(agent) => agent,
                        Err(e) => {
                            let _ = tx.send((idx, TaskResult::failure(task.id, e.into_task_error(), Duration::ZERO)));
                            continue;
                        }
                    };

                    let permit = tokio::select! {
                        permit = permits.clone().acquire_owned() => permit,
                        _ = tokio::time::sleep_until(deadline) => break,
                    };
                    let Ok(permit) = permit else { break };
                    if closed.load(Ordering::SeqCst) || Instant::now() >= deadline {
                        break;
                    }
                    started[idx].store(true, Ordering::SeqCst);

                    let timeout = task.deadline.map_or(task_timeout, |d| d.min(task_timeout));
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let run = AssertUnwindSafe(agent.execute(&task, timeout)).catch_unwind().await;
                        let result = run.unwrap_or_else(|_| {
                            TaskResult::failure(
                                task.id,
                                TaskError::new(ErrorKind::Unclassified, "executor panicked"),
                                Duration::ZERO,
                            )
                        });
                        if tx.send((idx, result)).is_err() {
                            debug!(task = %task.id, "batch already closed, late result dropped");
                        }
                    });
                }
            })
        };

        let mut slots: Vec<Option<TaskResult>> = vec![None; n];
        let mut filled = 0;
        while filled < n {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((idx, result))) => {
                    if slots[idx].is_none() {
                        filled += 1;
                    }
                    slots[idx] = Some(result);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(pending = n - filled, "batch deadline elapsed");
                    break;
                }
            }
        }
        closed.store(true, Ordering::SeqCst);
        if filled == n {
            let _ = feeder.await;
        }

        let elapsed = batch_start.elapsed();
        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    if started[idx].load(Ordering::SeqCst) {
                        TaskResult::timeout(ids[idx], "batch deadline elapsed while running", elapsed)
                    } else {
                        TaskResult::timeout(ids[idx], "batch deadline elapsed before start", Duration::ZERO)
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genesis_core::{GenomeSpec, Genome, TaskStatus};
    use genesis_provider::{Reply, ScriptedProvider};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn genome(kind: ExecutorKind) -> Genome {
        Genome::founder(
            kind,
            kind.as_str(),
            "test",
            GenomeSpec {
                instructions: "x".into(),
                temperature: 0.5,
                capabilities: vec![],
            },
        )
    }

    async fn pool_with(provider: Arc<dyn InferenceProvider>, config: PoolConfig) -> ExecutorPool {
        let population = Arc::new(Population::new());
        for kind in [ExecutorKind::Research, ExecutorKind::Analysis, ExecutorKind::Synthesis] {
            population.replace(kind, vec![genome(kind)]).await;
        }
        ExecutorPool::new(config, ExecutorRegistry::standard(), provider, population)
    }

    /// Provider that sleeps for the number of milliseconds given in the prompt's
    /// first line and answers with the payload.
    fn sleepy() -> ScriptedProvider {
        ScriptedProvider::new(|req| {
            let payload = req.prompt.lines().nth(1).unwrap_or_default().to_string();
            let ms: u64 = payload.split(':').next().and_then(|s| s.parse().ok()).unwrap_or(0);
            if payload.ends_with(":fail") {
                return Reply::error(genesis_provider::ProviderError::Malformed("bad".into()))
                    .after(Duration::from_millis(ms));
            }
            Reply::text(payload).after(Duration::from_millis(ms))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_result_per_task_in_submission_order() {
        let pool = pool_with(Arc::new(sleepy()), PoolConfig::default()).await;
        // Later tasks finish first.
        let tasks: Vec<Task> = (0..5)
            .map(|i| Task::new(i, ExecutorKind::Research, format!("{}:t{}", 50 - i * 10, i)))
            .collect();
        let ids: Vec<_> = tasks.iter().map(|t| t.id).collect();

        let results = pool.dispatch_all(tasks).await;
        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().map(|r| r.task_id).collect::<Vec<_>>(), ids);
        assert!(results.iter().all(|r| r.status == TaskStatus::Success));
        assert_eq!(results[0].output, "50:t0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded_and_fifo() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Probe {
            running: Arc<AtomicUsize>,
            peak: Arc<AtomicUsize>,
            order: Arc<Mutex<Vec<String>>>,
        }

        #[async_trait::async_trait]
        impl InferenceProvider for Probe {
            fn name(&self) -> &str {
                "probe"
            }

            async fn generate(
                &self,
                request: &genesis_provider::InferenceRequest,
            ) -> Result<genesis_provider::InferenceResponse, genesis_provider::ProviderError> {
                let payload = request.prompt.lines().nth(1).unwrap_or_default().to_string();
                self.order.lock().unwrap().push(payload.clone());
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                self.running.fetch_sub(1, Ordering::SeqCst);
                Ok(genesis_provider::InferenceResponse::text(payload, 1.0))
            }
        }

        let provider = Arc::new(Probe {
            running: running.clone(),
            peak: peak.clone(),
            order: order.clone(),
        });
        let config = PoolConfig::default().with_max_concurrency(NonZeroUsize::new(2).unwrap());
        let pool = pool_with(provider, config).await;

        let tasks: Vec<Task> = (0..6)
            .map(|i| Task::new(i, ExecutorKind::Analysis, format!("task-{}", i)))
            .collect();
        let results = pool.dispatch_all(tasks).await;

        assert_eq!(results.len(), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        let started = order.lock().unwrap().clone();
        assert_eq!(started, (0..6).map(|i| format!("task-{}", i)).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_deadline_marks_pending_as_timeout() {
        let config = PoolConfig::default()
            .with_max_concurrency(NonZeroUsize::new(1).unwrap())
            .with_batch_timeout(Duration::from_millis(150));
        let pool = pool_with(Arc::new(sleepy()), config).await;

        let tasks = vec![
            Task::new(0, ExecutorKind::Research, "100:fast"),
            Task::new(1, ExecutorKind::Research, "1000:slow"),
            Task::new(2, ExecutorKind::Research, "10:never"),
        ];
        let results = pool.dispatch_all(tasks).await;

        assert_eq!(results[0].status, TaskStatus::Success);
        assert_eq!(results[1].status, TaskStatus::Timeout);
        assert!(results[1].error.as_ref().unwrap().message.contains("while running"));
        assert_eq!(results[2].status, TaskStatus::Timeout);
        assert!(results[2].error.as_ref().unwrap().message.contains("before start"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated() {
        let pool = pool_with(Arc::new(sleepy()), PoolConfig::default()).await;
        let tasks = vec![
            Task::new(0, ExecutorKind::Research, "5:a"),
            Task::new(1, ExecutorKind::Research, "1:b:fail"),
            Task::new(2, ExecutorKind::Code, "c"),
            Task::new(3, ExecutorKind::Synthesis, "3:d"),
        ];
        let results = pool.dispatch_all(tasks).await;

        assert_eq!(results[0].status, TaskStatus::Success);
        assert_eq!(results[1].error.as_ref().unwrap().kind, ErrorKind::Validation);
        // No Code genome in the population.
        assert_eq!(results[2].error.as_ref().unwrap().kind, ErrorKind::Config);
        assert_eq!(results[3].status, TaskStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_waits_for_interval_and_batch_boundary() {
        let store = Arc::new(genesis_storage::MemoryStore::new());
        let mut g0 = genome(ExecutorKind::Research);
        g0.spec.instructions = "v0".into();
        store.put(&g0).await.unwrap();
        let population = Arc::new(Population::load(store.as_ref()).await.unwrap());

        // Answers with the genome's instructions after 400ms.
        let provider = Arc::new(ScriptedProvider::new(|req| {
            Reply::text(req.constraints.system.clone().unwrap_or_default()).after(Duration::from_millis(400))
        }));
        let config = PoolConfig::default()
            .with_max_concurrency(NonZeroUsize::new(1).unwrap())
            .with_refresh_interval(Duration::from_secs(1));
        let pool = ExecutorPool::new(config, ExecutorRegistry::standard(), provider, population).with_store(store.clone());

        let mut g1 = g0.successor(g0.spec.clone(), String::new());
        g1.spec.instructions = "v1".into();
        store.supersede(g0.id, &g1).await.unwrap();

        let outputs = |results: Vec<TaskResult>| results.into_iter().map(|r| r.output).collect::<Vec<_>>();

        // Snapshot still fresh: the commit is not visible yet.
        let first = pool.dispatch_all(vec![Task::new(0, ExecutorKind::Research, "a")]).await;
        assert_eq!(outputs(first), vec!["v0"]);

        // The interval passes mid-batch; the running batch keeps its snapshot.
        let second = pool
            .dispatch_all(vec![
                Task::new(1, ExecutorKind::Research, "b"),
                Task::new(2, ExecutorKind::Research, "c"),
            ])
            .await;
        assert_eq!(outputs(second), vec!["v0", "v0"]);

        // Next batch after the interval sees the new genome.
        let third = pool.dispatch_all(vec![Task::new(3, ExecutorKind::Research, "d")]).await;
        assert_eq!(outputs(third), vec!["v1"]);
    }

    #[tokio::test]
    async fn test_acquire_reports_missing_kind() {
        let pool = pool_with(Arc::new(sleepy()), PoolConfig::default()).await;
        assert!(pool.acquire(ExecutorKind::Research).await.is_ok());
        assert!(matches!(
            pool.acquire(ExecutorKind::Code).await,
            Err(PoolError::NoExecutor(ExecutorKind::Code))
        ));
    }
}
