//! Supervisor/router - decomposes a request, runs the stages, aggregates.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use genesis_core::{
    CycleId, CycleOutcome, Diagnostic, EnvironmentContext, ErrorKind, ExecutorKind, KindTally,
    Task, TaskError, TaskId, TaskResult,
};
use genesis_provider::{
    parse_plan, InferenceProvider, InferenceRequest, PlanDraft, ProviderError, ResponseBody,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::dependency::{self, Resolution};
use crate::scheduler::ExecutorPool;

const PLANNER_SYSTEM: &str = "You are the GENESIS planner. Break the request into tasks for \
specialised executors. Answer with JSON only.";

/// Router tuning.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Plans below this confidence are replaced by the keyword fallback
    pub min_confidence: f32,
    /// Steps beyond this count are dropped
    pub max_tasks: usize,
    /// Kind used when no keyword matches
    pub fallback_kind: ExecutorKind,
    /// Bound on the planning call
    pub planning_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            max_tasks: 16,
            fallback_kind: ExecutorKind::Research,
            planning_timeout: Duration::from_secs(60),
        }
    }
}

impl RouterConfig {
    /// Set the confidence threshold.
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Set the step cap.
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    /// Set the planning timeout.
    pub fn with_planning_timeout(mut self, timeout: Duration) -> Self {
        self.planning_timeout = timeout;
        self
    }
}

/// Why a provider plan was not used.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Provider failed
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Provider was not confident enough
    #[error("confidence {confidence:.2} below threshold {threshold:.2}")]
    LowConfidence {
        /// Stated confidence
        confidence: f32,
        /// Configured threshold
        threshold: f32,
    },

    /// Planning call did not finish in time
    #[error("planning timed out after {0:?}")]
    Timeout(Duration),
}

/// Validated set of tasks for one cycle.
#[derive(Debug, Clone, Default)]
pub struct ActionPlan {
    /// Tasks in submission order
    pub tasks: Vec<Task>,
    /// Steps dropped while validating the plan
    pub rejected: Vec<Diagnostic>,
    /// Planner's explanation
    pub reasoning: String,
    /// Confidence of the plan
    pub confidence: f32,
    /// True if the keyword fallback produced the plan
    pub fallback: bool,
    /// Hash of the context the plan was made from
    pub context_hash: String,
}

impl ActionPlan {
    /// Plan from ready-made tasks.
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            confidence: 1.0,
            ..Self::default()
        }
    }

    /// True if there is nothing to run.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drop tasks with the same kind and payload as an earlier task.
    ///
    /// The earlier submission id wins; dependencies on a dropped duplicate
    /// are redirected to the winner. Returns the number dropped.
    pub fn dedup(&mut self) -> usize {
        self.tasks.sort_by_key(|t| t.seq);

        let mut winners: HashMap<(ExecutorKind, [u8; 32]), TaskId> = HashMap::new();
        let mut redirect: HashMap<TaskId, TaskId> = HashMap::new();
        let mut kept = Vec::with_capacity(self.tasks.len());

        for task in self.tasks.drain(..) {
            let key = (task.kind, payload_hash(&task.payload));
            match winners.get(&key) {
                Some(winner) => {
                    debug!(task = %task.id, winner = %winner, "dropping duplicate task");
                    redirect.insert(task.id, *winner);
                }
                None => {
                    winners.insert(key, task.id);
                    kept.push(task);
                }
            }
        }

        let dropped = redirect.len();
        for task in &mut kept {
            let mut deps: Vec<TaskId> = Vec::with_capacity(task.depends_on.len());
            for dep in &task.depends_on {
                let target = redirect.get(dep).copied().unwrap_or(*dep);
                if !deps.contains(&target) {
                    deps.push(target);
                }
            }
            task.depends_on = deps;
        }
        self.tasks = kept;
        dropped
    }
}

fn payload_hash(payload: &str) -> [u8; 32] {
    Sha256::digest(payload.as_bytes()).into()
}

/// Decomposes requests and fans tasks out to the pool.
pub struct Router {
    provider: Arc<dyn InferenceProvider>,
    pool: Arc<ExecutorPool>,
    config: RouterConfig,
}

impl Router {
    /// Create a router.
    pub fn new(provider: Arc<dyn InferenceProvider>, pool: Arc<ExecutorPool>, config: RouterConfig) -> Self {
        Self { provider, pool, config }
    }

    /// Pool the router dispatches to.
    pub fn pool(&self) -> &Arc<ExecutorPool> {
        &self.pool
    }

    /// Turn the context's request into a plan.
    ///
    /// Asks the provider first; on error, malformed answer or low
    /// confidence the keyword fallback is used instead.
    pub async fn decompose(&self, ctx: &EnvironmentContext) -> ActionPlan {
        let mut plan = match self.request_plan(ctx).await {
            Ok((draft, confidence)) => self.from_draft(draft, confidence),
            Err(e) => {
                warn!(error = %e, "using fallback decomposition");
                self.fallback(ctx)
            }
        };
        plan.context_hash = ctx.hash();
        info!(
            tasks = plan.tasks.len(),
            rejected = plan.rejected.len(),
            fallback = plan.fallback,
            "plan ready"
        );
        plan
    }

    async fn request_plan(&self, ctx: &EnvironmentContext) -> Result<(PlanDraft, f32), PlanError> {
        let kinds = ExecutorKind::ALL
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = format!(
            "{}\n\nRespond with JSON of the form \
             {{\"reasoning\": \"...\", \"confidence\": 0.0-1.0, \"steps\": \
             [{{\"kind\": \"one of: {}\", \"payload\": \"instruction\", \"priority\": 0-10, \
             \"depends_on\": [indices of earlier steps]}}]}}",
            ctx.to_prompt(),
            kinds
        );
        let request = InferenceRequest::plan(prompt).with_system(PLANNER_SYSTEM);

        let response = tokio::time::timeout(self.config.planning_timeout, self.provider.generate(&request))
            .await
            .map_err(|_| PlanError::Timeout(self.config.planning_timeout))??;

        let (draft, confidence) = match response.body {
            ResponseBody::Plan(draft) => {
                let confidence = draft.confidence.unwrap_or(response.confidence);
                (draft, confidence)
            }
            ResponseBody::Text(text) => {
                if response.confidence < self.config.min_confidence {
                    return Err(PlanError::LowConfidence {
                        confidence: response.confidence,
                        threshold: self.config.min_confidence,
                    });
                }
                let draft = parse_plan(&text)?;
                let confidence = draft.confidence.unwrap_or(response.confidence);
                (draft, confidence)
            }
        };

        if confidence < self.config.min_confidence {
            return Err(PlanError::LowConfidence {
                confidence,
                threshold: self.config.min_confidence,
            });
        }
        Ok((draft, confidence))
    }

    fn from_draft(&self, draft: PlanDraft, confidence: f32) -> ActionPlan {
        let mut rejected = Vec::new();
        let mut steps = draft.steps;
        if steps.len() > self.config.max_tasks {
            warn!(steps = steps.len(), max = self.config.max_tasks, "plan truncated");
            steps.truncate(self.config.max_tasks);
        }

        // One id per step index, so dependencies can be mapped before
        // knowing which steps survive validation.
        let ids: Vec<TaskId> = steps.iter().map(|_| TaskId::new()).collect();
        let mut valid = vec![false; steps.len()];
        let mut tasks = Vec::new();

        for (idx, step) in steps.into_iter().enumerate() {
            let kind = match step.kind.parse::<ExecutorKind>() {
                Ok(kind) => kind,
                Err(reason) => {
                    rejected.push(Diagnostic {
                        task_id: None,
                        kind: ErrorKind::Config,
                        message: format!("step {}: {}", idx, reason),
                    });
                    continue;
                }
            };
            if step.payload.trim().is_empty() {
                rejected.push(Diagnostic {
                    task_id: None,
                    kind: ErrorKind::Config,
                    message: format!("step {}: empty payload", idx),
                });
                continue;
            }

            let mut task = Task::new(idx as u64, kind, step.payload).with_priority(step.priority.min(10));
            task.id = ids[idx];
            if let Some(ms) = step.deadline_ms {
                task = task.with_deadline(Duration::from_millis(ms));
            }
            for dep in step.depends_on {
                // Out-of-range or self references become dangling ids.
                let target = if dep < ids.len() && dep != idx {
                    ids[dep]
                } else {
                    TaskId::new()
                };
                task.depends_on.push(target);
            }
            valid[idx] = true;
            tasks.push(task);
        }

        // Dependencies on rejected steps must dangle, not point at a phantom.
        for task in &mut tasks {
            for dep in &mut task.depends_on {
                if let Some(pos) = ids.iter().position(|id| id == dep) {
                    if !valid[pos] {
                        *dep = TaskId::new();
                    }
                }
            }
        }

        ActionPlan {
            tasks,
            rejected,
            reasoning: draft.reasoning,
            confidence,
            fallback: false,
            context_hash: String::new(),
        }
    }

    /// Deterministic decomposition by keyword.
    ///
    /// One independent task per kind whose keywords appear in the request,
    /// in fixed kind order; the fallback kind when none match. No request
    /// means an empty plan.
    pub fn fallback(&self, ctx: &EnvironmentContext) -> ActionPlan {
        let Some(request) = ctx.request.as_deref().map(str::trim).filter(|r| !r.is_empty()) else {
            return ActionPlan {
                fallback: true,
                reasoning: "no request".into(),
                ..ActionPlan::default()
            };
        };

        let lowered = request.to_lowercase();
        let mut kinds: Vec<ExecutorKind> = ExecutorKind::ALL
            .iter()
            .copied()
            .filter(|k| k.keywords().iter().any(|kw| lowered.contains(kw)))
            .collect();
        if kinds.is_empty() {
            kinds.push(self.config.fallback_kind);
        }

        let tasks = kinds
            .into_iter()
            .enumerate()
            .map(|(seq, kind)| Task::new(seq as u64, kind, request))
            .collect();

        ActionPlan {
            tasks,
            rejected: Vec::new(),
            reasoning: "keyword fallback".into(),
            confidence: 0.0,
            fallback: true,
            context_hash: String::new(),
        }
    }

    /// Run a plan stage by stage and aggregate the results.
    pub async fn execute_plan(&self, cycle_id: CycleId, mut plan: ActionPlan) -> CycleOutcome {
        let started_at = chrono::Utc::now();
        plan.dedup();

        if plan.tasks.is_empty() {
            let mut outcome = CycleOutcome::noop(cycle_id, plan.context_hash, started_at);
            if !plan.rejected.is_empty() {
                outcome.noop = false;
                outcome.success = false;
                outcome.diagnostics = plan.rejected;
            }
            return outcome;
        }

        let staging = dependency::stage(&plan.tasks);
        let by_id = dependency::index(&plan.tasks);
        let mut results: HashMap<TaskId, TaskResult> = HashMap::new();
        let mut kinds_touched = BTreeSet::new();

        for (id, why) in staging.unresolved {
            let message = match why {
                Resolution::Dangling(missing) => format!("depends on unknown task {}", missing),
                Resolution::Circular => "dependency cycle".to_string(),
            };
            results.insert(id, TaskResult::failure(id, TaskError::new(ErrorKind::Config, message), Duration::ZERO));
        }

        for (level, stage) in staging.stages.into_iter().enumerate() {
            let mut batch = Vec::with_capacity(stage.len());
            for id in stage {
                let Some(task) = by_id.get(&id) else { continue };
                if !task.is_dependent() {
                    batch.push((*task).clone());
                    continue;
                }

                let mut upstream: Vec<&Task> = task.depends_on.iter().filter_map(|d| by_id.get(d).copied()).collect();
                upstream.sort_by_key(|u| u.seq);

                if let Some(failed) = upstream
                    .iter()
                    .find(|u| !results.get(&u.id).map_or(false, TaskResult::is_success))
                {
                    let error = TaskError::new(
                        ErrorKind::Dependency,
                        format!("upstream task {} did not succeed", failed.seq),
                    );
                    results.insert(id, TaskResult::failure(id, error, Duration::ZERO));
                    continue;
                }

                let inputs = upstream
                    .iter()
                    .filter_map(|u| results.get(&u.id))
                    .map(|r| r.output.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                batch.push(task.reissue(format!("{}\n\nInput from upstream tasks:\n{}", task.payload, inputs)));
            }

            if batch.is_empty() {
                continue;
            }
            debug!(stage = level, tasks = batch.len(), "dispatching stage");
            kinds_touched.extend(batch.iter().map(|t| t.kind));
            for result in self.pool.dispatch_all(batch).await {
                results.insert(result.task_id, result);
            }
        }

        aggregate(cycle_id, plan, results, kinds_touched.into_iter().collect(), started_at)
    }

    /// Decompose and execute in one call.
    pub async fn route(&self, cycle_id: CycleId, ctx: &EnvironmentContext) -> CycleOutcome {
        let plan = self.decompose(ctx).await;
        self.execute_plan(cycle_id, plan).await
    }
}

/// Fold task results into one outcome.
///
/// Success iff at least one terminal task succeeded. The output joins the
/// successful terminal outputs in submission order, whatever order they
/// completed in.
fn aggregate(
    cycle_id: CycleId,
    plan: ActionPlan,
    mut results: HashMap<TaskId, TaskResult>,
    kinds_touched: Vec<ExecutorKind>,
    started_at: genesis_core::Time,
) -> CycleOutcome {
    let terminal = dependency::terminal_tasks(&plan.tasks);
    let mut tasks = plan.tasks;
    tasks.sort_by_key(|t| t.seq);

    let mut diagnostics = plan.rejected;
    let mut outputs = Vec::new();
    let mut ordered = Vec::with_capacity(tasks.len());
    let mut tally: BTreeMap<ExecutorKind, KindTally> = BTreeMap::new();

    for task in &tasks {
        let result = results.remove(&task.id).unwrap_or_else(|| {
            TaskResult::failure(
                task.id,
                TaskError::new(ErrorKind::Unclassified, "task produced no result"),
                Duration::ZERO,
            )
        });

        // Dependency and config failures never reached an executor.
        let attributable = !matches!(
            result.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::Dependency) | Some(ErrorKind::Config)
        );
        if attributable {
            tally.entry(task.kind).or_default().record(result.is_success());
        }

        if result.is_success() {
            if terminal.contains(&task.id) {
                outputs.push(result.output.clone());
            }
        } else {
            let (kind, message) = match &result.error {
                Some(e) => (e.kind, e.message.clone()),
                None => (ErrorKind::Unclassified, "failed without a reason".to_string()),
            };
            diagnostics.push(Diagnostic {
                task_id: Some(task.id),
                kind,
                message,
            });
        }
        ordered.push(result);
    }

    let success = !outputs.is_empty();
    info!(
        cycle = %cycle_id,
        tasks = ordered.len(),
        failed = diagnostics.len(),
        success,
        "plan executed"
    );

    CycleOutcome {
        cycle_id,
        success,
        noop: false,
        output: outputs.join("\n\n"),
        results: ordered,
        diagnostics,
        kinds_touched,
        tally,
        context_hash: plan.context_hash,
        started_at,
        completed_at: chrono::Utc::now(),
    }
}
