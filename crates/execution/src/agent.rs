//! Executor agents - one addressable unit of work per genome.
//!
//! A genome is "loaded" by turning it into one of a fixed set of variants.
//! Variants differ only in how a task payload becomes a provider request
//! and how the answer is post-processed.

use std::sync::Arc;
use std::time::Duration;

use genesis_core::{
    ErrorKind, ExecutorKind, Genome, RetryPolicy, Task, TaskError, TaskResult,
};
use genesis_provider::{strip_code_fences, InferenceProvider, InferenceRequest, ProviderError};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::validate::CodeValidator;

/// Placeholder substituted by custom executors.
pub const PAYLOAD_PLACEHOLDER: &str = "{payload}";

/// Errors building an agent from a genome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    /// No constructor registered for the kind
    #[error("no executor registered for kind {0}")]
    Unregistered(ExecutorKind),

    /// Genome cannot be turned into an executor
    #[error("invalid genome {id}: {reason}")]
    InvalidGenome {
        /// Genome id
        id: String,
        /// What is wrong
        reason: String,
    },
}

/// Kind-specific behaviour.
#[derive(Debug, Clone)]
pub enum Variant {
    /// Gathers facts
    Research,
    /// Evaluates and compares
    Analysis,
    /// Writes summaries
    Synthesis,
    /// Generates code, then validates it
    Code(CodeValidator),
    /// Fills a prompt template from the genome artifact
    Custom {
        /// Template containing `{payload}`
        template: String,
    },
}

/// An executor bound to one genome and one provider.
#[derive(Clone)]
pub struct ExecutorAgent {
    genome: Arc<Genome>,
    provider: Arc<dyn InferenceProvider>,
    variant: Variant,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ExecutorAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorAgent")
            .field("genome", &self.genome.id)
            .field("kind", &self.genome.kind)
            .field("provider", &self.provider.name())
            .finish()
    }
}

impl ExecutorAgent {
    /// Bind a genome to a variant.
    pub fn new(
        genome: Arc<Genome>,
        variant: Variant,
        provider: Arc<dyn InferenceProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            genome,
            provider,
            variant,
            retry,
        }
    }

    /// Genome this agent runs.
    pub fn genome(&self) -> &Genome {
        &self.genome
    }

    /// Executor kind.
    pub fn kind(&self) -> ExecutorKind {
        self.genome.kind
    }

    fn request(&self, task: &Task) -> InferenceRequest {
        let spec = &self.genome.spec;
        let prompt = match &self.variant {
            Variant::Research => format!(
                "Research task:\n{}\n\nReport the relevant facts and where they come from.",
                task.payload
            ),
            Variant::Analysis => format!(
                "Analyse the following:\n{}\n\nGive your findings, then a short conclusion.",
                task.payload
            ),
            Variant::Synthesis => format!(
                "Write a clear, well-structured synthesis of:\n{}",
                task.payload
            ),
            Variant::Code(_) => {
                let mut prompt = format!(
                    "Write code for:\n{}\n\nReturn only the code, in a single fenced block.",
                    task.payload
                );
                if !self.genome.logic_artifact.trim().is_empty() {
                    prompt.push_str("\n\nFollow the conventions of this reference:\n```\n");
                    prompt.push_str(&self.genome.logic_artifact);
                    prompt.push_str("\n```");
                }
                prompt
            }
            Variant::Custom { template } => template.replace(PAYLOAD_PLACEHOLDER, &task.payload),
        };

        InferenceRequest::text(prompt)
            .with_system(spec.instructions.clone())
            .with_temperature(spec.temperature)
    }

    fn post_process(&self, raw: String) -> Result<String, TaskError> {
        match &self.variant {
            Variant::Code(validator) => {
                let code = strip_code_fences(&raw);
                validator
                    .validate(&code)
                    .map_err(|reason| TaskError::new(ErrorKind::Validation, reason))?;
                Ok(code)
            }
            _ => {
                let text = raw.trim();
                if text.is_empty() {
                    return Err(TaskError::new(ErrorKind::Validation, "provider returned empty output"));
                }
                Ok(text.to_string())
            }
        }
    }

    /// Run the task within `timeout`.
    ///
    /// Never fails: every outcome, including provider errors, validation
    /// failures and elapsed deadlines, is reported in the result.
    pub async fn execute(&self, task: &Task, timeout: Duration) -> TaskResult {
        let started = Instant::now();
        let deadline = started + timeout;

        if task.kind != self.genome.kind {
            return TaskResult::failure(
                task.id,
                TaskError::new(
                    ErrorKind::Config,
                    format!("task kind {} sent to {} executor", task.kind, self.genome.kind),
                ),
                started.elapsed(),
            );
        }

        let request = self.request(task);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let call = tokio::time::timeout_at(deadline, self.provider.generate(&request)).await;
            let error = match call {
                Err(_) => {
                    return TaskResult::timeout(
                        task.id,
                        format!("no answer within {:?}", timeout),
                        started.elapsed(),
                    );
                }
                Ok(Ok(response)) => {
                    return match self.post_process(response.into_text()) {
                        Ok(output) => {
                            debug!(task = %task.id, genome = %self.genome.id, attempt, "task succeeded");
                            TaskResult::success(task.id, output, started.elapsed())
                        }
                        Err(error) => {
                            warn!(task = %task.id, genome = %self.genome.id, %error, "output rejected");
                            TaskResult::failure(task.id, error, started.elapsed())
                        }
                    };
                }
                Ok(Err(error)) => error,
            };

            let delay = self.retry.delay_after(attempt);
            let retryable = error.is_transient()
                && attempt < max_attempts
                && Instant::now() + delay < deadline;
            if !retryable {
                return TaskResult::failure(task.id, classify(&error), started.elapsed());
            }
            warn!(task = %task.id, attempt, max_attempts, %error, "provider call failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

fn classify(error: &ProviderError) -> TaskError {
    match error {
        ProviderError::Malformed(msg) => TaskError::new(ErrorKind::Validation, msg.clone()),
        other => TaskError::new(ErrorKind::Provider, other.to_string()),
    }
}
