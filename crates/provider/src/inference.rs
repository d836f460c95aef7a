//! Inference provider abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A stateless prompt-to-response service.
///
/// Every call is a potential suspension point; callers bound it with
/// their own deadline.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Generate a response for the request.
    async fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse, ProviderError>;
}

/// Errors a provider can surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Too many requests; retry later
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Response could not be understood
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Provider cannot be reached
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// True if retrying may help.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProviderError::Malformed(_))
    }
}

/// What shape of answer the caller expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expect {
    /// Free text
    #[default]
    Text,
    /// A structured action plan
    Plan,
    /// A single JSON object
    Json,
}

/// Generation constraints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    /// Expected answer shape
    pub expect: Expect,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// System instructions
    pub system: Option<String>,

    /// Soft cap on answer length
    pub max_chars: Option<usize>,
}

/// A request to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Prompt text
    pub prompt: String,

    /// Constraints on the answer
    pub constraints: Constraints,
}

impl InferenceRequest {
    /// A free-text request.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            constraints: Constraints::default(),
        }
    }

    /// A request for a structured plan.
    pub fn plan(prompt: impl Into<String>) -> Self {
        Self::text(prompt).expect(Expect::Plan)
    }

    /// A request for a JSON object.
    pub fn json(prompt: impl Into<String>) -> Self {
        Self::text(prompt).expect(Expect::Json)
    }

    /// Set the expected shape.
    pub fn expect(mut self, expect: Expect) -> Self {
        self.constraints.expect = expect;
        self
    }

    /// Set system instructions.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.constraints.system = Some(system.into());
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.constraints.temperature = Some(temperature);
        self
    }
}

/// The body of a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Free text (may embed JSON)
    Text(String),
    /// Already-structured plan
    Plan(PlanDraft),
}

/// A provider response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    /// Answer body
    pub body: ResponseBody,

    /// Provider's confidence in [0, 1]
    pub confidence: f32,
}

impl InferenceResponse {
    /// A text response.
    pub fn text(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            body: ResponseBody::Text(text.into()),
            confidence,
        }
    }

    /// A plan response.
    pub fn plan(plan: PlanDraft, confidence: f32) -> Self {
        Self {
            body: ResponseBody::Plan(plan),
            confidence,
        }
    }

    /// The text body, or the plan rendered as JSON.
    pub fn into_text(self) -> String {
        match self.body {
            ResponseBody::Text(text) => text,
            ResponseBody::Plan(plan) => serde_json::to_string(&plan).unwrap_or_default(),
        }
    }
}

/// A plan as proposed by the provider, before the router validates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanDraft {
    /// Explanation of the plan
    #[serde(default)]
    pub reasoning: String,

    /// Confidence stated inside the plan, if any
    #[serde(default)]
    pub confidence: Option<f32>,

    /// Proposed steps, in submission order
    #[serde(default, alias = "actions", alias = "tasks")]
    pub steps: Vec<PlanStep>,
}

/// One proposed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Executor kind name (validated by the router)
    #[serde(alias = "type")]
    pub kind: String,

    /// Instruction for the executor
    #[serde(alias = "target", alias = "description")]
    pub payload: String,

    /// Priority 0-10
    #[serde(default)]
    pub priority: u8,

    /// Indices of earlier steps whose output this step consumes
    #[serde(default)]
    pub depends_on: Vec<usize>,

    /// Per-step deadline in milliseconds
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl PlanStep {
    /// An independent step.
    pub fn new(kind: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
            priority: 0,
            depends_on: Vec::new(),
            deadline_ms: None,
        }
    }

    /// Declare a dependency on an earlier step.
    pub fn after(mut self, index: usize) -> Self {
        self.depends_on.push(index);
        self
    }
}
