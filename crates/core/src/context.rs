//! Environment context - the read-only snapshot a cycle starts from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::kind::ExecutorKind;
use crate::Time;

/// Cap on the number of recent errors kept in a memory state.
pub const MAX_RECENT_ERRORS: usize = 10;

/// Summary of past cycles, derived from persisted outcomes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryState {
    /// Cycles persisted so far
    pub total_cycles: u64,

    /// Fraction of persisted cycles that succeeded, in [0, 1]
    pub success_rate: f64,

    /// Most recent diagnostic messages, newest first
    pub recent_errors: Vec<String>,
}

/// Snapshot of the environment taken at PERCEIVING.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentContext {
    /// Arbitrary environment facts
    pub facts: BTreeMap<String, serde_json::Value>,

    /// Explicit request for this cycle, if any
    pub request: Option<String>,

    /// Explicit feedback addressed to an executor kind
    pub feedback: BTreeMap<ExecutorKind, String>,

    /// Memory of past cycles
    pub memory: MemoryState,

    /// When the snapshot was taken
    pub captured_at: Time,
}

impl Default for EnvironmentContext {
    fn default() -> Self {
        Self {
            facts: BTreeMap::new(),
            request: None,
            feedback: BTreeMap::new(),
            memory: MemoryState::default(),
            captured_at: chrono::Utc::now(),
        }
    }
}

impl EnvironmentContext {
    /// Context carrying a single request.
    pub fn with_request(request: impl Into<String>) -> Self {
        Self {
            request: Some(request.into()),
            ..Self::default()
        }
    }

    /// Add a fact.
    pub fn fact(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.facts.insert(key.into(), value);
        self
    }

    /// Add feedback for an executor kind.
    pub fn feedback_for(mut self, kind: ExecutorKind, text: impl Into<String>) -> Self {
        self.feedback.insert(kind, text.into());
        self
    }

    /// Short hash of the facts and request, used to detect environment change.
    ///
    /// Returns the first 16 hex characters of a SHA-256 digest.
    pub fn hash(&self) -> String {
        let data = serde_json::json!({
            "facts": self.facts,
            "request": self.request,
        });
        let digest = Sha256::digest(data.to_string().as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(16);
        hex
    }

    /// Render the context as a planning prompt.
    pub fn to_prompt(&self) -> String {
        let facts = serde_json::to_string_pretty(&self.facts).unwrap_or_else(|_| "{}".into());
        let errors = if self.memory.recent_errors.is_empty() {
            "  (none)".to_string()
        } else {
            self.memory
                .recent_errors
                .iter()
                .map(|e| format!("  - {}", e))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "## Environment\n\n\
             ### Facts\n{}\n\n\
             ### Memory\n\
             - cycles: {}\n\
             - success rate: {:.0}%\n\
             - recent errors:\n{}\n\n\
             ### Request\n{}\n",
            facts,
            self.memory.total_cycles,
            self.memory.success_rate * 100.0,
            errors,
            self.request.as_deref().unwrap_or("Decide the next most useful action."),
        )
    }
}
