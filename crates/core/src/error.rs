//! Cross-cutting error taxonomy.
//!
//! Components keep their own error enums; when a failure has to be recorded
//! inside a result or a diagnostic it is classified into an [`ErrorKind`].

use serde::{Deserialize, Serialize};

/// Classification of a failure recorded in a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Inference provider failed (after retries)
    Provider,
    /// Output or candidate failed a shape/safety check
    Validation,
    /// Persistence I/O failure
    Store,
    /// Per-task or per-batch deadline elapsed
    Timeout,
    /// Malformed task or genome, or no executor for the kind
    Config,
    /// An upstream task did not succeed
    Dependency,
    /// Anything that escaped classification
    Unclassified,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Provider => "provider",
            ErrorKind::Validation => "validation",
            ErrorKind::Store => "store",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Config => "config",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Unclassified => "unclassified",
        };
        f.write_str(s)
    }
}

/// A classified failure attached to a task result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TaskError {
    /// Failure class
    pub kind: ErrorKind,

    /// Human-readable reason
    pub message: String,
}

impl TaskError {
    /// Create a new task error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
