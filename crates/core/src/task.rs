//! Task model - the unit of work handed to an executor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, TaskError};
use crate::id::TaskId;
use crate::kind::ExecutorKind;

/// A task is issued by the router and consumed exactly once by one executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,

    /// Submission id, used for ordering and tie-breaks
    pub seq: u64,

    /// Executor kind this task targets
    pub kind: ExecutorKind,

    /// Instruction text for the executor
    pub payload: String,

    /// Priority (higher is more important); informational only
    pub priority: u8,

    /// Optional per-task deadline
    pub deadline: Option<Duration>,

    /// Tasks whose output this task consumes
    pub depends_on: Vec<TaskId>,
}

impl Task {
    /// Create an independent task.
    pub fn new(seq: u64, kind: ExecutorKind, payload: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            seq,
            kind,
            payload: payload.into(),
            priority: 0,
            deadline: None,
            depends_on: Vec::new(),
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Set the per-task deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Declare a dependency on another task.
    pub fn depends_on(mut self, upstream: TaskId) -> Self {
        self.depends_on.push(upstream);
        self
    }

    /// Re-issue the task with a new payload; identity is kept.
    pub fn reissue(&self, payload: String) -> Self {
        Self {
            payload,
            ..self.clone()
        }
    }

    /// True if the task consumes another task's output.
    pub fn is_dependent(&self) -> bool {
        !self.depends_on.is_empty()
    }
}

/// Terminal status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Executor produced output
    Success,
    /// Executor or routing failed
    Failure,
    /// Deadline elapsed
    Timeout,
}

/// The single result produced for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task this result belongs to
    pub task_id: TaskId,

    /// Terminal status
    pub status: TaskStatus,

    /// Output text (empty unless successful)
    pub output: String,

    /// Classified failure reason
    pub error: Option<TaskError>,

    /// Wall time spent
    pub duration: Duration,
}

impl TaskResult {
    /// A successful result.
    pub fn success(task_id: TaskId, output: impl Into<String>, duration: Duration) -> Self {
        Self {
            task_id,
            status: TaskStatus::Success,
            output: output.into(),
            error: None,
            duration,
        }
    }

    /// A failed result with a classified error.
    pub fn failure(task_id: TaskId, error: TaskError, duration: Duration) -> Self {
        let status = if error.kind == ErrorKind::Timeout {
            TaskStatus::Timeout
        } else {
            TaskStatus::Failure
        };
        Self {
            task_id,
            status,
            output: String::new(),
            error: Some(error),
            duration,
        }
    }

    /// A timed-out result.
    pub fn timeout(task_id: TaskId, message: impl Into<String>, duration: Duration) -> Self {
        Self::failure(task_id, TaskError::new(ErrorKind::Timeout, message), duration)
    }

    /// True if the task succeeded.
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}
