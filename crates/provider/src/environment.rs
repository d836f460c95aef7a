//! Environment snapshot provider.

use std::collections::VecDeque;

use async_trait::async_trait;
use genesis_core::EnvironmentContext;
use tokio::sync::Mutex;

/// Errors from taking a snapshot.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EnvironmentError {
    /// The environment could not be observed
    #[error("environment unavailable: {0}")]
    Unavailable(String),
}

/// Read-only source of environment facts, called at PERCEIVING.
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// Take a snapshot. Has no side effects on the environment.
    async fn snapshot(&self) -> Result<EnvironmentContext, EnvironmentError>;
}

/// Fixed facts plus an optional queue of per-cycle requests.
///
/// Once the queue is empty every snapshot carries the base request.
pub struct StaticEnvironment {
    base: EnvironmentContext,
    queued: Mutex<VecDeque<String>>,
}

impl StaticEnvironment {
    /// Environment that always returns `base`.
    pub fn new(base: EnvironmentContext) -> Self {
        Self {
            base,
            queued: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue requests to be served one per snapshot.
    pub fn with_requests<I, S>(self, requests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queued: Mutex::new(requests.into_iter().map(Into::into).collect()),
            ..self
        }
    }
}

#[async_trait]
impl EnvironmentProvider for StaticEnvironment {
    async fn snapshot(&self) -> Result<EnvironmentContext, EnvironmentError> {
        let mut ctx = self.base.clone();
        if let Some(request) = self.queued.lock().await.pop_front() {
            ctx.request = Some(request);
        }
        ctx.captured_at = chrono::Utc::now();
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queued_requests_then_base() {
        let env = StaticEnvironment::new(EnvironmentContext::with_request("idle"))
            .with_requests(["first", "second"]);
        assert_eq!(env.snapshot().await.unwrap().request.as_deref(), Some("first"));
        assert_eq!(env.snapshot().await.unwrap().request.as_deref(), Some("second"));
        assert_eq!(env.snapshot().await.unwrap().request.as_deref(), Some("idle"));
    }
}
