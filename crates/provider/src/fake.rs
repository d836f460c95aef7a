//! In-process providers for tests and offline runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::inference::{
    Expect, InferenceProvider, InferenceRequest, InferenceResponse, PlanDraft, ProviderError,
};
use crate::text::extract_json;

/// One scripted answer.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Simulated latency
    pub delay: Duration,

    /// What the provider returns
    pub result: Result<InferenceResponse, ProviderError>,
}

impl Reply {
    /// Text answer with full confidence.
    pub fn text(text: impl Into<String>) -> Self {
        Self::ok(InferenceResponse::text(text, 1.0))
    }

    /// Plan answer.
    pub fn plan(plan: PlanDraft, confidence: f32) -> Self {
        Self::ok(InferenceResponse::plan(plan, confidence))
    }

    /// Any successful response.
    pub fn ok(response: InferenceResponse) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(response),
        }
    }

    /// Failure.
    pub fn error(error: ProviderError) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(error),
        }
    }

    /// Delay the answer.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Handler = dyn Fn(&InferenceRequest) -> Reply + Send + Sync;

/// Provider answering from a queue of replies, then from a handler.
///
/// With neither left it reports `Unavailable`.
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<Reply>>,
    handler: Option<Box<Handler>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// Provider that answers every request through `handler`.
    pub fn new(handler: impl Fn(&InferenceRequest) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            handler: Some(Box::new(handler)),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Provider that answers with `replies` in order.
    pub fn queue(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            queue: Mutex::new(replies.into_iter().collect()),
            handler: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received, in call order.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().await.push(request.prompt.clone());

        let queued = self.queue.lock().await.pop_front();
        let reply = match (queued, &self.handler) {
            (Some(reply), _) => reply,
            (None, Some(handler)) => handler(request),
            (None, None) => Reply::error(ProviderError::Unavailable("script exhausted".into())),
        };

        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.result
    }
}

/// Deterministic offline provider.
///
/// Text requests are echoed back under the system header, JSON requests
/// return the first JSON document embedded in the prompt, and plan
/// requests get a zero-confidence answer so callers use their fallback.
#[derive(Debug, Default, Clone)]
pub struct EchoProvider;

impl EchoProvider {
    /// Create the provider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InferenceProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        match request.constraints.expect {
            Expect::Plan => Ok(InferenceResponse::text("no plan", 0.0)),
            Expect::Json => {
                let value = extract_json(&request.prompt)
                    .ok_or_else(|| ProviderError::Malformed("nothing to echo".into()))?;
                Ok(InferenceResponse::text(value.to_string(), 1.0))
            }
            Expect::Text => {
                let header = request
                    .constraints
                    .system
                    .as_deref()
                    .and_then(|s| s.lines().next())
                    .unwrap_or("echo");
                let mut text = format!("[{}] {}", header, request.prompt.trim());
                if let Some(max) = request.constraints.max_chars {
                    if let Some((idx, _)) = text.char_indices().nth(max) {
                        text.truncate(idx);
                    }
                }
                Ok(InferenceResponse::text(text, 1.0))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_then_exhausted() {
        let provider = ScriptedProvider::queue([Reply::text("one")]);
        let req = InferenceRequest::text("hi");
        assert_eq!(provider.generate(&req).await.unwrap().into_text(), "one");
        assert!(matches!(provider.generate(&req).await, Err(ProviderError::Unavailable(_))));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_echo_text_and_json() {
        let echo = EchoProvider::new();
        let text = echo
            .generate(&InferenceRequest::text("payload").with_system("Researcher\nmore"))
            .await
            .unwrap()
            .into_text();
        assert_eq!(text, "[Researcher] payload");

        let json = echo
            .generate(&InferenceRequest::json("Current:\n```json\n{\"a\":1}\n```"))
            .await
            .unwrap()
            .into_text();
        assert_eq!(json, r#"{"a":1}"#);
    }
}
