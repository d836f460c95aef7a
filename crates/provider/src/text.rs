//! Helpers for pulling structure out of free-text provider answers.

use std::sync::OnceLock;

use regex::Regex;

use crate::inference::{PlanDraft, PlanStep, ProviderError};

fn json_fence() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*([\{\[].*?[\}\]])\s*```").ok())
        .as_ref()
}

fn any_fence() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\n?(.*?)```").ok())
        .as_ref()
}

/// Find the first JSON document in `text`.
///
/// Accepts the whole text, a fenced ```json block, or the widest `{...}`
/// span, in that order.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(caps) = json_fence().and_then(|re| re.captures(trimmed)) {
        if let Ok(value) = serde_json::from_str(&caps[1]) {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Return the body of the first fenced code block, or the trimmed text.
pub fn strip_code_fences(text: &str) -> String {
    match any_fence().and_then(|re| re.captures(text)) {
        Some(caps) => caps[1].trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Parse a plan from a free-text answer.
///
/// A bare JSON array is read as the list of steps.
pub fn parse_plan(text: &str) -> Result<PlanDraft, ProviderError> {
    let value = extract_json(text)
        .ok_or_else(|| ProviderError::Malformed("no JSON plan found".into()))?;

    if value.is_array() {
        let steps: Vec<PlanStep> = serde_json::from_value(value)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        return Ok(PlanDraft {
            steps,
            ..PlanDraft::default()
        });
    }

    serde_json::from_value(value).map_err(|e| ProviderError::Malformed(e.to_string()))
}
