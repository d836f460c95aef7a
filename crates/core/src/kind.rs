//! Executor kinds - the closed set of specialisations in the population.

use serde::{Deserialize, Serialize};

/// The kind of work an executor performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Gathering information and facts
    Research,
    /// Evaluating, comparing, assessing
    Analysis,
    /// Writing summaries and reports
    Synthesis,
    /// Generating code
    Code,
    /// Template-driven custom executor
    Custom,
}

impl ExecutorKind {
    /// All kinds, in a fixed order.
    pub const ALL: [ExecutorKind; 5] = [
        ExecutorKind::Research,
        ExecutorKind::Analysis,
        ExecutorKind::Synthesis,
        ExecutorKind::Code,
        ExecutorKind::Custom,
    ];

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorKind::Research => "research",
            ExecutorKind::Analysis => "analysis",
            ExecutorKind::Synthesis => "synthesis",
            ExecutorKind::Code => "code",
            ExecutorKind::Custom => "custom",
        }
    }

    /// Words that hint at this kind when they appear in a request.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            ExecutorKind::Research => &["research", "search", "find", "gather", "investigate"],
            ExecutorKind::Analysis => &["analy", "evaluate", "compare", "assess"],
            ExecutorKind::Synthesis => &["summar", "write", "report", "document", "explain"],
            ExecutorKind::Code => &["code", "implement", "refactor", "debug", "function"],
            ExecutorKind::Custom => &[],
        }
    }
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "research" => Ok(ExecutorKind::Research),
            "analysis" => Ok(ExecutorKind::Analysis),
            "synthesis" | "writer" => Ok(ExecutorKind::Synthesis),
            "code" => Ok(ExecutorKind::Code),
            "custom" => Ok(ExecutorKind::Custom),
            other => Err(format!("unknown executor kind: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_writer_alias() {
        assert_eq!("writer".parse::<ExecutorKind>().unwrap(), ExecutorKind::Synthesis);
        assert_eq!(" Code ".parse::<ExecutorKind>().unwrap(), ExecutorKind::Code);
        assert!("poet".parse::<ExecutorKind>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&ExecutorKind::Synthesis).unwrap();
        assert_eq!(json, "\"synthesis\"");
    }
}
