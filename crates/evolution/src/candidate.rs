//! Mutation candidates - parsing and the cheap self-check.

use genesis_core::{ExecutorKind, Genome, GenomeSpec};
use genesis_execution::CodeValidator;
use genesis_provider::extract_json;
use serde::{Deserialize, Serialize};

/// Temperatures a candidate may ask for.
pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=2.0;

/// Revised genome fields proposed by the provider.
///
/// Missing fields inherit from the prior genome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// New system instructions
    #[serde(default)]
    pub instructions: Option<String>,

    /// New sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,

    /// New capability tags
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,

    /// New logic artifact (code or prompt template)
    #[serde(default, alias = "logic", alias = "code")]
    pub logic_artifact: Option<String>,

    /// Why the provider thinks this is better
    #[serde(default, alias = "description")]
    pub rationale: String,

    /// Provider's confidence in the revision
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl Candidate {
    /// Parse a candidate from a provider answer.
    pub fn parse(text: &str) -> Result<Self, String> {
        let value = extract_json(text).ok_or_else(|| "no JSON candidate in answer".to_string())?;
        if !value.is_object() {
            return Err("candidate is not a JSON object".into());
        }
        serde_json::from_value(value).map_err(|e| format!("malformed candidate: {}", e))
    }

    /// The candidate as a full spec and artifact, inheriting from `prior`.
    pub fn resolve(&self, prior: &Genome) -> (GenomeSpec, String) {
        let spec = GenomeSpec {
            instructions: self
                .instructions
                .clone()
                .unwrap_or_else(|| prior.spec.instructions.clone()),
            temperature: self.temperature.unwrap_or(prior.spec.temperature),
            capabilities: self
                .capabilities
                .clone()
                .unwrap_or_else(|| prior.spec.capabilities.clone()),
        };
        let artifact = self
            .logic_artifact
            .clone()
            .unwrap_or_else(|| prior.logic_artifact.clone());
        (spec, artifact)
    }
}

/// Shape and safety limits for a candidate genome.
#[derive(Debug, Clone)]
pub struct CandidateCheck {
    /// Largest logic artifact accepted, in bytes
    pub max_artifact_len: usize,
    /// Candidates below this stated confidence are refused
    pub min_confidence: f32,
    /// Validator for Code artifacts
    pub code: CodeValidator,
}

impl Default for CandidateCheck {
    fn default() -> Self {
        Self {
            max_artifact_len: 16 * 1024,
            min_confidence: 0.5,
            code: CodeValidator::new(),
        }
    }
}

impl CandidateCheck {
    /// Check a resolved successor against its prior.
    pub fn check(&self, candidate: &Candidate, prior: &Genome, successor: &Genome) -> Result<(), String> {
        if let Some(confidence) = candidate.confidence {
            if confidence < self.min_confidence {
                return Err(format!(
                    "candidate confidence {:.2} below {:.2}",
                    confidence, self.min_confidence
                ));
            }
        }

        let spec = &successor.spec;
        if spec.instructions.trim().is_empty() {
            return Err("empty instructions".into());
        }
        if !spec.temperature.is_finite() || !TEMPERATURE_RANGE.contains(&spec.temperature) {
            return Err(format!("temperature {} out of range", spec.temperature));
        }
        if successor.logic_artifact.len() > self.max_artifact_len {
            return Err(format!(
                "logic artifact is {} bytes, limit {}",
                successor.logic_artifact.len(),
                self.max_artifact_len
            ));
        }
        if successor.kind == ExecutorKind::Code && !successor.logic_artifact.trim().is_empty() {
            self.code
                .validate(&successor.logic_artifact)
                .map_err(|reason| format!("code artifact: {}", reason))?;
        }
        if successor.spec == prior.spec && successor.logic_artifact == prior.logic_artifact {
            return Err("candidate is identical to the current genome".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prior(kind: ExecutorKind) -> Genome {
        Genome::founder(
            kind,
            "g",
            "test",
            GenomeSpec {
                instructions: "Be brief.".into(),
                temperature: 0.4,
                capabilities: vec!["summaries".into()],
            },
        )
    }

    #[test]
    fn test_parse_partial_candidate_inherits() {
        let prior = prior(ExecutorKind::Synthesis);
        let text = "Here you go:\n```json\n{\"instructions\": \"Be briefer.\", \"rationale\": \"shorter\"}\n```";
        let candidate = Candidate::parse(text).unwrap();
        let (spec, artifact) = candidate.resolve(&prior);

        assert_eq!(spec.instructions, "Be briefer.");
        assert_eq!(spec.temperature, 0.4);
        assert_eq!(spec.capabilities, vec!["summaries".to_string()]);
        assert_eq!(artifact, "");
        assert_eq!(candidate.rationale, "shorter");
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(Candidate::parse("no idea").is_err());
        assert!(Candidate::parse("[1, 2]").is_err());
    }

    #[test]
    fn test_check_rejects_bad_shapes() {
        let check = CandidateCheck::default();
        let prior = prior(ExecutorKind::Code);
        let verdict = |candidate: Candidate| {
            let (spec, artifact) = candidate.resolve(&prior);
            check.check(&candidate, &prior, &prior.successor(spec, artifact))
        };

        assert!(verdict(Candidate::default()).unwrap_err().contains("identical"));
        assert!(verdict(Candidate {
            instructions: Some("  ".into()),
            ..Candidate::default()
        })
        .is_err());
        assert!(verdict(Candidate {
            temperature: Some(3.5),
            ..Candidate::default()
        })
        .is_err());
        assert!(verdict(Candidate {
            logic_artifact: Some("fn broken( {".into()),
            ..Candidate::default()
        })
        .unwrap_err()
        .starts_with("code artifact"));
        assert!(verdict(Candidate {
            instructions: Some("Be exact.".into()),
            confidence: Some(0.1),
            ..Candidate::default()
        })
        .is_err());
        assert!(verdict(Candidate {
            logic_artifact: Some("fn add(a: i32, b: i32) -> i32 { a + b }".into()),
            ..Candidate::default()
        })
        .is_ok());
    }
}
