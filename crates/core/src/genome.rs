//! Genome model - a versioned executor definition.
//!
//! A genome is never edited in place. Evolution creates a successor with
//! `generation + 1` and `parent_id` pointing at the genome it supersedes;
//! the only field of the prior record that ever changes is `status`.

use serde::{Deserialize, Serialize};

use crate::id::GenomeId;
use crate::kind::ExecutorKind;
use crate::Time;

/// A versioned specification plus artifact defining one executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    /// Unique identifier of this version
    pub id: GenomeId,

    /// Executor identity; (kind, name) is unique among active genomes
    pub name: String,

    /// Executor kind
    pub kind: ExecutorKind,

    /// Short description of the executor's role
    pub role: String,

    /// 0 for founders, parent + 1 otherwise
    pub generation: u32,

    /// Genome this one supersedes
    pub parent_id: Option<GenomeId>,

    /// Behavioural specification
    pub spec: GenomeSpec,

    /// Generated artifact (prompt template or reference code)
    pub logic_artifact: String,

    /// Creation timestamp
    pub created_at: Time,

    /// Lifecycle status
    pub status: GenomeStatus,
}

/// Behavioural specification of a genome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeSpec {
    /// System instructions given to the provider
    pub instructions: String,

    /// Sampling temperature in [0, 2]
    pub temperature: f32,

    /// Capability tags
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Lifecycle status of a genome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenomeStatus {
    /// Currently in the population
    Active,
    /// Superseded; kept as history
    Retired,
}

impl Genome {
    /// Create a founder genome (generation 0, no parent).
    pub fn founder(
        kind: ExecutorKind,
        name: impl Into<String>,
        role: impl Into<String>,
        spec: GenomeSpec,
    ) -> Self {
        Self {
            id: GenomeId::new(),
            name: name.into(),
            kind,
            role: role.into(),
            generation: 0,
            parent_id: None,
            spec,
            logic_artifact: String::new(),
            created_at: chrono::Utc::now(),
            status: GenomeStatus::Active,
        }
    }

    /// Set the logic artifact.
    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.logic_artifact = artifact.into();
        self
    }

    /// Build the successor of this genome from a revised spec and artifact.
    ///
    /// The successor shares kind, name and role, and is active.
    pub fn successor(&self, spec: GenomeSpec, logic_artifact: String) -> Self {
        Self {
            id: GenomeId::new(),
            name: self.name.clone(),
            kind: self.kind,
            role: self.role.clone(),
            generation: self.generation + 1,
            parent_id: Some(self.id),
            spec,
            logic_artifact,
            created_at: chrono::Utc::now(),
            status: GenomeStatus::Active,
        }
    }

    /// True if the genome is in the population.
    pub fn is_active(&self) -> bool {
        self.status == GenomeStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> GenomeSpec {
        GenomeSpec {
            instructions: "Find facts.".into(),
            temperature: 0.3,
            capabilities: vec!["web".into()],
        }
    }

    #[test]
    fn test_successor_links_to_parent() {
        let founder = Genome::founder(ExecutorKind::Research, "researcher", "finds facts", spec());
        let next = founder.successor(spec(), "v2".into());

        assert_eq!(next.generation, 1);
        assert_eq!(next.parent_id, Some(founder.id));
        assert_eq!(next.name, founder.name);
        assert_ne!(next.id, founder.id);
        assert!(next.is_active());
    }
}
