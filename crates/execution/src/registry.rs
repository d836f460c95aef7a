//! Executor registry - maps each kind to the constructor that loads it.

use std::collections::BTreeMap;
use std::sync::Arc;

use genesis_core::{ExecutorKind, Genome, GenomeSpec, RetryPolicy};
use genesis_provider::InferenceProvider;
use genesis_storage::{GenomeStore, StoreError};
use tracing::info;

use crate::agent::{AgentError, ExecutorAgent, Variant, PAYLOAD_PLACEHOLDER};
use crate::validate::CodeValidator;

/// Turns a genome into the variant that runs it.
pub type Constructor = fn(&Genome) -> Result<Variant, AgentError>;

/// Closed mapping from executor kind to constructor.
#[derive(Clone)]
pub struct ExecutorRegistry {
    constructors: BTreeMap<ExecutorKind, Constructor>,
}

impl ExecutorRegistry {
    /// Empty registry.
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry with a constructor for every kind.
    pub fn standard() -> Self {
        Self::empty()
            .register(ExecutorKind::Research, |_| Ok(Variant::Research))
            .register(ExecutorKind::Analysis, |_| Ok(Variant::Analysis))
            .register(ExecutorKind::Synthesis, |_| Ok(Variant::Synthesis))
            .register(ExecutorKind::Code, build_code)
            .register(ExecutorKind::Custom, build_custom)
    }

    /// Register (or replace) the constructor for a kind.
    pub fn register(mut self, kind: ExecutorKind, constructor: Constructor) -> Self {
        self.constructors.insert(kind, constructor);
        self
    }

    /// Verify that every kind in `required` has a constructor.
    pub fn check(&self, required: &[ExecutorKind]) -> Result<(), AgentError> {
        match required.iter().find(|k| !self.constructors.contains_key(k)) {
            Some(kind) => Err(AgentError::Unregistered(*kind)),
            None => Ok(()),
        }
    }

    /// Kinds with a registered constructor.
    pub fn kinds(&self) -> impl Iterator<Item = ExecutorKind> + '_ {
        self.constructors.keys().copied()
    }

    /// Load a genome into an agent.
    pub fn build(
        &self,
        genome: Arc<Genome>,
        provider: Arc<dyn InferenceProvider>,
        retry: RetryPolicy,
    ) -> Result<ExecutorAgent, AgentError> {
        let constructor = self
            .constructors
            .get(&genome.kind)
            .ok_or(AgentError::Unregistered(genome.kind))?;
        let variant = constructor(&genome)?;
        Ok(ExecutorAgent::new(genome, variant, provider, retry))
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn build_code(genome: &Genome) -> Result<Variant, AgentError> {
    let validator = CodeValidator::new();
    if !genome.logic_artifact.trim().is_empty() {
        validator.validate(&genome.logic_artifact).map_err(|reason| AgentError::InvalidGenome {
            id: genome.id.to_string(),
            reason: format!("reference artifact: {}", reason),
        })?;
    }
    Ok(Variant::Code(validator))
}

fn build_custom(genome: &Genome) -> Result<Variant, AgentError> {
    if !genome.logic_artifact.contains(PAYLOAD_PLACEHOLDER) {
        return Err(AgentError::InvalidGenome {
            id: genome.id.to_string(),
            reason: format!("template has no {} placeholder", PAYLOAD_PLACEHOLDER),
        });
    }
    Ok(Variant::Custom {
        template: genome.logic_artifact.clone(),
    })
}

/// Generation-0 genomes for the built-in kinds.
pub fn default_founders() -> Vec<Genome> {
    let founder = |kind: ExecutorKind, name: &str, role: &str, instructions: &str, temperature: f32| {
        Genome::founder(
            kind,
            name,
            role,
            GenomeSpec {
                instructions: instructions.to_string(),
                temperature,
                capabilities: Vec::new(),
            },
        )
    };

    vec![
        founder(
            ExecutorKind::Research,
            "researcher",
            "gathers facts",
            "You are a meticulous researcher. Report facts, not opinions.",
            0.3,
        ),
        founder(
            ExecutorKind::Analysis,
            "analyst",
            "evaluates and compares",
            "You are a careful analyst. Weigh evidence and state conclusions plainly.",
            0.4,
        ),
        founder(
            ExecutorKind::Synthesis,
            "writer",
            "writes summaries and reports",
            "You are a concise technical writer.",
            0.6,
        ),
        founder(
            ExecutorKind::Code,
            "coder",
            "writes code",
            "You are a senior engineer. Produce small, correct, idiomatic code.",
            0.2,
        ),
    ]
}

/// Store each founder whose kind has no active genome yet.
///
/// Returns the number of genomes written.
pub async fn seed_founders(store: &dyn GenomeStore, founders: Vec<Genome>) -> Result<usize, StoreError> {
    let mut written = 0;
    for genome in founders {
        let existing = store.list_active(genome.kind).await?;
        if existing.iter().any(|g| g.name == genome.name) {
            continue;
        }
        info!(kind = %genome.kind, name = %genome.name, "seeding founder genome");
        store.put(&genome).await?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use genesis_provider::EchoProvider;
    use genesis_storage::MemoryStore;

    #[test]
    fn test_check_reports_missing_kind() {
        let registry = ExecutorRegistry::empty().register(ExecutorKind::Research, |_| Ok(Variant::Research));
        assert!(registry.check(&[ExecutorKind::Research]).is_ok());
        assert!(matches!(
            registry.check(&[ExecutorKind::Research, ExecutorKind::Code]),
            Err(AgentError::Unregistered(ExecutorKind::Code))
        ));
        assert!(ExecutorRegistry::standard().check(&ExecutorKind::ALL).is_ok());
    }

    #[test]
    fn test_custom_genome_needs_placeholder() {
        let registry = ExecutorRegistry::standard();
        let provider: Arc<dyn InferenceProvider> = Arc::new(EchoProvider::new());
        let base = Genome::founder(
            ExecutorKind::Custom,
            "translator",
            "translates",
            GenomeSpec {
                instructions: "Translate.".into(),
                temperature: 0.1,
                capabilities: vec![],
            },
        );

        let bad = Arc::new(base.clone().with_artifact("no placeholder"));
        assert!(registry.build(bad, provider.clone(), RetryPolicy::none()).is_err());

        let good = Arc::new(base.with_artifact("To French: {payload}"));
        assert!(registry.build(good, provider, RetryPolicy::none()).is_ok());
    }

    #[tokio::test]
    async fn test_seed_founders_is_idempotent() {
        let store = MemoryStore::new();
        assert_eq!(seed_founders(&store, default_founders()).await.unwrap(), 4);
        assert_eq!(seed_founders(&store, default_founders()).await.unwrap(), 0);
        assert!(store.get_active(ExecutorKind::Code).await.unwrap().is_some());
    }
}
