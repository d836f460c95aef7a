//! JSON config file. Durations are in milliseconds; every field is optional.

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use genesis_cycle::ControllerConfig;
use genesis_evolution::EvolverConfig;
use genesis_execution::{PoolConfig, RouterConfig};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub data_dir: Option<String>,
    pub request: Option<String>,
    pub topic_prefix: Option<String>,

    pub cycle_interval_ms: Option<u64>,
    pub failure_backoff_ms: Option<u64>,
    pub evolution_budget_ms: Option<u64>,
    pub evolve_every: Option<u64>,
    pub auto_evolve: Option<bool>,
    pub max_cycles: Option<u64>,

    pub max_concurrency: Option<usize>,
    pub task_timeout_ms: Option<u64>,
    pub batch_timeout_ms: Option<u64>,

    pub min_plan_confidence: Option<f32>,
    pub max_tasks: Option<usize>,

    pub evolution_window: Option<usize>,
    pub evolution_threshold: Option<f64>,
    pub smoke_payload: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn controller(&self) -> ControllerConfig {
        let mut config = ControllerConfig::default();
        if let Some(ms) = self.cycle_interval_ms {
            config = config.with_cycle_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.failure_backoff_ms {
            config = config.with_failure_backoff(Duration::from_millis(ms));
        }
        if let Some(ms) = self.evolution_budget_ms {
            config = config.with_evolution_budget(Duration::from_millis(ms));
        }
        if let Some(n) = self.evolve_every {
            config = config.with_evolve_every(n);
        }
        if let Some(enabled) = self.auto_evolve {
            config = config.with_auto_evolve(enabled);
        }
        if let Some(max) = self.max_cycles {
            config = config.with_max_cycles(max);
        }
        if let Some(prefix) = &self.topic_prefix {
            config = config.with_topic_prefix(prefix.clone());
        }
        config
    }

    pub fn pool(&self) -> Result<PoolConfig> {
        let mut config = PoolConfig::default();
        if let Some(max) = self.max_concurrency {
            let max = NonZeroUsize::new(max).context("max_concurrency must be at least 1")?;
            config = config.with_max_concurrency(max);
        }
        if let Some(ms) = self.task_timeout_ms {
            config = config.with_task_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.batch_timeout_ms {
            config = config.with_batch_timeout(Duration::from_millis(ms));
        }
        Ok(config)
    }

    pub fn router(&self) -> RouterConfig {
        let mut config = RouterConfig::default();
        if let Some(confidence) = self.min_plan_confidence {
            config = config.with_min_confidence(confidence);
        }
        if let Some(max) = self.max_tasks {
            config = config.with_max_tasks(max);
        }
        config
    }

    pub fn evolver(&self) -> EvolverConfig {
        let mut config = EvolverConfig::default();
        if let Some(window) = self.evolution_window {
            config = config.with_window(window);
        }
        if let Some(threshold) = self.evolution_threshold {
            config = config.with_threshold(threshold);
        }
        if let Some(payload) = &self.smoke_payload {
            config = config.with_smoke_test(payload.clone());
        }
        config
    }
}
