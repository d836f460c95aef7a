//! Execution layer - executor agents, the pool that runs them, and the
//! router that turns a request into staged batches.

#![warn(missing_docs)]

pub mod agent;
pub mod dependency;
pub mod population;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod validate;

pub use agent::{AgentError, ExecutorAgent, Variant, PAYLOAD_PLACEHOLDER};
pub use dependency::{Resolution, Staging};
pub use population::{Membership, Population};
pub use registry::{default_founders, seed_founders, Constructor, ExecutorRegistry};
pub use router::{ActionPlan, PlanError, Router, RouterConfig};
pub use scheduler::{ExecutorPool, PoolConfig, PoolError, DEFAULT_MAX_CONCURRENCY};
pub use validate::{CodeValidator, DEFAULT_FORBIDDEN};
