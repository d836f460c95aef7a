//! External collaborator interfaces for GENESIS.
//!
//! The orchestration core talks to the outside world through three narrow
//! seams: an inference provider, an environment snapshot provider and a
//! message bus. This crate defines them and ships in-process
//! implementations so the loop runs without any network service.

#![warn(missing_docs)]

pub mod inference;
pub mod text;
pub mod environment;
pub mod bus;
pub mod fake;

pub use inference::{
    Constraints, Expect, InferenceProvider, InferenceRequest, InferenceResponse, PlanDraft,
    PlanStep, ProviderError, ResponseBody,
};
pub use text::{extract_json, parse_plan, strip_code_fences};
pub use environment::{EnvironmentError, EnvironmentProvider, StaticEnvironment};
pub use bus::{
    topic, BusError, Deduplicator, Envelope, InMemoryBus, MessageBus, Subscription,
    CYCLE_CHANNEL, EVOLUTION_CHANNEL,
};
pub use fake::{EchoProvider, Reply, ScriptedProvider};
