//! Cycle layer - the Perceive, Think, Act, Remember, Evolve loop.

#![warn(missing_docs)]

pub mod controller;
pub mod report;
pub mod stop;

pub use controller::{ControllerConfig, CycleController, CycleError};
pub use report::{ControllerStatus, CycleReport, EvolutionSummary, Phase};
pub use stop::{stop_signal, StopHandle};
