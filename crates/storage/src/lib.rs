//! Storage abstraction and implementations for GENESIS.
//!
//! This crate provides the trait-based genome and outcome stores with an
//! in-memory backend and a JSON file reference implementation.

#![warn(missing_docs)]

pub mod trait_;
pub mod json_storage;
pub mod memory;
mod ledger;

pub use trait_::{GenomeStore, OutcomeStore, StoreError, Result};
pub use json_storage::JsonStore;
pub use memory::MemoryStore;
