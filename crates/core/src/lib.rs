//! # AgentFlow Core
//!
//! The "Engine" of the AgentFlow system - the workflow graph, the intent
//! router, and the simulated run/pipeline execution machinery.
//!
//! ## Architecture
//!
//! - `catalog/` - Agent type definitions and pipeline templates
//! - `graph/` - Canvas nodes/connections and their linearization
//! - `orchestrator/` - Free-text to agent-list intent routing
//! - `engine/` - Run, pipeline and canvas execution state machines
//! - `state/` - Snapshot persistence (SQLite or in-memory)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agentflow_core::{config::EngineConfig, engine::FlowEngine};
//!
//! let engine = FlowEngine::new(&EngineConfig::load(None)?)?;
//! let launched = engine.launch("write a blog post about Rust async")?;
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod state;

pub use error::FlowError;

/// Generate a fresh identifier for any engine record
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
