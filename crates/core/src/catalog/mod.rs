//! # Agent Catalog
//!
//! Read-only agent type definitions and pipeline templates consumed by the
//! engines. Loaded once at startup and shared behind an `Arc`.

pub mod agents;
pub mod templates;

pub use agents::{AgentCatalog, AgentTypeDefinition, StepTemplate};
pub use templates::{PipelineTemplate, TemplateStage};
