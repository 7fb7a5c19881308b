//! # Orchestrator
//!
//! Routes a free-text goal to an ordered list of agent types.
//!
//! ## Routing Flow
//!
//! ```text
//! text → lower-case → compound patterns (first match, 0.9)
//!                   └─ no match → keyword scoring (count, catalog order)
//! ```

pub mod router;
pub mod rules;

pub use router::{IntentRouter, PipelineDetection};
pub use rules::{CompoundRule, KeywordRule, RoutingTable};
