//! # Engine Errors
//!
//! Structural engine operations never fail (they degrade to no-ops); these
//! errors cover the edges where input comes from outside the engine.

use thiserror::Error;

/// Errors raised at the engine boundary
#[derive(Debug, Error)]
pub enum FlowError {
    /// A run was requested for an agent type the catalog does not know
    #[error("unknown agent type: {0}")]
    UnknownAgent(String),

    /// A routing table referenced an agent type the catalog does not know
    #[error("routing table references unknown agent type '{agent}' in {rule}")]
    UnknownRoutingAgent { agent: String, rule: String },

    /// A compound routing pattern failed to compile
    #[error("invalid routing pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A catalog or template definition is malformed
    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),

    /// A template id was not found
    #[error("unknown template: {0}")]
    UnknownTemplate(String),
}
