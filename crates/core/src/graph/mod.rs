//! # Workflow Graph
//!
//! The node-and-connection representation a user edits on the canvas, and
//! its linearization into an ordered list of pipeline stages.
//!
//! ```text
//! CanvasGraph ──▶ linearize() ──▶ [StageSpec] ──▶ Run / Pipeline / Canvas driver
//! ```

pub mod linearize;
pub mod model;

pub use linearize::{linearize, to_stages, Linearization, StageSpec};
pub use model::{
    CanvasConnection, CanvasGraph, CanvasNode, ExecutionStatus, Position, DEFAULT_GRAPH_NAME,
};
