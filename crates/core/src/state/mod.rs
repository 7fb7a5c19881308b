//! # State Persistence
//!
//! Snapshots of the canvas, run history and pipelines, stored per namespace.

pub mod db;
pub mod store;

pub use db::FlowDb;
pub use store::{MemoryStore, Namespace, SnapshotStore};
