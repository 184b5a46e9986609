//! Simflow Workflow
//!
//! This crate provides the serialized workflow representation consumed by the
//! simflow execution core. A serialized workflow is the flattened form of the
//! visual graph: typed blocks, directed connections between them, and the
//! loop/parallel groupings that bound repeated execution.
//!
//! Besides the data types it provides:
//! - [`Graph`] for adjacency lookups over connections
//! - [`AccessibilityMap`] describing which blocks a block may reference
//! - structural validation via [`SerializedWorkflow::validate`]

mod access;
mod block;
mod connection;
mod error;
mod graph;
mod workflow;

pub use access::AccessibilityMap;
pub use block::{BlockConfig, BlockKind, BlockMetadata, ParamType, Position, SerializedBlock};
pub use connection::{Connection, ConnectionHandle};
pub use error::WorkflowError;
pub use graph::Graph;
pub use workflow::{LoopConfig, LoopType, ParallelConfig, SerializedWorkflow};
