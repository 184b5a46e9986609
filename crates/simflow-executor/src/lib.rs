//! Simflow Executor
//!
//! The execution core of simflow: the two components that decide *what runs*
//! and *what values it sees*.
//!
//! # Architecture
//!
//! ```text
//! outer executor (owns ExecutionContext)
//! ├── PathTracker::is_in_active_path(block_id, &ctx)
//! ├── PathTracker::update_execution_paths(&executed, &mut ctx)
//! └── InputResolver::resolve_inputs(block, &ctx) -> Map<String, Value>
//! ```
//!
//! Both components borrow the [`SerializedWorkflow`] for static lookups and
//! take the context fresh on every call; neither holds execution state.
//!
//! [`SerializedWorkflow`]: simflow_workflow::SerializedWorkflow

mod context;
mod error;
mod path;
pub mod resolver;

pub use context::{BlockState, Decisions, ExecutionContext, VariableType, WorkflowVariable};
pub use error::ResolveError;
pub use path::PathTracker;
pub use resolver::InputResolver;
