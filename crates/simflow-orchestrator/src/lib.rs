//! Workflow execution for simflow.
//!
//! This crate provides the [`WorkflowExecutor`] which handles:
//! - Layered scheduling of active blocks
//! - Concurrent block execution through a [`BlockHandler`]
//! - Loop and parallel iteration
//! - Error routing through `error` connections
//!
//! Path activation and input resolution are delegated to `simflow-executor`.

mod error;
mod executor;
mod handler;
mod loops;
mod result;
mod schedule;

pub use error::ExecutionError;
pub use executor::{ExecutionInput, ExecutorConfig, WorkflowExecutor};
pub use handler::{BlockHandler, EchoHandler, HandlerError};
pub use result::ExecutionResult;
