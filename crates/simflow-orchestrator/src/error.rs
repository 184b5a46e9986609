//! Error types for workflow execution.

use simflow_executor::ResolveError;
use simflow_workflow::WorkflowError;
use thiserror::Error;

/// Errors that end a workflow run.
#[derive(Debug, Error)]
pub enum ExecutionError {
  /// The workflow failed structural validation.
  #[error("invalid workflow: {0}")]
  InvalidWorkflow(#[from] WorkflowError),

  #[error("workflow has no starter block")]
  MissingStarter,

  /// Input resolution failed for a block without an error connection.
  #[error("input resolution failed for block '{block_id}': {source}")]
  InputResolution {
    block_id: String,
    #[source]
    source: ResolveError,
  },

  /// A handler failed for a block without an error connection.
  #[error("block '{block_id}' failed: {message}")]
  BlockFailed { block_id: String, message: String },

  /// A loop or parallel collection could not be read.
  #[error("collection of '{group_id}' is malformed: {message}")]
  MalformedCollection { group_id: String, message: String },

  /// The run did not settle within the configured number of layers.
  #[error("workflow exceeded {limit} execution layers")]
  LayerLimitExceeded { limit: usize },

  /// Workflow execution was cancelled.
  #[error("workflow execution cancelled")]
  Cancelled,
}
