//! Workflow execution results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use simflow_executor::BlockState;

/// Result of a complete workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
  /// Unique execution ID.
  pub execution_id: String,
  /// False when any executed block ended with an error output, even if an
  /// error connection routed it.
  pub success: bool,
  /// Output of the last executed block.
  pub output: serde_json::Value,
  /// Final state of every executed block, keyed by block id.
  pub block_states: HashMap<String, BlockState>,
  /// Block ids in execution order. Blocks inside loops appear once per iteration.
  pub execution_order: Vec<String>,
  pub duration_ms: u64,
}
