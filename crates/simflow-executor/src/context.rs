//! Mutable state of one workflow run.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Recorded result of one block execution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockState {
  pub output: serde_json::Value,
  pub executed: bool,
  #[serde(default)]
  pub execution_time_ms: u64,
}

/// Branch decisions taken so far.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Decisions {
  /// router block id -> chosen target block id
  #[serde(default)]
  pub router: HashMap<String, String>,
  /// condition block id -> chosen condition id
  #[serde(default)]
  pub condition: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
  #[default]
  String,
  /// Raw text, substituted without quoting in every context.
  Plain,
  Number,
  Boolean,
  Object,
  Array,
}

/// A workflow-level variable, referenced as `<variable.name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowVariable {
  pub id: String,
  pub name: String,
  #[serde(rename = "type", default)]
  pub var_type: VariableType,
  #[serde(default)]
  pub value: serde_json::Value,
}

/// State of a single workflow run.
///
/// Owned by the outer executor and passed by reference to the path tracker
/// and the input resolver on every call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionContext {
  pub workflow_id: String,
  pub block_states: HashMap<String, BlockState>,
  pub active_execution_path: HashSet<String>,
  pub executed_blocks: HashSet<String>,
  pub decisions: Decisions,
  /// loop or parallel id -> current iteration count
  pub loop_iterations: HashMap<String, usize>,
  /// loop or parallel id -> item of the current iteration
  pub loop_items: HashMap<String, serde_json::Value>,
  /// loop or parallel id -> full item list of the running group
  pub loop_collections: HashMap<String, serde_json::Value>,
  /// Loops and parallels that have finished all iterations.
  pub completed_loops: HashSet<String>,
  pub environment_variables: HashMap<String, String>,
  /// variable id -> variable
  pub workflow_variables: HashMap<String, WorkflowVariable>,
}

impl ExecutionContext {
  pub fn new(workflow_id: impl Into<String>) -> Self {
    Self {
      workflow_id: workflow_id.into(),
      ..Default::default()
    }
  }

  pub fn with_environment(mut self, environment_variables: HashMap<String, String>) -> Self {
    self.environment_variables = environment_variables;
    self
  }

  pub fn with_variables(mut self, variables: impl IntoIterator<Item = WorkflowVariable>) -> Self {
    self.workflow_variables = variables
      .into_iter()
      .map(|v| (v.id.clone(), v))
      .collect();
    self
  }

  /// Record a finished block. Re-entry for a later loop iteration overwrites
  /// the previous state.
  pub fn record_output(
    &mut self,
    block_id: &str,
    output: serde_json::Value,
    execution_time_ms: u64,
  ) {
    self.block_states.insert(
      block_id.to_string(),
      BlockState {
        output,
        executed: true,
        execution_time_ms,
      },
    );
    self.executed_blocks.insert(block_id.to_string());
  }

  pub fn activate(&mut self, block_id: impl Into<String>) {
    self.active_execution_path.insert(block_id.into());
  }

  pub fn is_active(&self, block_id: &str) -> bool {
    self.active_execution_path.contains(block_id)
  }

  pub fn is_executed(&self, block_id: &str) -> bool {
    self.executed_blocks.contains(block_id)
  }

  pub fn block_output(&self, block_id: &str) -> Option<&serde_json::Value> {
    self.block_states.get(block_id).map(|s| &s.output)
  }
}
