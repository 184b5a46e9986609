//! Block handlers: the tool execution behind each block.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use simflow_executor::ExecutionContext;
use simflow_workflow::{BlockKind, SerializedBlock, SerializedWorkflow};
use thiserror::Error;

/// A failed tool call.
///
/// The executor turns it into the block output `{ "error": message }`, so an
/// `error` connection on the block can route it.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct HandlerError {
  pub message: String,
}

impl HandlerError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// Executes one block with its resolved inputs.
///
/// Loop and parallel blocks are run by the executor itself and never reach a
/// handler; the starter block is seeded with the trigger payload.
#[async_trait]
pub trait BlockHandler: Send + Sync {
  async fn execute(
    &self,
    block: &SerializedBlock,
    inputs: Map<String, Value>,
    context: &ExecutionContext,
  ) -> Result<Value, HandlerError>;
}

/// Dry-run handler that performs no tool calls.
///
/// Every block's output is `{ "response": <resolved inputs> }`. A condition
/// without a literal `selectedConditionId` param selects its first condition,
/// and a router without a literal `selectedPath` param selects its first
/// connected target.
#[derive(Debug, Clone, Default)]
pub struct EchoHandler {
  /// router id -> first connected target
  routes: HashMap<String, String>,
}

impl EchoHandler {
  pub fn for_workflow(workflow: &SerializedWorkflow) -> Self {
    let mut routes = HashMap::new();
    for conn in &workflow.connections {
      let is_router = workflow
        .get_block(&conn.source)
        .is_some_and(|b| matches!(b.kind(), BlockKind::Router));
      if is_router {
        routes
          .entry(conn.source.clone())
          .or_insert_with(|| conn.target.clone());
      }
    }
    Self { routes }
  }
}

#[async_trait]
impl BlockHandler for EchoHandler {
  async fn execute(
    &self,
    block: &SerializedBlock,
    inputs: Map<String, Value>,
    _context: &ExecutionContext,
  ) -> Result<Value, HandlerError> {
    let mut response = inputs;

    match block.kind() {
      BlockKind::Condition if !response.contains_key("selectedConditionId") => {
        if let Some(id) = response.get("conditions").and_then(first_condition_id) {
          response.insert("selectedConditionId".to_string(), Value::String(id));
        }
      }
      BlockKind::Router if !response.contains_key("selectedPath") => {
        if let Some(target) = self.routes.get(&block.id) {
          response.insert("selectedPath".to_string(), json!({ "blockId": target }));
        }
      }
      _ => {}
    }

    Ok(json!({ "response": response }))
  }
}

/// Conditions arrive either as an array or as a string holding one.
fn first_condition_id(conditions: &Value) -> Option<String> {
  let parsed;
  let conditions = match conditions {
    Value::String(s) => {
      parsed = serde_json::from_str::<Value>(s).ok()?;
      &parsed
    }
    other => other,
  };
  conditions
    .as_array()?
    .first()?
    .get("id")?
    .as_str()
    .map(str::to_string)
}
