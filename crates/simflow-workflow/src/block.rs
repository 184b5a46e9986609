use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The type of a block, taken from `metadata.id` in the serialized form.
///
/// Control-flow kinds are named explicitly; every other tool-invocation block
/// is carried as [`BlockKind::Tool`] with its original type tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlockKind {
  Starter,
  Agent,
  Api,
  Function,
  Condition,
  Router,
  Loop,
  Parallel,
  Evaluator,
  Response,
  Tool(String),
}

impl BlockKind {
  pub fn as_str(&self) -> &str {
    match self {
      BlockKind::Starter => "starter",
      BlockKind::Agent => "agent",
      BlockKind::Api => "api",
      BlockKind::Function => "function",
      BlockKind::Condition => "condition",
      BlockKind::Router => "router",
      BlockKind::Loop => "loop",
      BlockKind::Parallel => "parallel",
      BlockKind::Evaluator => "evaluator",
      BlockKind::Response => "response",
      BlockKind::Tool(tag) => tag,
    }
  }
}

impl From<String> for BlockKind {
  fn from(tag: String) -> Self {
    match tag.as_str() {
      "starter" => BlockKind::Starter,
      "agent" => BlockKind::Agent,
      "api" => BlockKind::Api,
      "function" => BlockKind::Function,
      "condition" => BlockKind::Condition,
      "router" => BlockKind::Router,
      "loop" => BlockKind::Loop,
      "parallel" => BlockKind::Parallel,
      "evaluator" => BlockKind::Evaluator,
      "response" => BlockKind::Response,
      _ => BlockKind::Tool(tag),
    }
  }
}

impl From<BlockKind> for String {
  fn from(kind: BlockKind) -> Self {
    kind.as_str().to_string()
  }
}

impl fmt::Display for BlockKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Declared type of a block input parameter.
///
/// Unknown type names map to [`ParamType::Any`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParamType {
  String,
  Number,
  Boolean,
  Json,
  Object,
  Array,
  Code,
  Any,
}

impl From<String> for ParamType {
  fn from(name: String) -> Self {
    match name.as_str() {
      "string" => ParamType::String,
      "number" => ParamType::Number,
      "boolean" => ParamType::Boolean,
      "json" => ParamType::Json,
      "object" => ParamType::Object,
      "array" => ParamType::Array,
      "code" => ParamType::Code,
      _ => ParamType::Any,
    }
  }
}

impl From<ParamType> for String {
  fn from(param: ParamType) -> Self {
    match param {
      ParamType::String => "string",
      ParamType::Number => "number",
      ParamType::Boolean => "boolean",
      ParamType::Json => "json",
      ParamType::Object => "object",
      ParamType::Array => "array",
      ParamType::Code => "code",
      ParamType::Any => "any",
    }
    .to_string()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
  pub x: f64,
  pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
  pub id: BlockKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlockConfig {
  /// Tool identifier invoked by the block handler.
  #[serde(default)]
  pub tool: String,
  /// Raw parameters, before any reference resolution.
  #[serde(default)]
  pub params: serde_json::Map<String, serde_json::Value>,
}

/// One block of a serialized workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedBlock {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub position: Option<Position>,
  pub metadata: BlockMetadata,
  #[serde(default)]
  pub config: BlockConfig,
  /// Parameter name to declared type.
  #[serde(default)]
  pub inputs: HashMap<String, ParamType>,
  #[serde(default)]
  pub outputs: serde_json::Value,
  #[serde(default = "default_enabled")]
  pub enabled: bool,
}

fn default_enabled() -> bool {
  true
}

impl SerializedBlock {
  pub fn kind(&self) -> &BlockKind {
    &self.metadata.id
  }

  /// Display name, falling back to the id for unnamed blocks.
  pub fn name(&self) -> &str {
    self.metadata.name.as_deref().unwrap_or(&self.id)
  }
}
