//! How resolved values are placed into parameter fields.

use serde_json::Value;
use simflow_workflow::{BlockKind, ParamType, SerializedBlock};

/// Formatting rules that apply to one parameter field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldContext {
  /// Direct references keep their native type, interpolations are stringified.
  Plain,
  /// Generated code text: interpolated strings are re-quoted as literals.
  Code,
  /// The substituted text is parsed back into structured JSON.
  Json,
  /// Passed through verbatim; the condition evaluator substitutes later.
  Condition,
}

impl FieldContext {
  pub fn for_param(block: &SerializedBlock, key: &str) -> Self {
    match (block.kind(), key) {
      (BlockKind::Condition, "conditions") => return FieldContext::Condition,
      (BlockKind::Function, "code") => return FieldContext::Code,
      (BlockKind::Api, "body") => return FieldContext::Json,
      _ => {}
    }

    match block.inputs.get(key) {
      Some(ParamType::Code) => FieldContext::Code,
      Some(ParamType::Json | ParamType::Object | ParamType::Array) => FieldContext::Json,
      _ => FieldContext::Plain,
    }
  }
}

/// Whether `{{NAME}}` embedded in a larger string is substituted for this
/// field. Whole-field `{{NAME}}` is always substituted.
pub fn allows_embedded_env(block: &SerializedBlock, key: &str) -> bool {
  key == "apiKey" || (matches!(block.kind(), BlockKind::Api) && key == "url")
}

/// A value produced by resolving one reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
  Value(Value),
  /// Text substituted as-is in every context: `plain` variables and
  /// environment values.
  RawText(String),
}

impl Resolved {
  /// Value for a field that consists of exactly this reference.
  pub fn into_direct(self, context: FieldContext) -> Value {
    match (self, context) {
      (Resolved::RawText(text), FieldContext::Json) => parse_json_or_string(text),
      (Resolved::RawText(text), _) => Value::String(text),
      (Resolved::Value(value), FieldContext::Code) => Value::String(stringify(&value, context)),
      (Resolved::Value(Value::String(text)), FieldContext::Json) => parse_json_or_string(text),
      (Resolved::Value(value), _) => value,
    }
  }

  /// Text for a reference embedded in a larger string.
  pub fn into_text(self, context: FieldContext) -> String {
    match self {
      Resolved::RawText(text) => text,
      Resolved::Value(value) => stringify(&value, context),
    }
  }
}

/// String form of a value substituted into surrounding text.
pub fn stringify(value: &Value, context: FieldContext) -> String {
  match (value, context) {
    (Value::String(s), FieldContext::Code) => Value::String(s.clone()).to_string(),
    (Value::String(s), _) => s.clone(),
    (other, _) => other.to_string(),
  }
}

/// Parse `text` as JSON, keeping it as a plain string when it is not.
pub fn parse_json_or_string(text: String) -> Value {
  match serde_json::from_str(&text) {
    Ok(parsed) => parsed,
    Err(_) => Value::String(text),
  }
}
