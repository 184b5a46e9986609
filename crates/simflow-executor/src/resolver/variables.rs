//! Typed workflow variable values.

use serde_json::Value;

use super::coerce::parse_number;
use super::format::Resolved;
use crate::context::{ExecutionContext, VariableType, WorkflowVariable};
use crate::error::ResolveError;

/// Find a variable by its name. Names are compared with whitespace removed,
/// so `<variable.retrycount>` finds a variable named `retry count`.
pub fn find_variable<'c>(context: &'c ExecutionContext, name: &str) -> Option<&'c WorkflowVariable> {
  let wanted = normalize_name(name);
  let mut matches: Vec<&WorkflowVariable> = context
    .workflow_variables
    .values()
    .filter(|v| normalize_name(&v.name) == wanted)
    .collect();
  // Several variables may normalize to the same name; prefer an exact match,
  // then the lowest id.
  matches.sort_by(|a, b| (a.name != name, &a.id).cmp(&(b.name != name, &b.id)));
  matches.into_iter().next()
}

/// Block and variable names are matched case-insensitively with whitespace removed.
pub fn normalize_name(name: &str) -> String {
  name
    .chars()
    .filter(|c| !c.is_whitespace())
    .flat_map(char::to_lowercase)
    .collect()
}

/// The variable's stored value converted to its declared type.
pub fn typed_value(block_id: &str, variable: &WorkflowVariable) -> Result<Resolved, ResolveError> {
  let malformed = |expected: &'static str, message: String| ResolveError::MalformedVariableValue {
    block_id: block_id.to_string(),
    name: variable.name.clone(),
    expected,
    message,
  };

  let value = &variable.value;
  match variable.var_type {
    VariableType::String => Ok(Resolved::Value(Value::String(as_text(value)))),
    VariableType::Plain => Ok(Resolved::RawText(as_text(value))),
    VariableType::Number => match value {
      Value::Number(_) => Ok(Resolved::Value(value.clone())),
      Value::String(s) => parse_number(s.trim())
        .map(Resolved::Value)
        .ok_or_else(|| malformed("number", format!("'{}' is not a number", s))),
      other => Err(malformed("number", format!("found {}", json_kind(other)))),
    },
    VariableType::Boolean => match value {
      Value::Bool(_) => Ok(Resolved::Value(value.clone())),
      Value::String(s) => match s.trim().to_lowercase().as_str() {
        "true" => Ok(Resolved::Value(Value::Bool(true))),
        "false" => Ok(Resolved::Value(Value::Bool(false))),
        _ => Err(malformed("boolean", format!("'{}' is not true or false", s))),
      },
      other => Err(malformed("boolean", format!("found {}", json_kind(other)))),
    },
    VariableType::Object => structured(value, Value::is_object)
      .map(Resolved::Value)
      .map_err(|message| malformed("object", message)),
    VariableType::Array => structured(value, Value::is_array)
      .map(Resolved::Value)
      .map_err(|message| malformed("array", message)),
  }
}

fn as_text(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn structured(value: &Value, accept: fn(&Value) -> bool) -> Result<Value, String> {
  let parsed = match value {
    Value::String(s) => serde_json::from_str::<Value>(s).map_err(|e| e.to_string())?,
    other => other.clone(),
  };
  if accept(&parsed) {
    Ok(parsed)
  } else {
    Err(format!("found {}", json_kind(&parsed)))
  }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}
