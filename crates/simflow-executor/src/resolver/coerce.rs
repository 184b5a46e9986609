//! Coercion of resolved parameters to their declared input types.
//!
//! Only strings are converted, and only when they parse cleanly into the
//! declared type. Values that already carry a native type are never turned
//! back into strings, and unparseable strings are left as they are for the
//! block handler to reject.

use serde_json::Value;
use simflow_workflow::ParamType;
use tracing::debug;

/// Coerce one resolved value according to the parameter's declared type.
pub fn coerce_declared(block_id: &str, key: &str, value: Value, declared: Option<ParamType>) -> Value {
  let Value::String(text) = value else {
    return value;
  };
  let Some(declared) = declared else {
    return Value::String(text);
  };

  let coerced = match declared {
    ParamType::Number => parse_number(text.trim()),
    ParamType::Boolean => match text.trim().to_lowercase().as_str() {
      "true" => Some(Value::Bool(true)),
      "false" => Some(Value::Bool(false)),
      _ => None,
    },
    ParamType::Json => parse_structured(&text, |_| true),
    ParamType::Object => parse_structured(&text, Value::is_object),
    ParamType::Array => parse_structured(&text, Value::is_array),
    ParamType::String | ParamType::Code | ParamType::Any => return Value::String(text),
  };

  match coerced {
    Some(value) => value,
    None => {
      if !text.is_empty() {
        debug!(
          block_id = %block_id,
          input = %key,
          declared = ?declared,
          "input left as string, does not parse as declared type"
        );
      }
      Value::String(text)
    }
  }
}

/// Parse a decimal string, preferring an integer representation.
pub fn parse_number(text: &str) -> Option<Value> {
  if let Ok(n) = text.parse::<i64>() {
    return Some(Value::Number(n.into()));
  }
  text
    .parse::<f64>()
    .ok()
    .and_then(serde_json::Number::from_f64)
    .map(Value::Number)
}

fn parse_structured(text: &str, accept: impl Fn(&Value) -> bool) -> Option<Value> {
  let trimmed = text.trim();
  if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
    return None;
  }
  serde_json::from_str::<Value>(trimmed)
    .ok()
    .filter(|v| accept(v))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn coerce(value: Value, declared: ParamType) -> Value {
    coerce_declared("node", "input", value, Some(declared))
  }

  #[test]
  fn test_coerce_number() {
    assert_eq!(coerce(json!("42"), ParamType::Number), json!(42));
    assert_eq!(coerce(json!(" 19.99 "), ParamType::Number), json!(19.99));
    assert_eq!(coerce(json!("not a number"), ParamType::Number), json!("not a number"));
  }

  #[test]
  fn test_coerce_boolean() {
    assert_eq!(coerce(json!("true"), ParamType::Boolean), json!(true));
    assert_eq!(coerce(json!("FALSE"), ParamType::Boolean), json!(false));
    assert_eq!(coerce(json!("yes"), ParamType::Boolean), json!("yes"));
  }

  #[test]
  fn test_coerce_structured() {
    assert_eq!(coerce(json!("[1, 2, 3]"), ParamType::Array), json!([1, 2, 3]));
    assert_eq!(
      coerce(json!(r#"{"key": "value"}"#), ParamType::Object),
      json!({ "key": "value" })
    );
    assert_eq!(coerce(json!("[1]"), ParamType::Object), json!("[1]"));
    assert_eq!(coerce(json!(r#"{"a": 1}"#), ParamType::Json), json!({ "a": 1 }));
  }

  #[test]
  fn test_native_values_are_untouched() {
    assert_eq!(coerce(json!(7), ParamType::String), json!(7));
    assert_eq!(coerce(json!({ "a": 1 }), ParamType::String), json!({ "a": 1 }));
    assert_eq!(coerce_declared("n", "k", json!("7"), None), json!("7"));
  }

  #[test]
  fn test_empty_string_stays_empty() {
    assert_eq!(coerce(json!(""), ParamType::Number), json!(""));
  }
}
