//! The `loop` and `parallel` pseudo-scopes.

use serde_json::Value;
use simflow_workflow::SerializedWorkflow;

use super::token::GroupField;
use crate::context::ExecutionContext;
use crate::error::ResolveError;

/// Which kind of group a reference addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
  Loop,
  Parallel,
}

impl GroupKind {
  fn scope(self) -> &'static str {
    match self {
      GroupKind::Loop => "loop",
      GroupKind::Parallel => "parallel",
    }
  }
}

/// Read the item list of a loop or parallel collection.
///
/// Arrays are used as-is, objects become `[key, value]` pairs, strings are
/// parsed as JSON first and null is an empty collection.
pub fn collection_items(value: &Value) -> Result<Vec<Value>, String> {
  match value {
    Value::Null => Ok(Vec::new()),
    Value::Array(items) => Ok(items.clone()),
    Value::Object(map) => Ok(
      map
        .iter()
        .map(|(k, v)| Value::Array(vec![Value::String(k.clone()), v.clone()]))
        .collect(),
    ),
    Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
    Value::String(s) => match serde_json::from_str::<Value>(s) {
      Ok(Value::String(_)) => Err("collection string holds a JSON string".to_string()),
      Ok(parsed) => collection_items(&parsed),
      Err(e) => Err(format!("collection is not valid JSON: {}", e)),
    },
    Value::Bool(_) | Value::Number(_) => Err("collection must be an array or object".to_string()),
  }
}

/// Resolve `<loop.field>` or `<parallel.field>` for `block_id`.
///
/// The innermost group containing the block answers; among nested groups
/// that is the one with the fewest members.
pub fn resolve_group_field(
  workflow: &SerializedWorkflow,
  kind: GroupKind,
  block_id: &str,
  field: &GroupField,
  context: &ExecutionContext,
) -> Result<Value, ResolveError> {
  let reference = format!("<{}.{}>", kind.scope(), field);

  let (group_id, static_items) = match kind {
    GroupKind::Loop => workflow
      .loops_containing(block_id)
      .min_by(|a, b| (a.nodes.len(), &a.id).cmp(&(b.nodes.len(), &b.id)))
      .map(|l| (l.id.as_str(), l.for_each_items.as_ref())),
    GroupKind::Parallel => workflow
      .parallels_containing(block_id)
      .min_by(|a, b| (a.nodes.len(), &a.id).cmp(&(b.nodes.len(), &b.id)))
      .map(|p| (p.id.as_str(), p.distribution.as_ref())),
  }
  .ok_or_else(|| {
    ResolveError::unresolved(
      block_id,
      reference.clone(),
      format!("block is not inside a {}", kind.scope()),
    )
  })?;

  match field {
    GroupField::CurrentItem => context.loop_items.get(group_id).cloned().ok_or_else(|| {
      ResolveError::unresolved(block_id, reference, format!("'{}' has no current item", group_id))
    }),
    GroupField::Index => {
      let iteration = context.loop_iterations.get(group_id).copied().unwrap_or(0);
      Ok(Value::from(iteration.saturating_sub(1)))
    }
    GroupField::Items => {
      let source = match context.loop_collections.get(group_id) {
        Some(collection) => Some(collection),
        None => static_items,
      };
      let Some(source) = source else {
        return Err(ResolveError::unresolved(
          block_id,
          reference,
          format!("'{}' has no collection", group_id),
        ));
      };
      collection_items(source)
        .map(Value::Array)
        .map_err(|message| ResolveError::MalformedCollection {
          block_id: block_id.to_string(),
          group_id: group_id.to_string(),
          message,
        })
    }
    GroupField::Results => Ok(
      context
        .block_output(group_id)
        .and_then(|output| {
          output
            .get("results")
            .or_else(|| output.get("response").and_then(|r| r.get("results")))
        })
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new())),
    ),
    GroupField::Unknown(name) => Err(ResolveError::unresolved(
      block_id,
      reference,
      format!("unknown {} field '{}'", kind.scope(), name),
    )),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_collection_items() {
    assert_eq!(collection_items(&json!([1, 2])).unwrap(), vec![json!(1), json!(2)]);
    assert_eq!(collection_items(&json!("[\"a\"]")).unwrap(), vec![json!("a")]);
    assert_eq!(
      collection_items(&json!({ "k": 1 })).unwrap(),
      vec![json!(["k", 1])]
    );
    assert!(collection_items(&Value::Null).unwrap().is_empty());
    assert!(collection_items(&json!("[1, 2")).is_err());
    assert!(collection_items(&json!(5)).is_err());
  }
}
