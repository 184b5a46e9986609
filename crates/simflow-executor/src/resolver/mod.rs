//! Input resolution.
//!
//! Turns a block's raw parameters into concrete values by substituting block
//! outputs, workflow variables, loop and parallel state and environment
//! variables. Resolution reads the context and never mutates it, so resolving
//! the same block twice against the same context gives the same result.

mod coerce;
mod format;
mod groups;
pub mod token;
mod variables;

use serde_json::{Map, Value};
use simflow_workflow::{AccessibilityMap, BlockKind, SerializedBlock, SerializedWorkflow};
use tracing::{debug, trace};

pub use coerce::coerce_declared;
pub use format::FieldContext;
pub use groups::collection_items;

use crate::context::ExecutionContext;
use crate::error::ResolveError;
use format::{Resolved, allows_embedded_env, parse_json_or_string};
use groups::{GroupKind, resolve_group_field};
use token::{PathSegment, Reference, Segment, as_direct_reference, display_path, tokenize};
use variables::{find_variable, normalize_name, typed_value};

/// Field being resolved, with the formatting rules of its top-level key.
struct Field<'a> {
  block: &'a SerializedBlock,
  context: FieldContext,
  embedded_env: bool,
}

impl Field<'_> {
  /// Rules for values nested inside this field. Only the top-level string of
  /// a JSON field is parsed; nested cells keep plain type preservation.
  fn nested(&self) -> Self {
    let context = match self.context {
      FieldContext::Json => FieldContext::Plain,
      other => other,
    };
    Field {
      block: self.block,
      context,
      embedded_env: self.embedded_env,
    }
  }
}

/// Resolves block parameters against an [`ExecutionContext`].
#[derive(Debug, Clone)]
pub struct InputResolver<'w> {
  workflow: &'w SerializedWorkflow,
  accessibility: Option<AccessibilityMap>,
}

impl<'w> InputResolver<'w> {
  /// A resolver without access control: any block may reference any other.
  pub fn new(workflow: &'w SerializedWorkflow) -> Self {
    Self {
      workflow,
      accessibility: None,
    }
  }

  /// Restrict block references to the blocks listed in `map`.
  pub fn with_accessibility(mut self, map: AccessibilityMap) -> Self {
    self.accessibility = Some(map);
    self
  }

  /// Resolve every parameter of `block`.
  pub fn resolve_inputs(
    &self,
    block: &SerializedBlock,
    context: &ExecutionContext,
  ) -> Result<Map<String, Value>, ResolveError> {
    let mut inputs = Map::new();

    for (key, raw) in &block.config.params {
      let field = Field {
        block,
        context: FieldContext::for_param(block, key),
        embedded_env: allows_embedded_env(block, key),
      };
      let resolved = self.resolve_value(&field, raw, context)?;
      let value = coerce_declared(&block.id, key, resolved, block.inputs.get(key).copied());
      inputs.insert(key.clone(), value);
    }

    debug!(block_id = %block.id, inputs = inputs.len(), "resolved block inputs");
    Ok(inputs)
  }

  fn resolve_value(
    &self,
    field: &Field<'_>,
    value: &Value,
    context: &ExecutionContext,
  ) -> Result<Value, ResolveError> {
    if field.context == FieldContext::Condition {
      return Ok(value.clone());
    }

    match value {
      Value::String(s) => self.resolve_string(field, s, context),
      Value::Array(items) => {
        let nested = field.nested();
        items
          .iter()
          .map(|item| self.resolve_value(&nested, item, context))
          .collect::<Result<Vec<_>, _>>()
          .map(Value::Array)
      }
      Value::Object(map) => {
        let nested = field.nested();
        map
          .iter()
          .map(|(k, v)| Ok((k.clone(), self.resolve_value(&nested, v, context)?)))
          .collect::<Result<Map<_, _>, ResolveError>>()
          .map(Value::Object)
      }
      other => Ok(other.clone()),
    }
  }

  fn resolve_string(
    &self,
    field: &Field<'_>,
    text: &str,
    context: &ExecutionContext,
  ) -> Result<Value, ResolveError> {
    let segments = tokenize(text);

    if let Some((raw, reference)) = as_direct_reference(&segments) {
      let resolved = self.resolve_reference(field.block, raw, reference, context)?;
      return Ok(resolved.into_direct(field.context));
    }

    let mut out = String::with_capacity(text.len());
    for segment in &segments {
      match segment {
        Segment::Text(t) => out.push_str(t),
        Segment::Reference { raw, reference } => {
          if matches!(reference, Reference::Env { .. }) && !field.embedded_env {
            out.push_str(raw);
            continue;
          }
          let resolved = self.resolve_reference(field.block, raw, reference, context)?;
          out.push_str(&resolved.into_text(field.context));
        }
      }
    }

    if field.context == FieldContext::Json {
      Ok(parse_json_or_string(out))
    } else {
      Ok(Value::String(out))
    }
  }

  fn resolve_reference(
    &self,
    block: &SerializedBlock,
    raw: &str,
    reference: &Reference,
    context: &ExecutionContext,
  ) -> Result<Resolved, ResolveError> {
    let resolved = match reference {
      Reference::Block { target, path } => {
        let Some(source) = self.find_block(target) else {
          // `<b>` and similar markup that names no block is literal text.
          if path.is_empty() {
            trace!(block_id = %block.id, tag = %raw, "keeping unknown tag as text");
            return Ok(Resolved::RawText(raw.to_string()));
          }
          return Err(ResolveError::unresolved(
            &block.id,
            raw,
            format!("no block with id or name '{}'", target),
          ));
        };
        self.resolve_block_output(block, source, raw, path, context)?
      }
      Reference::Start { path } => {
        let Some(starter) = self.workflow.starter() else {
          return Err(ResolveError::unresolved(&block.id, raw, "workflow has no starter block"));
        };
        self.resolve_block_output(block, starter, raw, path, context)?
      }
      Reference::Variable { name, path } => {
        let Some(variable) = find_variable(context, name) else {
          return Err(ResolveError::unresolved(
            &block.id,
            raw,
            format!("no workflow variable named '{}'", name),
          ));
        };
        match typed_value(&block.id, variable)? {
          Resolved::Value(value) if !path.is_empty() => {
            Resolved::Value(self.follow_path(block, raw, &value, path)?)
          }
          other => other,
        }
      }
      Reference::Loop { field, path } => {
        let value = resolve_group_field(self.workflow, GroupKind::Loop, &block.id, field, context)?;
        Resolved::Value(self.follow_path(block, raw, &value, path)?)
      }
      Reference::Parallel { field, path } => {
        let value =
          resolve_group_field(self.workflow, GroupKind::Parallel, &block.id, field, context)?;
        Resolved::Value(self.follow_path(block, raw, &value, path)?)
      }
      Reference::Env { name } => match context.environment_variables.get(name) {
        Some(value) => Resolved::RawText(value.clone()),
        None => {
          return Err(ResolveError::unresolved(
            &block.id,
            raw,
            format!("environment variable '{}' is not set", name),
          ));
        }
      },
    };

    Ok(resolved)
  }

  /// Checks are applied in order: disabled, accessibility, inactive
  /// (resolves to an empty string), missing output, missing path.
  fn resolve_block_output(
    &self,
    block: &SerializedBlock,
    source: &SerializedBlock,
    raw: &str,
    path: &[PathSegment],
    context: &ExecutionContext,
  ) -> Result<Resolved, ResolveError> {
    if !source.enabled {
      return Err(ResolveError::DisabledBlockReference {
        block_id: block.id.clone(),
        referenced: source.id.clone(),
      });
    }

    let is_starter = matches!(source.kind(), BlockKind::Starter);
    if let Some(map) = &self.accessibility {
      if !is_starter && !map.is_accessible(&block.id, &source.id) {
        return Err(ResolveError::UnconnectedBlockReference {
          block_id: block.id.clone(),
          referenced: source.id.clone(),
          accessible: self.accessible_blocks(map, &block.id),
        });
      }
    }

    if !context.is_active(&source.id) {
      trace!(
        block_id = %block.id,
        referenced = %source.id,
        "reference to inactive block resolves to empty string"
      );
      return Ok(Resolved::Value(Value::String(String::new())));
    }

    let missing_path = || {
      ResolveError::unresolved(
        &block.id,
        raw,
        format!("no value at '{}' in output of '{}'", display_path(path), source.id),
      )
    };

    let Some(output) = context.block_output(&source.id) else {
      // A starter that has not been seeded yet has an empty output.
      if is_starter {
        return if path.is_empty() {
          Ok(Resolved::Value(Value::Object(Map::new())))
        } else {
          Err(missing_path())
        };
      }
      return Err(ResolveError::unresolved(
        &block.id,
        raw,
        format!("block '{}' has not produced output", source.id),
      ));
    };

    lookup_output(output, path)
      .cloned()
      .map(Resolved::Value)
      .ok_or_else(missing_path)
  }

  fn follow_path(
    &self,
    block: &SerializedBlock,
    raw: &str,
    value: &Value,
    path: &[PathSegment],
  ) -> Result<Value, ResolveError> {
    navigate(value, path).cloned().ok_or_else(|| {
      ResolveError::unresolved(&block.id, raw, format!("no value at '{}'", display_path(path)))
    })
  }

  /// Look a block up by id, then exact name, then normalized name.
  fn find_block(&self, target: &str) -> Option<&'w SerializedBlock> {
    let workflow: &'w SerializedWorkflow = self.workflow;
    let blocks = &workflow.blocks;
    workflow
      .get_block(target)
      .or_else(|| blocks.iter().find(|b| b.metadata.name.as_deref() == Some(target)))
      .or_else(|| {
        let wanted = normalize_name(target);
        blocks
          .iter()
          .find(|b| b.metadata.name.as_deref().is_some_and(|n| normalize_name(n) == wanted))
      })
  }

  fn accessible_blocks(&self, map: &AccessibilityMap, block_id: &str) -> Vec<(String, String)> {
    let mut ids: Vec<&String> = map
      .accessible_from(block_id)
      .map(|set| set.iter().collect())
      .unwrap_or_default();
    ids.sort();

    ids
      .into_iter()
      .map(|id| {
        let name = self
          .workflow
          .get_block(id)
          .map(|b| b.name().to_string())
          .unwrap_or_else(|| id.clone());
        (name, id.clone())
      })
      .collect()
  }
}

/// Follow `path` into `root`. A numeric key also indexes into arrays.
fn navigate<'v>(root: &'v Value, path: &[PathSegment]) -> Option<&'v Value> {
  path.iter().try_fold(root, |value, segment| match (segment, value) {
    (PathSegment::Index(i), _) => value.get(*i),
    (PathSegment::Key(key), Value::Array(items)) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
    (PathSegment::Key(key), _) => value.get(key.as_str()),
  })
}

/// Look up `path` on a block output, continuing inside `output.response`
/// when the first segment is not present at the top level.
fn lookup_output<'v>(output: &'v Value, path: &[PathSegment]) -> Option<&'v Value> {
  if let Some(found) = navigate(output, path) {
    return Some(found);
  }

  let first_missing = match path.first() {
    Some(PathSegment::Key(key)) => output.get(key.as_str()).is_none(),
    _ => false,
  };
  if !first_missing {
    return None;
  }
  output
    .get("response")
    .filter(|r| r.is_object())
    .and_then(|response| navigate(response, path))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn key(k: &str) -> PathSegment {
    PathSegment::Key(k.to_string())
  }

  #[test]
  fn test_lookup_falls_back_to_response() {
    let output = json!({ "response": { "content": "hi", "items": [1, 2] } });
    assert_eq!(lookup_output(&output, &[key("content")]), Some(&json!("hi")));
    assert_eq!(
      lookup_output(&output, &[key("items"), PathSegment::Index(1)]),
      Some(&json!(2))
    );
    assert_eq!(lookup_output(&output, &[key("items"), key("0")]), Some(&json!(1)));
    assert_eq!(lookup_output(&output, &[key("missing")]), None);
  }

  #[test]
  fn test_lookup_prefers_top_level() {
    let output = json!({ "content": "top", "response": { "content": "nested" } });
    assert_eq!(lookup_output(&output, &[key("content")]), Some(&json!("top")));
    assert_eq!(lookup_output(&output, &[]), Some(&output));
  }
}
