use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::block::{BlockKind, SerializedBlock};
use crate::connection::Connection;
use crate::error::WorkflowError;
use crate::graph::Graph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopType {
  #[default]
  For,
  ForEach,
}

/// A group of blocks that re-executes as a bounded unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
  pub id: String,
  pub nodes: Vec<String>,
  #[serde(default)]
  pub iterations: usize,
  #[serde(default)]
  pub loop_type: LoopType,
  /// Static collection for `forEach` loops. Either a JSON value or a string
  /// holding JSON.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub for_each_items: Option<serde_json::Value>,
}

/// A group of blocks fanned out once per distribution item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelConfig {
  pub id: String,
  pub nodes: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub distribution: Option<serde_json::Value>,
}

/// A serialized workflow, immutable for the lifetime of one execution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedWorkflow {
  #[serde(default)]
  pub version: Option<String>,
  pub blocks: Vec<SerializedBlock>,
  #[serde(default)]
  pub connections: Vec<Connection>,
  #[serde(default)]
  pub loops: HashMap<String, LoopConfig>,
  #[serde(default)]
  pub parallels: HashMap<String, ParallelConfig>,
}

impl SerializedWorkflow {
  /// Build the graph structure for traversal.
  pub fn graph(&self) -> Graph {
    Graph::new(&self.connections)
  }

  /// Get a block by ID.
  pub fn get_block(&self, block_id: &str) -> Option<&SerializedBlock> {
    self.blocks.iter().find(|b| b.id == block_id)
  }

  /// The designated starter block, if the workflow has one.
  pub fn starter(&self) -> Option<&SerializedBlock> {
    self
      .blocks
      .iter()
      .find(|b| matches!(b.kind(), BlockKind::Starter))
  }

  /// All loops whose node list contains `block_id`.
  pub fn loops_containing<'a>(
    &'a self,
    block_id: &'a str,
  ) -> impl Iterator<Item = &'a LoopConfig> {
    self
      .loops
      .values()
      .filter(move |l| l.nodes.iter().any(|n| n == block_id))
  }

  /// All parallels whose node list contains `block_id`.
  pub fn parallels_containing<'a>(
    &'a self,
    block_id: &'a str,
  ) -> impl Iterator<Item = &'a ParallelConfig> {
    self
      .parallels
      .values()
      .filter(move |p| p.nodes.iter().any(|n| n == block_id))
  }

  /// Check the structural guarantees the serializer normally provides.
  pub fn validate(&self) -> Result<(), WorkflowError> {
    let mut ids = HashSet::new();
    for block in &self.blocks {
      if !ids.insert(block.id.as_str()) {
        return Err(WorkflowError::DuplicateBlockId(block.id.clone()));
      }
    }

    for conn in &self.connections {
      if !ids.contains(conn.source.as_str()) || !ids.contains(conn.target.as_str()) {
        return Err(WorkflowError::InvalidConnection {
          source_id: conn.source.clone(),
          target: conn.target.clone(),
        });
      }
    }

    let loop_members = self.loops.values().map(|l| ("loop", &l.id, &l.nodes));
    let parallel_members = self
      .parallels
      .values()
      .map(|p| ("parallel", &p.id, &p.nodes));
    for (group, group_id, nodes) in loop_members.chain(parallel_members) {
      if let Some(missing) = nodes.iter().find(|n| !ids.contains(n.as_str())) {
        return Err(WorkflowError::InvalidGroupMember {
          group,
          group_id: group_id.clone(),
          block_id: missing.clone(),
        });
      }
    }

    let starters: Vec<String> = self
      .blocks
      .iter()
      .filter(|b| matches!(b.kind(), BlockKind::Starter))
      .map(|b| b.id.clone())
      .collect();
    if starters.len() > 1 {
      return Err(WorkflowError::MultipleStarters(starters));
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn workflow(value: serde_json::Value) -> SerializedWorkflow {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn test_deserialize_loops_and_parallels() {
    let wf = workflow(json!({
      "blocks": [
        { "id": "start", "metadata": { "id": "starter" } },
        { "id": "loop-1", "metadata": { "id": "loop" } },
        { "id": "fn-1", "metadata": { "id": "function" } }
      ],
      "connections": [
        { "source": "start", "target": "loop-1" },
        { "source": "loop-1", "target": "fn-1", "sourceHandle": "loop-start-source" }
      ],
      "loops": {
        "loop-1": {
          "id": "loop-1",
          "nodes": ["fn-1"],
          "iterations": 3,
          "loopType": "forEach",
          "forEachItems": "[1, 2, 3]"
        }
      }
    }));

    let config = &wf.loops["loop-1"];
    assert_eq!(config.loop_type, LoopType::ForEach);
    assert_eq!(config.iterations, 3);
    assert_eq!(wf.loops_containing("fn-1").count(), 1);
    assert_eq!(wf.loops_containing("start").count(), 0);
    assert_eq!(wf.starter().map(|b| b.id.as_str()), Some("start"));
    assert!(wf.validate().is_ok());
  }

  #[test]
  fn test_validate_rejects_unknown_connection_target() {
    let wf = workflow(json!({
      "blocks": [{ "id": "a", "metadata": { "id": "starter" } }],
      "connections": [{ "source": "a", "target": "ghost" }]
    }));

    assert!(matches!(
      wf.validate(),
      Err(WorkflowError::InvalidConnection { .. })
    ));
  }

  #[test]
  fn test_validate_rejects_duplicate_ids() {
    let wf = workflow(json!({
      "blocks": [
        { "id": "a", "metadata": { "id": "starter" } },
        { "id": "a", "metadata": { "id": "agent" } }
      ]
    }));

    assert!(matches!(wf.validate(), Err(WorkflowError::DuplicateBlockId(id)) if id == "a"));
  }

  #[test]
  fn test_validate_rejects_unknown_group_member() {
    let wf = workflow(json!({
      "blocks": [{ "id": "a", "metadata": { "id": "starter" } }],
      "parallels": { "p": { "id": "p", "nodes": ["missing"] } }
    }));

    assert!(matches!(
      wf.validate(),
      Err(WorkflowError::InvalidGroupMember { group: "parallel", .. })
    ));
  }
}
