use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::workflow::SerializedWorkflow;

/// Which blocks each block is permitted to reference.
///
/// A block may read the outputs of its structural ancestors, of blocks that
/// share a loop or parallel group with it, and of the starter block. Nothing
/// else, even when the other block happens to have executed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessibilityMap {
  accessible: HashMap<String, HashSet<String>>,
}

impl AccessibilityMap {
  /// Compute the map from the workflow's connections and groupings.
  pub fn build(workflow: &SerializedWorkflow) -> Self {
    let graph = workflow.graph();
    let starter_id = workflow.starter().map(|b| b.id.clone());

    let accessible = workflow
      .blocks
      .iter()
      .map(|block| {
        let mut allowed = graph.ancestors(&block.id);

        for group in workflow.loops_containing(&block.id) {
          allowed.extend(group.nodes.iter().cloned());
        }
        for group in workflow.parallels_containing(&block.id) {
          allowed.extend(group.nodes.iter().cloned());
        }
        if let Some(starter_id) = &starter_id {
          allowed.insert(starter_id.clone());
        }
        allowed.remove(&block.id);

        (block.id.clone(), allowed)
      })
      .collect();

    Self { accessible }
  }

  /// Build a map from explicit per-block sets.
  pub fn from_sets(accessible: HashMap<String, HashSet<String>>) -> Self {
    Self { accessible }
  }

  /// The set of blocks `block_id` may reference. Blocks missing from the map
  /// may reference nothing.
  pub fn accessible_from(&self, block_id: &str) -> Option<&HashSet<String>> {
    self.accessible.get(block_id)
  }

  pub fn is_accessible(&self, from: &str, to: &str) -> bool {
    self
      .accessible
      .get(from)
      .is_some_and(|allowed| allowed.contains(to))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_build_includes_ancestors_group_members_and_starter() {
    let workflow: SerializedWorkflow = serde_json::from_value(json!({
      "blocks": [
        { "id": "start", "metadata": { "id": "starter" } },
        { "id": "agent", "metadata": { "id": "agent" } },
        { "id": "loop", "metadata": { "id": "loop" } },
        { "id": "body-a", "metadata": { "id": "function" } },
        { "id": "body-b", "metadata": { "id": "function" } },
        { "id": "island", "metadata": { "id": "api" } }
      ],
      "connections": [
        { "source": "start", "target": "agent" },
        { "source": "agent", "target": "loop" },
        { "source": "loop", "target": "body-a", "sourceHandle": "loop-start-source" }
      ],
      "loops": {
        "loop": { "id": "loop", "nodes": ["body-a", "body-b"], "iterations": 2 }
      }
    }))
    .unwrap();

    let map = AccessibilityMap::build(&workflow);

    assert!(map.is_accessible("body-a", "agent"));
    assert!(map.is_accessible("body-a", "body-b"));
    assert!(map.is_accessible("body-b", "body-a"));
    assert!(map.is_accessible("island", "start"));
    assert!(!map.is_accessible("island", "agent"));
    assert!(!map.is_accessible("agent", "agent"));
    assert!(!map.is_accessible("unknown", "start"));
  }
}
