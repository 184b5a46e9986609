//! Active path tracking.
//!
//! The tracker answers two questions for the outer executor: is a block on a
//! path that is going to run, and which downstream blocks become active once
//! a batch of blocks has finished. It never fails; missing or malformed
//! decision data results in no activation.

use std::collections::HashSet;

use serde_json::Value;
use simflow_workflow::{BlockKind, Connection, ConnectionHandle, Graph, SerializedWorkflow};
use tracing::debug;

use crate::context::ExecutionContext;

/// Tracks which blocks are reachable under the routing decisions made so far.
#[derive(Debug, Clone)]
pub struct PathTracker<'w> {
  workflow: &'w SerializedWorkflow,
  graph: Graph,
}

impl<'w> PathTracker<'w> {
  pub fn new(workflow: &'w SerializedWorkflow) -> Self {
    Self {
      workflow,
      graph: workflow.graph(),
    }
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  /// Whether `block_id` is on an active path.
  ///
  /// Pull-style and side-effect free: true if the block is already marked
  /// active, or if any incoming connection comes from an executed source
  /// that activates that particular connection.
  pub fn is_in_active_path(&self, block_id: &str, context: &ExecutionContext) -> bool {
    if context.is_active(block_id) {
      return true;
    }

    self
      .graph
      .incoming(block_id)
      .iter()
      .any(|conn| self.connection_is_active(conn, context))
  }

  fn connection_is_active(&self, conn: &Connection, context: &ExecutionContext) -> bool {
    let source_id = conn.source.as_str();
    if !context.is_executed(source_id) {
      return false;
    }

    let Some(source) = self.workflow.get_block(source_id) else {
      return false;
    };

    match source.kind() {
      BlockKind::Router => context
        .decisions
        .router
        .get(source_id)
        .is_some_and(|target| *target == conn.target),
      BlockKind::Condition => match conn.handle() {
        ConnectionHandle::Condition(condition_id) => context
          .decisions
          .condition
          .get(source_id)
          .is_some_and(|selected| selected == condition_id),
        _ => false,
      },
      _ => context.is_active(source_id),
    }
  }

  /// Propagate activation after a batch of blocks finished executing.
  pub fn update_execution_paths(&self, executed_block_ids: &[String], context: &mut ExecutionContext) {
    for block_id in executed_block_ids {
      let Some(block) = self.workflow.get_block(block_id) else {
        debug!(block_id = %block_id, "ignoring unknown block in path update");
        continue;
      };

      match block.kind() {
        BlockKind::Router => self.update_router_paths(block_id, context),
        BlockKind::Condition => self.update_condition_paths(block_id, context),
        BlockKind::Loop => self.activate_handle(block_id, ConnectionHandle::LoopStart, context),
        BlockKind::Parallel => {
          self.activate_handle(block_id, ConnectionHandle::ParallelStart, context)
        }
        BlockKind::Starter
        | BlockKind::Agent
        | BlockKind::Api
        | BlockKind::Function
        | BlockKind::Evaluator
        | BlockKind::Response
        | BlockKind::Tool(_) => self.update_regular_paths(block_id, context),
      }
    }
  }

  fn update_router_paths(&self, block_id: &str, context: &mut ExecutionContext) {
    let Some(selected) = context
      .block_output(block_id)
      .and_then(|output| decision_field(output, &["selectedPath", "blockId"]))
      .map(str::to_string)
    else {
      debug!(block_id = %block_id, "router produced no selected path");
      return;
    };

    debug!(block_id = %block_id, selected = %selected, "router selected path");
    context
      .decisions
      .router
      .insert(block_id.to_string(), selected.clone());
    context.activate(selected.clone());
    self.activate_downstream(&selected, context);
  }

  /// Activate every block reachable from `block_id`. Blocks already active
  /// are not descended into, which keeps the walk finite on loop back-edges.
  fn activate_downstream(&self, block_id: &str, context: &mut ExecutionContext) {
    let mut stack = vec![block_id.to_string()];
    let mut visited = HashSet::new();

    while let Some(current) = stack.pop() {
      if !visited.insert(current.clone()) {
        continue;
      }
      for target in self.graph.downstream(&current) {
        if !context.is_active(target) {
          context.activate(target);
          stack.push(target.to_string());
        }
      }
    }
  }

  fn update_condition_paths(&self, block_id: &str, context: &mut ExecutionContext) {
    let Some(selected) = context
      .block_output(block_id)
      .and_then(|output| decision_field(output, &["selectedConditionId"]))
      .map(str::to_string)
    else {
      debug!(block_id = %block_id, "condition produced no selected condition");
      return;
    };

    debug!(block_id = %block_id, selected = %selected, "condition selected branch");
    context
      .decisions
      .condition
      .insert(block_id.to_string(), selected.clone());

    for conn in self.graph.outgoing(block_id) {
      if conn.handle() == ConnectionHandle::Condition(&selected) {
        context.activate(conn.target.clone());
      }
    }
  }

  fn activate_handle(
    &self,
    block_id: &str,
    handle: ConnectionHandle<'_>,
    context: &mut ExecutionContext,
  ) {
    for conn in self.graph.outgoing(block_id) {
      if conn.handle() == handle {
        context.activate(conn.target.clone());
      }
    }
  }

  fn update_regular_paths(&self, block_id: &str, context: &mut ExecutionContext) {
    self.activate_successors(block_id, context, |conn, context| {
      self.crosses_open_boundary(block_id, &conn.target, context)
    });
  }

  /// Activate the outgoing connections of `block_id` that pass `accept`,
  /// following the handle rules of a regular block: `error` fires only when
  /// the output carries an error, `source` only when it does not, and any
  /// other handle always fires.
  pub fn activate_successors(
    &self,
    block_id: &str,
    context: &mut ExecutionContext,
    accept: impl Fn(&Connection, &ExecutionContext) -> bool,
  ) {
    let has_error = context
      .block_output(block_id)
      .is_some_and(output_has_error);

    for conn in self.graph.outgoing(block_id) {
      if !accept(conn, context) {
        continue;
      }

      let activate = match conn.handle() {
        ConnectionHandle::Error => has_error,
        ConnectionHandle::Source => !has_error,
        _ => true,
      };
      if activate {
        context.activate(conn.target.clone());
      }
    }
  }

  /// Loop and parallel boundary gating.
  ///
  /// Connections that stay inside a group are sequenced by the loop manager,
  /// never here. Connections leaving a group fire only once every group
  /// containing the source is complete.
  fn crosses_open_boundary(&self, source: &str, target: &str, context: &ExecutionContext) -> bool {
    let mut groups = self
      .workflow
      .loops_containing(source)
      .map(|l| (&l.id, &l.nodes))
      .chain(
        self
          .workflow
          .parallels_containing(source)
          .map(|p| (&p.id, &p.nodes)),
      )
      .peekable();

    if groups.peek().is_none() {
      return true;
    }

    let mut all_complete = true;
    for (group_id, nodes) in groups {
      if nodes.iter().any(|n| n == target) {
        return false;
      }
      all_complete &= context.completed_loops.contains(group_id);
    }
    all_complete
  }
}

/// Read a string decision from `output.response.<path>`, falling back to
/// `output.<path>`.
fn decision_field<'a>(output: &'a Value, path: &[&str]) -> Option<&'a str> {
  let lookup = |root: &'a Value| {
    path
      .iter()
      .try_fold(root, |value, key| value.get(key))
      .and_then(Value::as_str)
  };

  output
    .get("response")
    .and_then(lookup)
    .or_else(|| lookup(output))
}

fn output_has_error(output: &Value) -> bool {
  let present = |v: Option<&Value>| v.is_some_and(|e| !e.is_null());
  present(output.get("error")) || present(output.get("response").and_then(|r| r.get("error")))
}
