//! Loop and parallel iteration.
//!
//! The path tracker never activates connections that stay inside a group and
//! holds back connections that leave it. This module does the rest: it runs
//! the body once per iteration (or once per distribution item for a parallel),
//! sequences blocks inside the body, and releases the outgoing connections
//! when the group completes.

use serde_json::{Map, Value, json};
use simflow_executor::resolver::collection_items;
use simflow_executor::{ExecutionContext, PathTracker};
use simflow_workflow::{BlockKind, ConnectionHandle, Graph, LoopType, SerializedWorkflow};
use tracing::{debug, info};

use crate::error::ExecutionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupKind {
  Loop,
  Parallel,
}

impl GroupKind {
  fn start_handle(self) -> ConnectionHandle<'static> {
    match self {
      GroupKind::Loop => ConnectionHandle::LoopStart,
      GroupKind::Parallel => ConnectionHandle::ParallelStart,
    }
  }

  fn end_handle(self) -> ConnectionHandle<'static> {
    match self {
      GroupKind::Loop => ConnectionHandle::LoopEnd,
      GroupKind::Parallel => ConnectionHandle::ParallelEnd,
    }
  }
}

/// A loop or parallel whose body is currently running.
#[derive(Debug)]
struct GroupRun {
  id: String,
  kind: GroupKind,
  nodes: Vec<String>,
  items: Option<Vec<Value>>,
  total: usize,
  /// 1-based; 0 only when `total` is 0.
  iteration: usize,
  results: Vec<Value>,
}

impl GroupRun {
  fn output(&self, completed: bool) -> Value {
    json!({
      "iterations": self.total,
      "currentIteration": self.iteration,
      "completed": completed,
      "results": self.results,
    })
  }

  /// Item of the current iteration. `for` loops expose the 0-based index.
  fn current_item(&self) -> Value {
    let index = self.iteration.saturating_sub(1);
    match &self.items {
      Some(items) => items.get(index).cloned().unwrap_or(Value::Null),
      None => Value::from(index),
    }
  }
}

pub struct LoopManager<'w> {
  workflow: &'w SerializedWorkflow,
  graph: &'w Graph,
  running: Vec<GroupRun>,
}

impl<'w> LoopManager<'w> {
  pub fn new(workflow: &'w SerializedWorkflow, graph: &'w Graph) -> Self {
    Self {
      workflow,
      graph,
      running: Vec::new(),
    }
  }

  /// Start the loop or parallel `block_id` and return its initial output.
  ///
  /// The body itself is activated by the path tracker through the group's
  /// start handle.
  pub fn start(&mut self, block_id: &str, context: &mut ExecutionContext) -> Result<Value, ExecutionError> {
    let kind = match self.workflow.get_block(block_id).map(|b| b.kind()) {
      Some(BlockKind::Parallel) => GroupKind::Parallel,
      _ => GroupKind::Loop,
    };

    let (nodes, items, total) = match kind {
      GroupKind::Loop => match self.workflow.loops.get(block_id) {
        Some(config) if config.loop_type == LoopType::ForEach => {
          let source = config.for_each_items.clone().unwrap_or(Value::Null);
          let items = read_collection(block_id, &source)?;
          let total = items.len();
          (config.nodes.clone(), Some(items), total)
        }
        Some(config) => (config.nodes.clone(), None, config.iterations),
        None => (Vec::new(), None, 0),
      },
      GroupKind::Parallel => match self.workflow.parallels.get(block_id) {
        Some(config) => match &config.distribution {
          Some(distribution) => {
            let items = read_collection(block_id, distribution)?;
            let total = items.len();
            (config.nodes.clone(), Some(items), total)
          }
          None => (config.nodes.clone(), None, 1),
        },
        None => (Vec::new(), None, 0),
      },
    };

    // Drop any earlier run of the same group (re-entry from an outer loop).
    self.running.retain(|run| run.id != block_id);
    context.completed_loops.remove(block_id);

    let run = GroupRun {
      id: block_id.to_string(),
      kind,
      nodes,
      items,
      total,
      iteration: usize::from(total > 0),
      results: Vec::new(),
    };

    if let Some(items) = &run.items {
      context
        .loop_collections
        .insert(run.id.clone(), Value::Array(items.clone()));
    }
    context.loop_iterations.insert(run.id.clone(), run.iteration);
    if run.total > 0 {
      context.loop_items.insert(run.id.clone(), run.current_item());
      info!(
        loop_id = %run.id,
        iteration = run.iteration,
        total = run.total,
        "loop_iteration"
      );
    }

    let output = run.output(false);
    self.running.push(run);
    Ok(output)
  }

  /// Activate connections that stay inside every group containing the
  /// source, for blocks that just executed.
  pub fn propagate_internal(
    &self,
    tracker: &PathTracker<'_>,
    executed: &[String],
    context: &mut ExecutionContext,
  ) {
    self.activate_successors(tracker, executed, context, |source, target| {
      let mut groups = self.groups_containing(source).peekable();
      groups.peek().is_some() && groups.all(|nodes| nodes.iter().any(|n| n == target))
    });
  }

  /// Advance every group whose current iteration has settled, innermost
  /// first. Returns whether anything changed.
  pub fn advance(&mut self, tracker: &PathTracker<'_>, context: &mut ExecutionContext) -> bool {
    self.running.sort_by_key(|run| run.nodes.len());

    let mut changed = false;
    let mut index = 0;
    while index < self.running.len() {
      if !self.is_settled(&self.running[index], context) {
        index += 1;
        continue;
      }
      changed = true;

      let run = &mut self.running[index];
      if run.total > 0 {
        run.results.push(iteration_result(&run.nodes, context));
      }

      if run.iteration < run.total {
        run.iteration += 1;
        let run = &self.running[index];
        self.next_iteration(run, context);
        index += 1;
      } else {
        let run = self.running.remove(index);
        self.complete(run, tracker, context);
      }
    }
    changed
  }

  /// The current iteration is done when every active, enabled body member
  /// has executed and no nested group is still running. A group with no
  /// iterations is settled as soon as it starts, so its body never runs.
  fn is_settled(&self, run: &GroupRun, context: &ExecutionContext) -> bool {
    if run.total == 0 {
      return true;
    }

    let nested_running = self
      .running
      .iter()
      .any(|other| other.id != run.id && run.nodes.contains(&other.id));
    if nested_running {
      return false;
    }

    run.nodes.iter().all(|node| {
      let enabled = self.workflow.get_block(node).is_some_and(|b| b.enabled);
      !enabled || !context.is_active(node) || context.is_executed(node)
    })
  }

  fn next_iteration(&self, run: &GroupRun, context: &mut ExecutionContext) {
    for node in &run.nodes {
      context.executed_blocks.remove(node);
      context.active_execution_path.remove(node);
      context.decisions.router.remove(node);
      context.decisions.condition.remove(node);
    }

    context.loop_iterations.insert(run.id.clone(), run.iteration);
    context.loop_items.insert(run.id.clone(), run.current_item());
    if let Some(state) = context.block_states.get_mut(&run.id) {
      state.output = run.output(false);
    }
    self.activate_handle(&run.id, run.kind.start_handle(), context);

    info!(
      loop_id = %run.id,
      iteration = run.iteration,
      total = run.total,
      "loop_iteration"
    );
  }

  fn complete(&self, run: GroupRun, tracker: &PathTracker<'_>, context: &mut ExecutionContext) {
    context.completed_loops.insert(run.id.clone());

    // Body members that were activated but never ran must not run afterwards.
    let mut executed = Vec::new();
    for node in &run.nodes {
      if context.is_executed(node) {
        executed.push(node.clone());
      } else {
        context.active_execution_path.remove(node);
      }
    }

    if let Some(state) = context.block_states.get_mut(&run.id) {
      state.output = run.output(true);
    }
    self.activate_handle(&run.id, run.kind.end_handle(), context);

    // Connections leaving this group but staying inside an enclosing one are
    // never activated by the path tracker.
    self.activate_successors(tracker, &executed, context, |source, target| {
      !run.nodes.iter().any(|n| n == target)
        && self
          .groups_containing(source)
          .any(|nodes| nodes.iter().any(|n| n == target))
    });
    tracker.update_execution_paths(&executed, context);

    debug!(
      loop_id = %run.id,
      iterations = run.total,
      "loop completed"
    );
  }

  fn activate_handle(&self, block_id: &str, handle: ConnectionHandle<'_>, context: &mut ExecutionContext) {
    for conn in self.graph.outgoing(block_id) {
      if conn.handle() == handle {
        context.activate(conn.target.clone());
      }
    }
  }

  fn groups_containing<'a>(&'a self, block_id: &'a str) -> impl Iterator<Item = &'a Vec<String>> {
    self
      .workflow
      .loops_containing(block_id)
      .map(|l| &l.nodes)
      .chain(
        self
          .workflow
          .parallels_containing(block_id)
          .map(|p| &p.nodes),
      )
  }

  /// Activate outgoing connections of executed regular blocks that pass
  /// `accept`, with the tracker's handle rules.
  fn activate_successors(
    &self,
    tracker: &PathTracker<'_>,
    executed: &[String],
    context: &mut ExecutionContext,
    accept: impl Fn(&str, &str) -> bool,
  ) {
    for block_id in executed {
      let Some(block) = self.workflow.get_block(block_id) else {
        continue;
      };
      if matches!(
        block.kind(),
        BlockKind::Router | BlockKind::Condition | BlockKind::Loop | BlockKind::Parallel
      ) {
        continue;
      }

      tracker.activate_successors(block_id, context, |conn, _| accept(block_id, &conn.target));
    }
  }
}

fn read_collection(group_id: &str, source: &Value) -> Result<Vec<Value>, ExecutionError> {
  collection_items(source).map_err(|message| ExecutionError::MalformedCollection {
    group_id: group_id.to_string(),
    message,
  })
}

/// Outputs of the body members that ran in one iteration, keyed by block id.
fn iteration_result(nodes: &[String], context: &ExecutionContext) -> Value {
  let outputs: Map<String, Value> = nodes
    .iter()
    .filter(|node| context.is_executed(node))
    .filter_map(|node| {
      context
        .block_output(node)
        .map(|output| (node.clone(), output.clone()))
    })
    .collect();
  Value::Object(outputs)
}
