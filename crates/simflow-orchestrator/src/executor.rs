//! Workflow executor implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value, json};
use simflow_executor::{ExecutionContext, InputResolver, PathTracker, WorkflowVariable};
use simflow_workflow::{
  AccessibilityMap, BlockKind, ConnectionHandle, Graph, SerializedBlock, SerializedWorkflow,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::ExecutionError;
use crate::handler::{BlockHandler, HandlerError};
use crate::loops::LoopManager;
use crate::result::ExecutionResult;
use crate::schedule::next_layer;

/// Configuration for the workflow executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
  /// Upper bound on executed layers before the run is aborted.
  pub max_layers: usize,
  /// Reject references to blocks that are not upstream of the referencing
  /// block (see [`AccessibilityMap::build`]).
  pub enforce_accessibility: bool,
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      max_layers: 1000,
      enforce_accessibility: true,
    }
  }
}

/// Everything a run needs besides the workflow itself.
#[derive(Debug, Clone, Default)]
pub struct ExecutionInput {
  pub workflow_id: String,
  /// Trigger payload, exposed as `<start.input>`.
  pub payload: Value,
  pub environment_variables: HashMap<String, String>,
  pub workflow_variables: Vec<WorkflowVariable>,
}

/// The workflow executor.
///
/// Runs blocks layer by layer: every block whose inputs are settled runs
/// concurrently through the [`BlockHandler`], then the path tracker and the
/// loop manager decide what becomes runnable next.
pub struct WorkflowExecutor {
  handler: Arc<dyn BlockHandler>,
  config: ExecutorConfig,
}

impl WorkflowExecutor {
  pub fn new(handler: Arc<dyn BlockHandler>, config: ExecutorConfig) -> Self {
    Self { handler, config }
  }

  /// Execute a workflow with the given trigger payload.
  #[instrument(
    name = "workflow_execute",
    skip(self, workflow, input, cancel),
    fields(workflow_id = %input.workflow_id)
  )]
  pub async fn execute(
    &self,
    workflow: &SerializedWorkflow,
    input: ExecutionInput,
    cancel: CancellationToken,
  ) -> Result<ExecutionResult, ExecutionError> {
    let execution_id = uuid::Uuid::new_v4().to_string();
    let started = Instant::now();

    info!(
      execution_id = %execution_id,
      workflow_id = %input.workflow_id,
      trigger_payload = %input.payload,
      "workflow_started"
    );

    let result = self
      .run(workflow, input, &execution_id, started, &cancel)
      .await;

    match &result {
      Ok(result) => {
        info!(
          execution_id = %execution_id,
          success = result.success,
          blocks_executed = result.execution_order.len(),
          duration_ms = result.duration_ms,
          "workflow_completed"
        );
      }
      Err(e) => {
        error!(
          execution_id = %execution_id,
          error = %e,
          "workflow_failed"
        );
      }
    }

    result
  }

  async fn run(
    &self,
    workflow: &SerializedWorkflow,
    input: ExecutionInput,
    execution_id: &str,
    started: Instant,
    cancel: &CancellationToken,
  ) -> Result<ExecutionResult, ExecutionError> {
    workflow.validate()?;
    let starter = workflow.starter().ok_or(ExecutionError::MissingStarter)?;

    let graph = workflow.graph();
    let tracker = PathTracker::new(workflow);
    let mut resolver = InputResolver::new(workflow);
    if self.config.enforce_accessibility {
      resolver = resolver.with_accessibility(AccessibilityMap::build(workflow));
    }
    let mut loops = LoopManager::new(workflow, &graph);

    let mut context = ExecutionContext::new(input.workflow_id)
      .with_environment(input.environment_variables)
      .with_variables(input.workflow_variables);
    let mut execution_order = Vec::new();

    // Seed the starter with the trigger payload.
    context.activate(starter.id.clone());
    context.record_output(&starter.id, json!({ "input": input.payload }), 0);
    execution_order.push(starter.id.clone());
    tracker.update_execution_paths(std::slice::from_ref(&starter.id), &mut context);

    let mut layers = 0;
    loop {
      if cancel.is_cancelled() {
        warn!(execution_id = %execution_id, "workflow cancelled");
        return Err(ExecutionError::Cancelled);
      }

      let ready = next_layer(workflow, &graph, &context);
      if ready.is_empty() {
        // A group may still be able to move on to its next iteration.
        if loops.advance(&tracker, &mut context) {
          continue;
        }
        break;
      }

      layers += 1;
      if layers > self.config.max_layers {
        return Err(ExecutionError::LayerLimitExceeded {
          limit: self.config.max_layers,
        });
      }

      info!(
        execution_id = %execution_id,
        layer = layers,
        ready_blocks = ?ready,
        "layer_ready"
      );

      self
        .run_layer(workflow, &graph, &resolver, &mut loops, &ready, &mut context, execution_id, cancel)
        .await?;
      execution_order.extend(ready.iter().cloned());

      tracker.update_execution_paths(&ready, &mut context);
      loops.propagate_internal(&tracker, &ready, &mut context);
      loops.advance(&tracker, &mut context);
    }

    let output = execution_order
      .last()
      .and_then(|id| context.block_output(id))
      .cloned()
      .unwrap_or(Value::Null);
    let success = !context
      .block_states
      .values()
      .any(|state| state.output.get("error").is_some_and(|e| !e.is_null()));

    Ok(ExecutionResult {
      execution_id: execution_id.to_string(),
      success,
      output,
      block_states: context.block_states,
      execution_order,
      duration_ms: millis(started.elapsed()),
    })
  }

  /// Execute one layer and record every block's output in `context`.
  #[allow(clippy::too_many_arguments)]
  async fn run_layer(
    &self,
    workflow: &SerializedWorkflow,
    graph: &Graph,
    resolver: &InputResolver<'_>,
    loops: &mut LoopManager<'_>,
    ready: &[String],
    context: &mut ExecutionContext,
    execution_id: &str,
    cancel: &CancellationToken,
  ) -> Result<(), ExecutionError> {
    let mut pending: Vec<(&SerializedBlock, Map<String, Value>)> = Vec::with_capacity(ready.len());
    let mut failed: Vec<(&SerializedBlock, String)> = Vec::new();

    for block_id in ready {
      let Some(block) = workflow.get_block(block_id) else {
        continue;
      };

      if matches!(block.kind(), BlockKind::Loop | BlockKind::Parallel) {
        let output = loops.start(block_id, context)?;
        context.record_output(block_id, output, 0);
        info!(
          execution_id = %execution_id,
          block_id = %block_id,
          block_type = %block.kind(),
          "block_completed"
        );
        continue;
      }

      match resolver.resolve_inputs(block, context) {
        Ok(inputs) => pending.push((block, inputs)),
        Err(e) if has_error_connection(graph, block_id) => failed.push((block, e.to_string())),
        Err(e) => {
          error!(
            execution_id = %execution_id,
            block_id = %block_id,
            error = %e,
            "block_failed"
          );
          return Err(ExecutionError::InputResolution {
            block_id: block_id.clone(),
            source: e,
          });
        }
      }
    }

    let shared: &ExecutionContext = context;
    let handler = self.handler.as_ref();
    let calls = pending.into_iter().map(|(block, inputs)| async move {
      let started = Instant::now();
      let result = handler.execute(block, inputs, shared).await;
      (block, result, started.elapsed())
    });

    let results = tokio::select! {
      results = futures::future::join_all(calls) => results,
      _ = cancel.cancelled() => {
        warn!(execution_id = %execution_id, "workflow cancelled during block execution");
        return Err(ExecutionError::Cancelled);
      }
    };

    let failures = failed
      .into_iter()
      .map(|(block, message)| (block, Err(HandlerError::new(message)), Duration::ZERO));

    for (block, result, elapsed) in results.into_iter().chain(failures) {
      match result {
        Ok(output) => {
          info!(
            execution_id = %execution_id,
            block_id = %block.id,
            block_type = %block.kind(),
            duration_ms = millis(elapsed),
            "block_completed"
          );
          context.record_output(&block.id, output, millis(elapsed));
        }
        Err(e) if has_error_connection(graph, &block.id) => {
          warn!(
            execution_id = %execution_id,
            block_id = %block.id,
            error = %e,
            "block_failed"
          );
          context.record_output(&block.id, json!({ "error": e.message }), millis(elapsed));
        }
        Err(e) => {
          error!(
            execution_id = %execution_id,
            block_id = %block.id,
            error = %e,
            "block_failed"
          );
          return Err(ExecutionError::BlockFailed {
            block_id: block.id.clone(),
            message: e.message,
          });
        }
      }
    }

    Ok(())
  }
}

fn has_error_connection(graph: &Graph, block_id: &str) -> bool {
  graph
    .outgoing(block_id)
    .iter()
    .any(|conn| conn.handle() == ConnectionHandle::Error)
}

fn millis(duration: Duration) -> u64 {
  u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
