//! Selection of the next layer of blocks to run.

use simflow_executor::ExecutionContext;
use simflow_workflow::{Graph, SerializedWorkflow};

/// Blocks that can run now, in workflow declaration order.
///
/// A block is eligible when it is active, enabled and not yet executed, when
/// every active and enabled upstream block has executed, and when at least
/// one upstream block has executed (so the activation came from a finished
/// source rather than an eager router walk).
pub fn next_layer(workflow: &SerializedWorkflow, graph: &Graph, context: &ExecutionContext) -> Vec<String> {
  workflow
    .blocks
    .iter()
    .filter(|block| block.enabled)
    .filter(|block| context.is_active(&block.id) && !context.is_executed(&block.id))
    .filter(|block| {
      let incoming = graph.incoming(&block.id);
      let sources_settled = incoming.iter().all(|conn| {
        let source_enabled = workflow.get_block(&conn.source).is_some_and(|b| b.enabled);
        !source_enabled || !context.is_active(&conn.source) || context.is_executed(&conn.source)
      });
      let any_source_executed =
        incoming.is_empty() || incoming.iter().any(|conn| context.is_executed(&conn.source));
      sources_settled && any_source_executed
    })
    .map(|block| block.id.clone())
    .collect()
}
