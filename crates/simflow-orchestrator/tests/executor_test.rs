//! Integration tests for WorkflowExecutor::execute.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use simflow_executor::{ExecutionContext, VariableType, WorkflowVariable};
use simflow_orchestrator::{
  BlockHandler, EchoHandler, ExecutionError, ExecutionInput, ExecutorConfig, HandlerError,
  WorkflowExecutor,
};
use simflow_workflow::{SerializedBlock, SerializedWorkflow};
use tokio_util::sync::CancellationToken;

/// Echoes inputs like [`EchoHandler`] but fails for the listed block ids.
struct FailingHandler {
  fail: HashSet<String>,
}

#[async_trait]
impl BlockHandler for FailingHandler {
  async fn execute(
    &self,
    block: &SerializedBlock,
    inputs: Map<String, Value>,
    context: &ExecutionContext,
  ) -> Result<Value, HandlerError> {
    if self.fail.contains(&block.id) {
      return Err(HandlerError::new("boom"));
    }
    EchoHandler::default().execute(block, inputs, context).await
  }
}

fn workflow(value: Value) -> SerializedWorkflow {
  serde_json::from_value(value).expect("invalid workflow fixture")
}

fn block(id: &str, kind: &str, params: Value) -> Value {
  json!({
    "id": id,
    "metadata": { "id": kind, "name": id },
    "config": { "tool": kind, "params": params }
  })
}

fn conn(source: &str, target: &str) -> Value {
  json!({ "source": source, "target": target })
}

fn conn_with(source: &str, target: &str, handle: &str) -> Value {
  json!({ "source": source, "target": target, "sourceHandle": handle })
}

fn echo_executor() -> WorkflowExecutor {
  WorkflowExecutor::new(Arc::new(EchoHandler::default()), ExecutorConfig::default())
}

fn input(payload: Value) -> ExecutionInput {
  ExecutionInput {
    workflow_id: "wf-test".to_string(),
    payload,
    ..Default::default()
  }
}

#[tokio::test]
async fn test_linear_workflow_passes_outputs_downstream() {
  let wf = workflow(json!({
    "blocks": [
      block("start", "starter", json!({})),
      block("agent-1", "agent", json!({ "prompt": "Hello <start.input.name>" })),
      block("fn-1", "function", json!({ "text": "<agent-1.prompt>" }))
    ],
    "connections": [conn("start", "agent-1"), conn("agent-1", "fn-1")]
  }));

  let result = echo_executor()
    .execute(&wf, input(json!({ "name": "Ada" })), CancellationToken::new())
    .await
    .unwrap();

  assert!(result.success);
  assert_eq!(result.execution_order, vec!["start", "agent-1", "fn-1"]);
  assert_eq!(result.output, json!({ "response": { "text": "Hello Ada" } }));
  assert_eq!(
    result.block_states["start"].output,
    json!({ "input": { "name": "Ada" } })
  );
}

#[tokio::test]
async fn test_router_runs_selected_branch_only() {
  let wf = workflow(json!({
    "blocks": [
      block("start", "starter", json!({})),
      block("router-1", "router", json!({ "selectedPath": { "blockId": "b" } })),
      block("a", "agent", json!({})),
      block("b", "agent", json!({})),
      block("b-next", "function", json!({}))
    ],
    "connections": [
      conn("start", "router-1"),
      conn("router-1", "a"),
      conn("router-1", "b"),
      conn("b", "b-next")
    ]
  }));

  let result = echo_executor()
    .execute(&wf, input(json!({})), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.execution_order, vec!["start", "router-1", "b", "b-next"]);
  assert!(!result.block_states.contains_key("a"));
}

#[tokio::test]
async fn test_condition_runs_matching_branch() {
  let wf = workflow(json!({
    "blocks": [
      block("start", "starter", json!({})),
      block("cond-1", "condition", json!({
        "conditions": [{ "id": "c1", "value": "<start.input.n> > 1" }],
        "selectedConditionId": "c2"
      })),
      block("then-1", "agent", json!({})),
      block("else-1", "agent", json!({}))
    ],
    "connections": [
      conn("start", "cond-1"),
      conn_with("cond-1", "then-1", "condition-c1"),
      conn_with("cond-1", "else-1", "condition-c2")
    ]
  }));

  let result = echo_executor()
    .execute(&wf, input(json!({ "n": 3 })), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.execution_order, vec!["start", "cond-1", "else-1"]);
  assert_eq!(
    result.block_states["cond-1"].output["response"]["conditions"][0]["value"],
    json!("<start.input.n> > 1")
  );
}

fn error_workflow(with_error_path: bool) -> SerializedWorkflow {
  let mut connections = vec![conn("start", "api-1"), conn_with("api-1", "on-success", "source")];
  if with_error_path {
    connections.push(conn_with("api-1", "on-error", "error"));
  }

  workflow(json!({
    "blocks": [
      block("start", "starter", json!({})),
      block("api-1", "api", json!({ "url": "https://example.com" })),
      block("on-success", "agent", json!({})),
      block("on-error", "agent", json!({ "reason": "<api-1.error>" }))
    ],
    "connections": connections
  }))
}

#[tokio::test]
async fn test_handler_error_routes_through_error_connection() {
  let wf = error_workflow(true);
  let handler = FailingHandler {
    fail: HashSet::from(["api-1".to_string()]),
  };
  let executor = WorkflowExecutor::new(Arc::new(handler), ExecutorConfig::default());

  let result = executor
    .execute(&wf, input(json!({})), CancellationToken::new())
    .await
    .unwrap();

  assert!(!result.success);
  assert_eq!(result.execution_order, vec!["start", "api-1", "on-error"]);
  assert_eq!(result.block_states["api-1"].output, json!({ "error": "boom" }));
  assert_eq!(result.output, json!({ "response": { "reason": "boom" } }));
}

#[tokio::test]
async fn test_handler_error_without_error_connection_fails_run() {
  let wf = error_workflow(false);
  let handler = FailingHandler {
    fail: HashSet::from(["api-1".to_string()]),
  };
  let executor = WorkflowExecutor::new(Arc::new(handler), ExecutorConfig::default());

  let err = executor
    .execute(&wf, input(json!({})), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(err, ExecutionError::BlockFailed { ref block_id, .. } if block_id == "api-1"));
}

#[tokio::test]
async fn test_unresolved_reference_fails_run() {
  let wf = workflow(json!({
    "blocks": [
      block("start", "starter", json!({})),
      block("agent-1", "agent", json!({ "prompt": "<ghost.content>" }))
    ],
    "connections": [conn("start", "agent-1")]
  }));

  let err = echo_executor()
    .execute(&wf, input(json!({})), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(err, ExecutionError::InputResolution { ref block_id, .. } if block_id == "agent-1"));
}

#[tokio::test]
async fn test_for_each_loop_runs_body_per_item() {
  let wf = workflow(json!({
    "blocks": [
      block("start", "starter", json!({})),
      block("loop-1", "loop", json!({})),
      block("body", "function", json!({ "item": "<loop.currentItem>", "index": "<loop.index>" })),
      block("after", "agent", json!({ "results": "<loop-1.results>" }))
    ],
    "connections": [
      conn("start", "loop-1"),
      conn_with("loop-1", "body", "loop-start-source"),
      conn_with("loop-1", "after", "loop-end-source")
    ],
    "loops": {
      "loop-1": {
        "id": "loop-1",
        "nodes": ["body"],
        "loopType": "forEach",
        "forEachItems": ["a", "b", "c"]
      }
    }
  }));

  let result = echo_executor()
    .execute(&wf, input(json!({})), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(
    result.execution_order,
    vec!["start", "loop-1", "body", "body", "body", "after"]
  );

  let loop_output = &result.block_states["loop-1"].output;
  assert_eq!(loop_output["completed"], json!(true));
  assert_eq!(loop_output["iterations"], json!(3));
  assert_eq!(
    loop_output["results"][2]["body"],
    json!({ "response": { "item": "c", "index": 2 } })
  );

  let after_results = &result.output["response"]["results"];
  assert_eq!(after_results.as_array().map(Vec::len), Some(3));
  assert_eq!(after_results[0]["body"]["response"]["item"], json!("a"));
}

#[tokio::test]
async fn test_for_loop_gates_external_connection() {
  let wf = workflow(json!({
    "blocks": [
      block("start", "starter", json!({})),
      block("loop-1", "loop", json!({})),
      block("step-1", "function", json!({ "i": "<loop.index>" })),
      block("step-2", "function", json!({ "prev": "<step-1.i>" })),
      block("after", "agent", json!({ "last": "<step-2.prev>" }))
    ],
    "connections": [
      conn("start", "loop-1"),
      conn_with("loop-1", "step-1", "loop-start-source"),
      conn("step-1", "step-2"),
      conn("step-2", "after")
    ],
    "loops": {
      "loop-1": { "id": "loop-1", "nodes": ["step-1", "step-2"], "iterations": 2 }
    }
  }));

  let result = echo_executor()
    .execute(&wf, input(json!({})), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(
    result.execution_order,
    vec!["start", "loop-1", "step-1", "step-2", "step-1", "step-2", "after"]
  );
  assert_eq!(result.output, json!({ "response": { "last": 1 } }));
}

#[tokio::test]
async fn test_parallel_runs_body_per_distribution_item() {
  let wf = workflow(json!({
    "blocks": [
      block("start", "starter", json!({})),
      block("par-1", "parallel", json!({})),
      block("worker", "agent", json!({ "item": "<parallel.currentItem>" })),
      block("collect", "function", json!({ "all": "<par-1.results>" }))
    ],
    "connections": [
      conn("start", "par-1"),
      conn_with("par-1", "worker", "parallel-start-source"),
      conn("worker", "collect")
    ],
    "parallels": {
      "par-1": { "id": "par-1", "nodes": ["worker"], "distribution": ["x", "y"] }
    }
  }));

  let result = echo_executor()
    .execute(&wf, input(json!({})), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(
    result.execution_order,
    vec!["start", "par-1", "worker", "worker", "collect"]
  );
  let all = &result.output["response"]["all"];
  assert_eq!(all[0]["worker"]["response"]["item"], json!("x"));
  assert_eq!(all[1]["worker"]["response"]["item"], json!("y"));
}

#[tokio::test]
async fn test_empty_for_each_skips_body() {
  let wf = workflow(json!({
    "blocks": [
      block("start", "starter", json!({})),
      block("loop-1", "loop", json!({})),
      block("body", "function", json!({ "item": "<loop.currentItem>" })),
      block("after", "agent", json!({ "results": "<loop-1.results>" }))
    ],
    "connections": [
      conn("start", "loop-1"),
      conn_with("loop-1", "body", "loop-start-source"),
      conn_with("loop-1", "after", "loop-end-source")
    ],
    "loops": {
      "loop-1": { "id": "loop-1", "nodes": ["body"], "loopType": "forEach", "forEachItems": [] }
    }
  }));

  let result = echo_executor()
    .execute(&wf, input(json!({})), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.execution_order, vec!["start", "loop-1", "after"]);
  assert!(!result.block_states.contains_key("body"));
  let loop_output = &result.block_states["loop-1"].output;
  assert_eq!(loop_output["completed"], json!(true));
  assert_eq!(loop_output["iterations"], json!(0));
  assert_eq!(result.output, json!({ "response": { "results": [] } }));
}

#[tokio::test]
async fn test_zero_iteration_groups_skip_body() {
  let wf = workflow(json!({
    "blocks": [
      block("start", "starter", json!({})),
      block("loop-1", "loop", json!({})),
      block("step", "function", json!({})),
      block("par-1", "parallel", json!({})),
      block("worker", "agent", json!({ "item": "<parallel.currentItem>" })),
      block("done", "function", json!({}))
    ],
    "connections": [
      conn("start", "loop-1"),
      conn_with("loop-1", "step", "loop-start-source"),
      conn_with("loop-1", "par-1", "loop-end-source"),
      conn_with("par-1", "worker", "parallel-start-source"),
      conn_with("par-1", "done", "parallel-end-source")
    ],
    "loops": {
      "loop-1": { "id": "loop-1", "nodes": ["step"], "iterations": 0 }
    },
    "parallels": {
      "par-1": { "id": "par-1", "nodes": ["worker"], "distribution": [] }
    }
  }));

  let result = echo_executor()
    .execute(&wf, input(json!({})), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.execution_order, vec!["start", "loop-1", "par-1", "done"]);
  assert!(result.success);
}

#[tokio::test]
async fn test_error_branch_inside_loop_body() {
  let wf = workflow(json!({
    "blocks": [
      block("start", "starter", json!({})),
      block("loop-1", "loop", json!({})),
      block("risky", "api", json!({})),
      block("recover", "agent", json!({ "reason": "<risky.error>" })),
      block("happy", "agent", json!({}))
    ],
    "connections": [
      conn("start", "loop-1"),
      conn_with("loop-1", "risky", "loop-start-source"),
      conn_with("risky", "recover", "error"),
      conn_with("risky", "happy", "source")
    ],
    "loops": {
      "loop-1": { "id": "loop-1", "nodes": ["risky", "recover", "happy"], "iterations": 1 }
    }
  }));
  let handler = FailingHandler {
    fail: HashSet::from(["risky".to_string()]),
  };
  let executor = WorkflowExecutor::new(Arc::new(handler), ExecutorConfig::default());

  let result = executor
    .execute(&wf, input(json!({})), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.execution_order, vec!["start", "loop-1", "risky", "recover"]);
  assert!(!result.block_states.contains_key("happy"));
  assert_eq!(
    result.block_states["recover"].output,
    json!({ "response": { "reason": "boom" } })
  );
}

#[tokio::test]
async fn test_environment_and_variables_reach_handlers() {
  let wf = workflow(json!({
    "blocks": [
      block("start", "starter", json!({})),
      block("api-1", "api", json!({
        "apiKey": "{{API_KEY}}",
        "retries": "<variable.retries>"
      }))
    ],
    "connections": [conn("start", "api-1")]
  }));

  let run_input = ExecutionInput {
    workflow_id: "wf-env".to_string(),
    payload: json!({}),
    environment_variables: HashMap::from([("API_KEY".to_string(), "secret".to_string())]),
    workflow_variables: vec![WorkflowVariable {
      id: "var-1".to_string(),
      name: "retries".to_string(),
      var_type: VariableType::Number,
      value: json!("3"),
    }],
  };

  let result = echo_executor()
    .execute(&wf, run_input, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(
    result.output,
    json!({ "response": { "apiKey": "secret", "retries": 3 } })
  );
}

#[tokio::test]
async fn test_disabled_block_is_skipped() {
  let mut disabled = block("skipped", "agent", json!({}));
  disabled["enabled"] = json!(false);
  let wf = workflow(json!({
    "blocks": [block("start", "starter", json!({})), disabled],
    "connections": [conn("start", "skipped")]
  }));

  let result = echo_executor()
    .execute(&wf, input(json!({})), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.execution_order, vec!["start"]);
}

#[tokio::test]
async fn test_layer_limit() {
  let wf = workflow(json!({
    "blocks": [
      block("start", "starter", json!({})),
      block("a", "agent", json!({})),
      block("b", "agent", json!({})),
      block("c", "agent", json!({}))
    ],
    "connections": [conn("start", "a"), conn("a", "b"), conn("b", "c")]
  }));
  let executor = WorkflowExecutor::new(
    Arc::new(EchoHandler::default()),
    ExecutorConfig {
      max_layers: 2,
      ..Default::default()
    },
  );

  let err = executor
    .execute(&wf, input(json!({})), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(err, ExecutionError::LayerLimitExceeded { limit: 2 }));
}

#[tokio::test]
async fn test_cancelled_before_start() {
  let wf = error_workflow(true);
  let cancel = CancellationToken::new();
  cancel.cancel();

  let err = echo_executor()
    .execute(&wf, input(json!({})), cancel)
    .await
    .unwrap_err();

  assert!(matches!(err, ExecutionError::Cancelled));
}

#[tokio::test]
async fn test_missing_starter() {
  let wf = workflow(json!({
    "blocks": [block("a", "agent", json!({}))]
  }));

  let err = echo_executor()
    .execute(&wf, input(json!({})), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(err, ExecutionError::MissingStarter));
}
