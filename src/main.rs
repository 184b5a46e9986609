use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use simflow_executor::{ExecutionContext, InputResolver, WorkflowVariable};
use simflow_orchestrator::{EchoHandler, ExecutionInput, ExecutorConfig, WorkflowExecutor};
use simflow_workflow::{AccessibilityMap, SerializedWorkflow};

/// Simflow - dry-run executor for serialized visual workflows
#[derive(Parser)]
#[command(name = "simflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.simflow)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Dry-run a workflow, reading the trigger payload from stdin
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// JSON object of environment variables
    #[arg(long)]
    env_file: Option<PathBuf>,
  },

  /// Print the resolved inputs of one block against a saved context
  Resolve {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Path to a serialized execution context (JSON)
    #[arg(long)]
    context: PathBuf,

    /// The block ID to resolve
    #[arg(long)]
    block: String,
  },

  /// Check a workflow file for structural errors
  Validate {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },
}

/// On-disk workflow: the serialized graph plus its variables.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowFile {
  #[serde(default)]
  id: Option<String>,
  #[serde(flatten)]
  workflow: SerializedWorkflow,
  /// variable id -> variable
  #[serde(default)]
  variables: HashMap<String, WorkflowVariable>,
}

#[tokio::main]
async fn main() -> Result<()> {
  init_tracing();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".simflow"),
  };

  match cli.command {
    Some(Commands::Run {
      workflow_file,
      env_file,
    }) => run_workflow(&workflow_file, env_file.as_deref(), &data_dir).await?,
    Some(Commands::Resolve {
      workflow_file,
      context,
      block,
    }) => resolve_block(&workflow_file, &context, &block).await?,
    Some(Commands::Validate { workflow_file }) => validate_workflow(&workflow_file).await?,
    None => {
      println!("simflow - use --help to see available commands");
    }
  }

  Ok(())
}

fn init_tracing() {
  tracing_subscriber::registry()
    .with(EnvFilter::new(
      std::env::var("RUST_LOG").unwrap_or_else(|_| "simflow=warn".into()),
    ))
    .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
    .init();
}

async fn run_workflow(workflow_file: &Path, env_file: Option<&Path>, data_dir: &Path) -> Result<()> {
  let file = read_workflow(workflow_file).await?;
  let workflow_id = file.id.unwrap_or_else(|| {
    workflow_file
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default()
  });

  let payload = read_payload_from_stdin()?;
  debug!(payload = %payload, "trigger payload");

  let environment_variables = read_environment(env_file, data_dir).await?;

  let executor = WorkflowExecutor::new(
    Arc::new(EchoHandler::for_workflow(&file.workflow)),
    ExecutorConfig::default(),
  );
  let input = ExecutionInput {
    workflow_id,
    payload,
    environment_variables,
    workflow_variables: file.variables.into_values().collect(),
  };

  let result = executor
    .execute(&file.workflow, input, CancellationToken::new())
    .await
    .context("workflow execution failed")?;

  info!(
    execution_id = %result.execution_id,
    blocks_executed = result.execution_order.len(),
    "execution finished"
  );

  println!("{}", serde_json::to_string_pretty(&result)?);

  Ok(())
}

async fn resolve_block(workflow_file: &Path, context_file: &Path, block_id: &str) -> Result<()> {
  let file = read_workflow(workflow_file).await?;

  let context_content = tokio::fs::read_to_string(context_file)
    .await
    .with_context(|| format!("failed to read context file: {}", context_file.display()))?;
  let context: ExecutionContext = serde_json::from_str(&context_content)
    .with_context(|| format!("failed to parse context file: {}", context_file.display()))?;

  let block = file
    .workflow
    .get_block(block_id)
    .with_context(|| format!("block '{}' not found in workflow", block_id))?;

  let resolver = InputResolver::new(&file.workflow)
    .with_accessibility(AccessibilityMap::build(&file.workflow));
  let inputs = resolver
    .resolve_inputs(block, &context)
    .with_context(|| format!("failed to resolve inputs for block '{}'", block_id))?;

  println!("{}", serde_json::to_string_pretty(&inputs)?);

  Ok(())
}

async fn validate_workflow(workflow_file: &Path) -> Result<()> {
  let file = read_workflow(workflow_file).await?;

  file
    .workflow
    .validate()
    .with_context(|| format!("invalid workflow: {}", workflow_file.display()))?;
  if file.workflow.starter().is_none() {
    bail!("invalid workflow: {}: no starter block", workflow_file.display());
  }

  eprintln!(
    "Workflow is valid: {} blocks, {} connections",
    file.workflow.blocks.len(),
    file.workflow.connections.len()
  );

  Ok(())
}

async fn read_workflow(path: &Path) -> Result<WorkflowFile> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read workflow file: {}", path.display()))?;

  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse workflow file: {}", path.display()))
}

/// Environment from `--env-file`, else `<data-dir>/environment.json` when it
/// exists, else empty.
async fn read_environment(env_file: Option<&Path>, data_dir: &Path) -> Result<HashMap<String, String>> {
  let path = match env_file {
    Some(path) => path.to_path_buf(),
    None => {
      let default = data_dir.join("environment.json");
      if !tokio::fs::try_exists(&default).await.unwrap_or(false) {
        return Ok(HashMap::new());
      }
      default
    }
  };

  let content = tokio::fs::read_to_string(&path)
    .await
    .with_context(|| format!("failed to read environment file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse environment file: {}", path.display()))
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(serde_json::json!({}));
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;

  if input.trim().is_empty() {
    Ok(serde_json::json!({}))
  } else {
    serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
  }
}
