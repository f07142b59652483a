use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use weft_capability::CapabilityRegistry;
use weft_config::WorkflowDef;
use weft_runtime::{Engine, EngineConfig};
use weft_store::{RunFilter, RunStatus, SqliteStore, Store};
use weft_trigger::ManualTrigger;
use weft_workflow::Workflow;

/// Weft - a workflow execution engine
#[derive(Parser)]
#[command(name = "weft")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.weft)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// SQLite database holding run history (default: <data-dir>/weft.db)
  #[arg(long, global = true, env = "WEFT_DB")]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Load a workflow and report validation errors
  Validate {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Run a workflow to completion and print the run as JSON
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Payload file (JSON). Read from stdin when omitted.
    #[arg(long)]
    payload: Option<PathBuf>,

    /// Trigger node to start from
    #[arg(long)]
    entry: Option<String>,

    /// Principal recorded on the run
    #[arg(long, env = "WEFT_PRINCIPAL", default_value = "cli")]
    triggered_by: String,
  },

  /// Inspect run history
  Runs {
    #[command(subcommand)]
    target: RunsTarget,
  },
}

#[derive(Subcommand)]
enum RunsTarget {
  /// List runs of a workflow, newest first
  List {
    #[arg(long)]
    workflow: String,

    #[arg(long, value_enum)]
    status: Option<StatusArg>,

    #[arg(long)]
    limit: Option<usize>,
  },

  /// Print one run with its log
  Show { run_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
enum StatusArg {
  Pending,
  Running,
  Success,
  Failed,
  Canceled,
  TimedOut,
}

impl From<StatusArg> for RunStatus {
  fn from(status: StatusArg) -> Self {
    match status {
      StatusArg::Pending => RunStatus::Pending,
      StatusArg::Running => RunStatus::Running,
      StatusArg::Success => RunStatus::Success,
      StatusArg::Failed => RunStatus::Failed,
      StatusArg::Canceled => RunStatus::Canceled,
      StatusArg::TimedOut => RunStatus::TimedOut,
    }
  }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info")),
    )
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".weft"),
  };
  let db = cli.db.unwrap_or_else(|| data_dir.join("weft.db"));

  match cli.command {
    Some(Commands::Validate { workflow_file }) => validate(&workflow_file).await,
    Some(Commands::Run {
      workflow_file,
      payload,
      entry,
      triggered_by,
    }) => {
      let payload = match payload {
        Some(path) => read_json(&path).await?,
        None => read_payload_from_stdin()?,
      };
      run_workflow(&workflow_file, &db, payload, entry, &triggered_by).await
    }
    Some(Commands::Runs { target }) => {
      let store = open_store(&db).await?;
      match target {
        RunsTarget::List {
          workflow,
          status,
          limit,
        } => {
          let mut filter = RunFilter::default();
          if let Some(status) = status {
            filter = filter.status(status.into());
          }
          if let Some(limit) = limit {
            filter = filter.limit(limit);
          }
          let runs = store
            .list_runs(&workflow, &filter)
            .await
            .context("failed to list runs")?;
          println!("{}", serde_json::to_string_pretty(&runs)?);
        }
        RunsTarget::Show { run_id } => {
          let run = store
            .load_run(&run_id)
            .await
            .with_context(|| format!("failed to load run '{run_id}'"))?;
          println!("{}", serde_json::to_string_pretty(&run)?);
        }
      }
      Ok(ExitCode::SUCCESS)
    }
    None => {
      println!("weft - use --help to see available commands");
      Ok(ExitCode::SUCCESS)
    }
  }
}

async fn load_workflow(path: &Path, registry: &CapabilityRegistry) -> Result<Workflow> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read workflow file: {}", path.display()))?;
  let def = WorkflowDef::from_json(&content)
    .with_context(|| format!("failed to parse workflow file: {}", path.display()))?;
  Workflow::load(def, registry)
    .with_context(|| format!("invalid workflow: {}", path.display()))
}

async fn validate(path: &Path) -> Result<ExitCode> {
  let workflow = load_workflow(path, &CapabilityRegistry::with_builtins()).await?;

  eprintln!("Workflow '{}' is valid", workflow.name);
  let report = serde_json::json!({
    "workflow_id": workflow.workflow_id,
    "nodes": workflow.nodes().len(),
    "order": workflow.graph().order(),
    "triggers": workflow.graph().triggers(),
    "loops": workflow.graph().loops().map(|l| &l.loop_id).collect::<Vec<_>>(),
  });
  println!("{}", serde_json::to_string_pretty(&report)?);
  Ok(ExitCode::SUCCESS)
}

async fn run_workflow(
  path: &Path,
  db: &Path,
  payload: serde_json::Value,
  entry: Option<String>,
  triggered_by: &str,
) -> Result<ExitCode> {
  let registry = CapabilityRegistry::with_builtins();
  let workflow = Arc::new(load_workflow(path, &registry).await?);
  eprintln!("Loaded workflow: {}", workflow.name);

  let store = open_store(db).await?;
  let engine = Engine::new(registry, Arc::new(store), EngineConfig::default());

  let mut trigger = ManualTrigger::new(engine, workflow);
  if let Some(entry) = entry {
    trigger = trigger.at(entry)?;
  }
  let handle = trigger
    .fire(payload, triggered_by)
    .await
    .context("failed to start run")?;
  eprintln!("Started run: {}", handle.id());

  let run = tokio::select! {
    run = handle.wait() => run,
    _ = tokio::signal::ctrl_c() => {
      eprintln!("Interrupted, cancelling run {}", handle.id());
      handle.cancel("interrupted from the command line").await;
      handle.wait().await
    }
  };

  println!("{}", serde_json::to_string_pretty(&run)?);
  eprintln!("Run {} finished: {}", run.run_id, run.status);

  Ok(if run.status == RunStatus::Success {
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  })
}

async fn open_store(db: &Path) -> Result<SqliteStore> {
  if let Some(parent) = db.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create data directory: {}", parent.display()))?;
  }
  SqliteStore::open(db)
    .await
    .with_context(|| format!("failed to open run store: {}", db.display()))
}

async fn read_json(path: &Path) -> Result<serde_json::Value> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read payload file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse payload file: {}", path.display()))
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    Ok(serde_json::json!({}))
  } else {
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
}

#[cfg(test)]
mod tests {
  use super::*;

  fn list_status(args: &[&str]) -> Result<Option<RunStatus>, clap::Error> {
    let cli = Cli::try_parse_from(args)?;
    match cli.command {
      Some(Commands::Runs {
        target: RunsTarget::List { status, .. },
      }) => Ok(status.map(RunStatus::from)),
      _ => panic!("expected runs list"),
    }
  }

  #[test]
  fn test_runs_list_accepts_snake_case_status() {
    let status = list_status(&["weft", "runs", "list", "--workflow", "wf", "--status", "timed_out"]);
    assert_eq!(status.unwrap(), Some(RunStatus::TimedOut));

    let status = list_status(&["weft", "runs", "list", "--workflow", "wf"]);
    assert_eq!(status.unwrap(), None);
  }

  #[test]
  fn test_runs_list_rejects_unknown_status() {
    let err = list_status(&["weft", "runs", "list", "--workflow", "wf", "--status", "done"])
      .unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
  }
}
