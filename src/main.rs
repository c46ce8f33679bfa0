use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sirocco_engine::{EngineConfig, WorkflowEngine, WorkflowService};
use sirocco_scheduler::{Scheduler, SchedulerConfig};
use sirocco_store::{SqliteStore, State, Store, WorkflowExecution};

/// Sirocco - a workflow engine for YAML-defined task graphs
#[derive(Parser)]
#[command(name = "sirocco")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.sirocco)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Database URL (default: sqlite database in the data directory)
  #[arg(long, global = true)]
  database: Option<String>,

  /// How often the scheduler looks for due calls
  #[arg(long, global = true, default_value_t = 1000)]
  poll_interval_ms: u64,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Check a workflow file without registering it
  Validate { workflow_file: PathBuf },

  /// Register the workflows in a file
  Register {
    workflow_file: PathBuf,

    /// Replace workflows that are already registered
    #[arg(long)]
    replace: bool,
  },

  /// List registered workflows
  List,

  /// Delete a registered workflow
  Delete { name: String },

  /// Start a workflow and wait for it to finish
  ///
  /// Input is read as a JSON object from --input, or from stdin when piped.
  Run {
    workflow: String,

    #[arg(long)]
    input: Option<String>,

    /// Environment as a JSON object, visible to expressions as `__env`
    #[arg(long)]
    env: Option<String>,

    /// Give up waiting after this many seconds (the execution keeps its state)
    #[arg(long)]
    timeout: Option<u64>,
  },

  /// List workflow executions
  Executions {
    #[arg(long)]
    workflow: Option<String>,
  },

  /// List the task executions of a workflow execution
  Tasks { execution_id: String },

  /// Pause a running workflow execution
  Pause { execution_id: String },

  /// Resume a paused workflow execution
  Resume { execution_id: String },

  /// Complete a running workflow execution
  Stop {
    execution_id: String,

    #[arg(long, value_enum, default_value_t = StopState::Error)]
    state: StopState,

    #[arg(long)]
    message: Option<String>,
  },

  /// Run scheduler workers until interrupted
  Worker,
}

#[derive(Clone, Copy, ValueEnum)]
enum StopState {
  Success,
  Error,
}

impl From<StopState> for State {
  fn from(state: StopState) -> Self {
    match state {
      StopState::Success => State::Success,
      StopState::Error => State::Error,
    }
  }
}

/// Store, scheduler and engine wired together.
struct App {
  store: Arc<dyn Store>,
  scheduler: Arc<Scheduler>,
  engine: Arc<WorkflowEngine>,
}

impl App {
  async fn open(cli: &Cli) -> Result<Self> {
    let url = match &cli.database {
      Some(url) => url.clone(),
      None => {
        let data_dir = data_dir(cli.data_dir.as_deref())?;
        tokio::fs::create_dir_all(&data_dir)
          .await
          .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
        format!("sqlite://{}", data_dir.join("sirocco.db").display())
      }
    };

    let sqlite = SqliteStore::connect(&url)
      .await
      .with_context(|| format!("failed to open database: {}", url))?;
    sqlite.migrate().await.context("failed to migrate database")?;

    Ok(Self::with_store(
      Arc::new(sqlite),
      Duration::from_millis(cli.poll_interval_ms),
    ))
  }

  fn with_store(store: Arc<dyn Store>, poll_interval: Duration) -> Self {
    let scheduler = Arc::new(Scheduler::new(
      Arc::clone(&store),
      SchedulerConfig {
        poll_interval,
        ..SchedulerConfig::default()
      },
    ));
    let engine = WorkflowEngine::new(
      Arc::clone(&store),
      Arc::clone(&scheduler),
      EngineConfig::default(),
    );

    Self {
      store,
      scheduler,
      engine,
    }
  }

  fn service(&self) -> WorkflowService {
    WorkflowService::new(Arc::clone(&self.store))
  }
}

fn data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
  match explicit {
    Some(dir) => Ok(dir.to_path_buf()),
    None => Ok(
      dirs::home_dir()
        .context("could not determine home directory")?
        .join(".sirocco"),
    ),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cli = Cli::parse();

  let Some(command) = &cli.command else {
    println!("sirocco - use --help to see available commands");
    return Ok(());
  };

  match command {
    // Validation never touches the database
    Commands::Validate { workflow_file } => validate(workflow_file).await,
    command => execute(&App::open(&cli).await?, command).await,
  }
}

async fn execute(app: &App, command: &Commands) -> Result<()> {
  match command {
    Commands::Validate { workflow_file } => validate(workflow_file).await,
    Commands::Register {
      workflow_file,
      replace,
    } => register(app, workflow_file, *replace).await,
    Commands::List => {
      let workflows = app.service().list_workflows().await?;
      print_json(&serde_json::to_value(workflows)?)
    }
    Commands::Delete { name } => {
      app.service().delete_workflow(name).await?;
      eprintln!("Deleted workflow: {}", name);
      Ok(())
    }
    Commands::Run {
      workflow,
      input,
      env,
      timeout,
    } => {
      let env = env.as_deref().map(parse_object).transpose()?.unwrap_or_default();
      let timeout = timeout.map(Duration::from_secs);
      run(app, workflow, input.as_deref(), env, timeout).await
    }
    Commands::Executions { workflow } => {
      let executions = app.store.list_executions(workflow.as_deref()).await?;
      for execution in executions {
        println!(
          "{}  {:<16} {:<8} {}",
          execution.id,
          execution.workflow_name,
          execution.state.as_str(),
          execution.state_info.unwrap_or_default()
        );
      }
      Ok(())
    }
    Commands::Tasks { execution_id } => {
      let tasks = app.engine.list_task_executions(execution_id).await?;
      for task in tasks {
        println!(
          "{}  {:<16} {:<15} attempt={} {}",
          task.id,
          task.name,
          task.state.as_str(),
          task.attempt,
          task.state_info.unwrap_or_default()
        );
      }
      Ok(())
    }
    Commands::Pause { execution_id } => {
      let execution = app.engine.pause_workflow(execution_id).await?;
      eprintln!("Execution {}: {}", execution.id, execution.state);
      Ok(())
    }
    Commands::Resume { execution_id } => {
      let execution = app.engine.resume_workflow(execution_id).await?;
      eprintln!("Execution {}: {}", execution.id, execution.state);
      Ok(())
    }
    Commands::Stop {
      execution_id,
      state,
      message,
    } => {
      let execution = app
        .engine
        .stop_workflow(execution_id, (*state).into(), message.clone())
        .await?;
      eprintln!("Execution {}: {}", execution.id, execution.state);
      Ok(())
    }
    Commands::Worker => worker(app).await,
  }
}

async fn read_workflow_file(workflow_file: &Path) -> Result<String> {
  tokio::fs::read_to_string(workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))
}

async fn validate(workflow_file: &Path) -> Result<()> {
  let text = read_workflow_file(workflow_file).await?;
  let service = WorkflowService::new(Arc::new(sirocco_store::MemoryStore::new()));
  let specs = service
    .validate(&text)
    .with_context(|| format!("invalid workflow file: {}", workflow_file.display()))?;

  for spec in specs {
    eprintln!("Valid workflow: {} ({} tasks)", spec.name(), spec.tasks().len());
  }
  Ok(())
}

async fn register(app: &App, workflow_file: &Path, replace: bool) -> Result<()> {
  let text = read_workflow_file(workflow_file).await?;
  let service = app.service();
  let definitions = if replace {
    service.put_workflows(&text).await
  } else {
    service.create_workflows(&text).await
  }
  .with_context(|| format!("failed to register workflows from: {}", workflow_file.display()))?;

  for definition in definitions {
    eprintln!("Registered workflow: {}", definition.name);
  }
  Ok(())
}

async fn run(
  app: &App,
  workflow: &str,
  input: Option<&str>,
  env: Map<String, Value>,
  timeout: Option<Duration>,
) -> Result<()> {
  let input = match input {
    Some(text) => parse_object(text)?,
    None => read_input_from_stdin()?,
  };

  let execution = app
    .engine
    .start_workflow(workflow, input, env)
    .await
    .with_context(|| format!("failed to start workflow: {}", workflow))?;
  eprintln!("Started execution: {}", execution.id);

  let execution = match timeout {
    Some(limit) => tokio::time::timeout(limit, settle(app, execution.clone()))
      .await
      .map_err(|_| {
        anyhow::anyhow!(
          "execution {} still running after {}s",
          execution.id,
          limit.as_secs_f64()
        )
      })??,
    None => settle(app, execution).await?,
  };

  eprintln!("Execution {}: {}", execution.id, execution.state);
  match execution.state {
    State::Success => print_json(&execution.output.0),
    State::Paused => Ok(()),
    _ => bail!(
      "workflow failed: {}",
      execution.state_info.unwrap_or_default()
    ),
  }
}

/// Drive deferred work (retries, sub-workflow results) until the execution
/// leaves the running states.
async fn settle(app: &App, mut execution: WorkflowExecution) -> Result<WorkflowExecution> {
  while matches!(execution.state, State::Idle | State::Running) {
    let handles = app.scheduler.poll_once().await?;
    if handles.is_empty() {
      tokio::time::sleep(app.scheduler.config().poll_interval).await;
    }
    for handle in handles {
      handle.await.context("scheduler call panicked")?;
    }
    execution = app.engine.get_execution(&execution.id).await?;
  }
  Ok(execution)
}

async fn worker(app: &App) -> Result<()> {
  let cancel = CancellationToken::new();
  let handle = app.scheduler.start(cancel.clone());

  tokio::signal::ctrl_c()
    .await
    .context("failed to listen for ctrl-c")?;
  tracing::info!("shutdown_requested");

  cancel.cancel();
  handle.await.context("scheduler loop panicked")?;
  Ok(())
}

fn parse_object(text: &str) -> Result<Map<String, Value>> {
  match serde_json::from_str(text).context("failed to parse JSON")? {
    Value::Object(map) => Ok(map),
    other => bail!("expected a JSON object, got: {}", other),
  }
}

fn read_input_from_stdin() -> Result<Map<String, Value>> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(Map::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read input from stdin")?;

  if input.trim().is_empty() {
    Ok(Map::new())
  } else {
    parse_object(&input)
  }
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
