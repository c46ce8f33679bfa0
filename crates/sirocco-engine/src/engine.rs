//! Workflow execution engine.
//!
//! The `WorkflowEngine` drives direct workflows: it seeds start tasks, runs
//! their actions, evaluates transitions of completed tasks and decides when
//! an execution is done. All state lives in the store; the engine only holds
//! per-execution locks.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value, json};
use sirocco_expr::{Evaluator, MinijinjaEvaluator};
use sirocco_scheduler::{
  CallArguments, MethodTarget, Scheduler, SchedulerError, TargetFactory, auth,
};
use sirocco_store::{DelayedCall, Json, State, Store, TaskExecution, WorkflowExecution};
use sirocco_workflow::{DirectGraph, Sentinel, TaskTarget, WorkflowSpec, WorkflowType, parse};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, instrument, warn};

use crate::actions::{Action, ActionRegistry, ActionResult, RESULT_SERIALIZER, ResultSerializer};
use crate::commands::{Command, is_error_handled, next_commands};
use crate::config::EngineConfig;
use crate::data_flow;
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::state::{check_task_transition, check_workflow_transition};

/// Factory path the engine registers with its scheduler.
pub const ENGINE_TARGET: &str = "sirocco_engine::WorkflowEngine";

const RUN_EXISTING_TASK: &str = "run_existing_task";
const ON_ACTION_COMPLETE: &str = "on_action_complete";

/// A workflow execution together with its parsed spec.
struct Run {
  execution: WorkflowExecution,
  spec: WorkflowSpec,
}

impl Run {
  fn id(&self) -> &str {
    &self.execution.id
  }

  fn is_running(&self) -> bool {
    self.execution.state == State::Running
  }
}

/// What a dispatched task is about to run.
enum Dispatched {
  Action {
    action: Arc<dyn Action>,
    input: Map<String, Value>,
  },
  /// One run of the action per `with-items` item.
  Items {
    action: Arc<dyn Action>,
    inputs: Vec<Map<String, Value>>,
    concurrency: Option<usize>,
  },
  Workflow {
    name: String,
    input: Map<String, Value>,
  },
  Noop,
}

/// Async mutexes keyed by execution id.
#[derive(Default)]
struct ExecutionLocks {
  locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ExecutionLocks {
  async fn lock(&self, execution_id: &str) -> OwnedMutexGuard<()> {
    let mutex = {
      let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
      // Entries only referenced by the map are not held by anyone
      locks.retain(|_, m| Arc::strong_count(m) > 1);
      Arc::clone(locks.entry(execution_id.to_string()).or_default())
    };
    mutex.lock_owned().await
  }
}

/// The workflow execution engine.
///
/// Generic over `N: ExecutionNotifier` to allow different notification
/// strategies. Use `WorkflowEngine::new()` for an engine with no-op
/// notifications, or `WorkflowEngine::with_notifier()` to observe events.
///
/// Construction registers the engine with the scheduler so retries and
/// deferred action results re-enter it.
pub struct WorkflowEngine<N: ExecutionNotifier = NoopNotifier> {
  store: Arc<dyn Store>,
  scheduler: Arc<Scheduler>,
  evaluator: Arc<dyn Evaluator>,
  actions: ActionRegistry,
  config: EngineConfig,
  notifier: N,
  locks: ExecutionLocks,
}

impl WorkflowEngine<NoopNotifier> {
  /// Create a new workflow engine with no-op notifications.
  pub fn new(store: Arc<dyn Store>, scheduler: Arc<Scheduler>, config: EngineConfig) -> Arc<Self> {
    Self::with_notifier(store, scheduler, config, NoopNotifier)
  }
}

impl<N: ExecutionNotifier + 'static> WorkflowEngine<N> {
  /// Create a new workflow engine with a custom notifier.
  pub fn with_notifier(
    store: Arc<dyn Store>,
    scheduler: Arc<Scheduler>,
    config: EngineConfig,
    notifier: N,
  ) -> Arc<Self> {
    let engine = Arc::new(Self {
      store,
      scheduler: Arc::clone(&scheduler),
      evaluator: Arc::new(MinijinjaEvaluator::new()),
      actions: ActionRegistry::with_std(),
      config,
      notifier,
      locks: ExecutionLocks::default(),
    });

    scheduler
      .serializers()
      .register(RESULT_SERIALIZER, Arc::new(ResultSerializer::new()));
    scheduler.targets().register_factory(
      ENGINE_TARGET,
      Arc::new(EngineFactory {
        engine: Arc::downgrade(&engine),
      }),
    );

    engine
  }

  /// Actions available to tasks. Starts with the `std.*` actions.
  pub fn actions(&self) -> &ActionRegistry {
    &self.actions
  }

  pub fn scheduler(&self) -> &Arc<Scheduler> {
    &self.scheduler
  }

  pub async fn get_execution(&self, id: &str) -> Result<WorkflowExecution, EngineError> {
    Ok(self.store.get_execution(id).await?)
  }

  pub async fn list_task_executions(&self, execution_id: &str) -> Result<Vec<TaskExecution>, EngineError> {
    Ok(self.store.list_task_executions(execution_id).await?)
  }

  /// Start a registered workflow.
  ///
  /// Input is checked against the workflow's input signature. `env` is
  /// exposed to expressions as `__env` and handed down to sub-workflows.
  /// Failures while dispatching the start tasks fail the execution and are
  /// returned. Later failures only show up as the execution's `ERROR` state
  /// and `state_info`.
  #[instrument(skip(self, input, env))]
  pub async fn start_workflow(
    &self,
    name: &str,
    input: Map<String, Value>,
    env: Map<String, Value>,
  ) -> Result<WorkflowExecution, EngineError> {
    self.start_execution(name, input, env, None).await
  }

  /// Deliver the result of an action that completed asynchronously.
  ///
  /// Results for tasks that already completed are ignored.
  #[instrument(skip(self, result))]
  pub async fn on_action_complete(
    &self,
    task_execution_id: &str,
    result: ActionResult,
  ) -> Result<TaskExecution, EngineError> {
    let execution_id = self
      .store
      .get_task_execution(task_execution_id)
      .await?
      .workflow_execution_id;
    let _guard = self.locks.lock(&execution_id).await;

    let task = self.store.get_task_execution(task_execution_id).await?;
    if task.state.is_completed() {
      debug!(task = %task.name, state = %task.state, "action_result_ignored");
      return Ok(task);
    }
    if task.state != State::Running {
      return Err(EngineError::Workflow(format!(
        "Task '{}' is not running [state={}]",
        task.name, task.state
      )));
    }

    let mut run = self.load_run(&execution_id).await?;
    let outcome = async {
      self.complete_task(&mut run, task, result).await?;
      self.run_pending(&mut run).await
    }
    .await;
    if let Err(e) = outcome {
      self.fail_workflow(&mut run, &e.to_string()).await?;
    }

    Ok(self.store.get_task_execution(task_execution_id).await?)
  }

  /// Deliver an action result later, through the scheduler.
  pub async fn schedule_action_complete(
    &self,
    task_execution_id: &str,
    result: &ActionResult,
    delay: Duration,
  ) -> Result<DelayedCall, EngineError> {
    let mut args = CallArguments::new();
    args.insert("task_execution_id", &task_execution_id)?;
    args.insert("result", result)?;

    let mut serializers = BTreeMap::new();
    serializers.insert("result".to_string(), RESULT_SERIALIZER.to_string());

    Ok(
      self
        .scheduler
        .schedule_call(Some(ENGINE_TARGET), ON_ACTION_COMPLETE, delay, serializers, args)
        .await?,
    )
  }

  /// Run an existing task execution again.
  ///
  /// Used for retries; a task that already succeeded can't be rerun.
  #[instrument(skip(self))]
  pub async fn run_existing_task(&self, task_execution_id: &str) -> Result<TaskExecution, EngineError> {
    let execution_id = self
      .store
      .get_task_execution(task_execution_id)
      .await?
      .workflow_execution_id;
    let _guard = self.locks.lock(&execution_id).await;

    let mut task = self.store.get_task_execution(task_execution_id).await?;
    if task.state == State::Success {
      return Err(EngineError::Workflow(
        "Rerunning existing task that already succeeded is not supported.".to_string(),
      ));
    }

    let mut run = self.load_run(&execution_id).await?;
    if run.execution.state.is_completed() {
      return Err(EngineError::Workflow(format!(
        "Can't rerun task '{}' of a completed workflow [execution_id={}]",
        task.name,
        run.id()
      )));
    }

    task.processed = false;
    let outcome = async {
      let dispatched = self.dispatch_task(&mut run, &mut task).await?;
      self.execute_dispatched(&mut run, task, dispatched).await?;
      self.run_pending(&mut run).await
    }
    .await;
    if let Err(e) = outcome {
      self.fail_workflow(&mut run, &e.to_string()).await?;
    }

    Ok(self.store.get_task_execution(task_execution_id).await?)
  }

  /// Pause a running workflow.
  ///
  /// Tasks that complete while paused keep their results; their transitions
  /// are evaluated on resume.
  #[instrument(skip(self))]
  pub async fn pause_workflow(&self, execution_id: &str) -> Result<WorkflowExecution, EngineError> {
    let _guard = self.locks.lock(execution_id).await;
    let mut run = self.load_run(execution_id).await?;

    match run.execution.state {
      State::Paused => return Ok(run.execution),
      state if state.is_completed() => {
        return Err(EngineError::Workflow(format!(
          "Can't pause a completed workflow [execution_id={}, state={}]",
          execution_id, state
        )));
      }
      _ => {}
    }

    self.set_workflow_state(&mut run, State::Paused, None).await?;
    Ok(run.execution)
  }

  /// Resume a paused workflow. Completed workflows are returned unchanged.
  #[instrument(skip(self))]
  pub async fn resume_workflow(&self, execution_id: &str) -> Result<WorkflowExecution, EngineError> {
    let _guard = self.locks.lock(execution_id).await;
    let mut run = self.load_run(execution_id).await?;

    if run.execution.state != State::Paused {
      return Ok(run.execution);
    }

    self.set_workflow_state(&mut run, State::Running, None).await?;

    let outcome = async {
      // Tasks that completed while paused still owe their transitions
      let tasks = self.store.list_task_executions(execution_id).await?;
      for task in tasks {
        if !run.is_running() {
          break;
        }
        if task.state.is_completed() && !task.processed {
          self.process_transitions(&mut run, task).await?;
        }
      }
      self.run_pending(&mut run).await
    }
    .await;
    if let Err(e) = outcome {
      self.fail_workflow(&mut run, &e.to_string()).await?;
    }

    Ok(run.execution)
  }

  /// Complete a running workflow with `state` (`SUCCESS` or `ERROR`).
  ///
  /// Completed workflows are returned unchanged.
  #[instrument(skip(self, message))]
  pub async fn stop_workflow(
    &self,
    execution_id: &str,
    state: State,
    message: Option<String>,
  ) -> Result<WorkflowExecution, EngineError> {
    if !state.is_completed() {
      return Err(EngineError::Workflow(format!(
        "Can't stop a workflow with state {}; use SUCCESS or ERROR",
        state
      )));
    }

    let _guard = self.locks.lock(execution_id).await;
    let mut run = self.load_run(execution_id).await?;

    if run.execution.state.is_completed() {
      return Ok(run.execution);
    }
    check_workflow_transition(run.execution.state, state)?;

    match state {
      State::Success => {
        self.succeed_workflow(&mut run).await?;
        if let Some(message) = message
          && run.execution.state == State::Success
        {
          run.execution.state_info = Some(message);
          self.store.update_execution(&run.execution).await?;
        }
      }
      _ => {
        let message = message.unwrap_or_else(|| "Workflow stopped".to_string());
        self.fail_workflow(&mut run, &message).await?;
      }
    }

    Ok(run.execution)
  }

  async fn start_execution(
    &self,
    name: &str,
    input: Map<String, Value>,
    env: Map<String, Value>,
    parent_task_execution_id: Option<String>,
  ) -> Result<WorkflowExecution, EngineError> {
    let definition = self.store.get_definition(name).await?;
    let spec = parse(&definition.spec.0, &*self.evaluator)?;
    if spec.workflow_type() != WorkflowType::Direct {
      return Err(EngineError::Workflow(format!(
        "Reverse workflows can't be executed [workflow={}]",
        name
      )));
    }

    let input = spec.apply_input(&input).map_err(EngineError::Input)?;
    let id = uuid::Uuid::new_v4().to_string();
    let auth = if self.config.auth_enabled {
      auth::current()
    } else {
      None
    };
    let context = data_flow::initial_context(&*self.evaluator, &spec, &id, &input, &env, auth)?;

    let now = Utc::now();
    let execution = WorkflowExecution {
      id,
      workflow_name: spec.name().to_string(),
      spec: Json(spec.raw().clone()),
      state: State::Idle,
      state_info: None,
      input: Json(Value::Object(input)),
      context: Json(Value::Object(context)),
      output: Json(json!({})),
      parent_task_execution_id,
      created_at: now,
      updated_at: now,
    };
    self.store.create_execution(&execution).await?;

    let _guard = self.locks.lock(&execution.id).await;
    let mut run = Run { execution, spec };
    self.set_workflow_state(&mut run, State::Running, None).await?;

    info!(execution_id = %run.id(), workflow_name = %run.spec.name(), "workflow_started");
    self.notifier.notify(ExecutionEvent::WorkflowStarted {
      execution_id: run.id().to_string(),
      workflow_name: run.spec.name().to_string(),
    });

    let start_tasks: Vec<String> = DirectGraph::new(&run.spec)?
      .find_start_tasks()
      .iter()
      .map(|task| task.name.clone())
      .collect();

    let mut dispatched = Vec::with_capacity(start_tasks.len());
    for name in start_tasks {
      let context = run.execution.context.0.clone();
      let outcome = async {
        let mut task = self.create_task(&run, &name, context).await?;
        let d = self.dispatch_task(&mut run, &mut task).await?;
        Ok::<_, EngineError>((task, d))
      }
      .await;

      match outcome {
        Ok(pair) => dispatched.push(pair),
        Err(e) => {
          self.fail_workflow(&mut run, &e.to_string()).await?;
          return Err(e);
        }
      }
    }

    let outcome = async {
      for (task, d) in dispatched {
        self.execute_dispatched(&mut run, task, d).await?;
      }
      self.run_pending(&mut run).await
    }
    .await;
    if let Err(e) = outcome {
      self.fail_workflow(&mut run, &e.to_string()).await?;
    }

    Ok(run.execution)
  }

  fn start_child<'a>(
    &'a self,
    name: &'a str,
    input: Map<String, Value>,
    env: Map<String, Value>,
    parent_task_execution_id: String,
  ) -> BoxFuture<'a, Result<WorkflowExecution, EngineError>> {
    Box::pin(self.start_execution(name, input, env, Some(parent_task_execution_id)))
  }

  async fn load_run(&self, execution_id: &str) -> Result<Run, EngineError> {
    let execution = self.store.get_execution(execution_id).await?;
    let spec = parse(&execution.spec.0, &*self.evaluator)?;
    Ok(Run { execution, spec })
  }

  async fn create_task(&self, run: &Run, name: &str, in_context: Value) -> Result<TaskExecution, EngineError> {
    let now = Utc::now();
    let task = TaskExecution {
      id: uuid::Uuid::new_v4().to_string(),
      workflow_execution_id: run.id().to_string(),
      name: name.to_string(),
      state: State::Idle,
      state_info: None,
      in_context: Json(in_context),
      published: Json(json!({})),
      result: None,
      processed: false,
      attempt: 0,
      created_at: now,
      updated_at: now,
    };
    self.store.create_task_execution(&task).await?;
    debug!(execution_id = %run.id(), task = %name, "task_created");
    Ok(task)
  }

  /// Run every idle task until none are left, then check for completion.
  async fn run_pending(&self, run: &mut Run) -> Result<(), EngineError> {
    loop {
      let idle: Vec<TaskExecution> = self
        .store
        .list_task_executions(run.id())
        .await?
        .into_iter()
        .filter(|t| t.state == State::Idle)
        .collect();
      if idle.is_empty() {
        break;
      }

      for mut task in idle {
        let dispatched = self.dispatch_task(run, &mut task).await?;
        self.execute_dispatched(run, task, dispatched).await?;
      }
    }

    self.check_workflow_completion(run).await
  }

  /// Move a task to RUNNING and resolve what it runs.
  ///
  /// On failure the task is marked ERROR and the error is returned.
  async fn dispatch_task(&self, run: &mut Run, task: &mut TaskExecution) -> Result<Dispatched, EngineError> {
    check_task_transition(&task.name, task.state, State::Running)?;
    task.state = State::Running;
    task.state_info = None;
    task.updated_at = Utc::now();
    self.store.update_task_execution(task).await?;

    info!(execution_id = %run.id(), task = %task.name, attempt = task.attempt, "task_started");
    self.notifier.notify(ExecutionEvent::TaskStarted {
      execution_id: run.id().to_string(),
      task_execution_id: task.id.clone(),
      task_name: task.name.clone(),
    });

    match self.resolve_task(run, task) {
      Ok(dispatched) => Ok(dispatched),
      Err(e) => {
        task.state = State::Error;
        task.state_info = Some(e.to_string());
        task.processed = true;
        task.updated_at = Utc::now();
        self.store.update_task_execution(task).await?;
        Err(e)
      }
    }
  }

  fn resolve_task(&self, run: &Run, task: &TaskExecution) -> Result<Dispatched, EngineError> {
    let spec = run
      .spec
      .get_task(&task.name)
      .ok_or_else(|| EngineError::Workflow(format!("Task '{}' not found", task.name)))?;
    let in_context = &task.in_context.0;

    match &spec.target {
      TaskTarget::Action { name } => {
        let action = self.actions.get(name)?;
        if let Some(with_items) = &spec.with_items {
          let inputs =
            data_flow::with_items_inputs(&*self.evaluator, with_items, &spec.input, in_context)?;
          for input in &inputs {
            action.validate_input(input)?;
          }
          return Ok(Dispatched::Items {
            action,
            inputs,
            concurrency: with_items.concurrency,
          });
        }

        let input = data_flow::evaluate_task_input(&*self.evaluator, &spec.input, in_context)?;
        action.validate_input(&input)?;
        Ok(Dispatched::Action { action, input })
      }
      TaskTarget::Workflow { name } => Ok(Dispatched::Workflow {
        name: name.clone(),
        input: data_flow::evaluate_task_input(&*self.evaluator, &spec.input, in_context)?,
      }),
      TaskTarget::Noop => Ok(Dispatched::Noop),
    }
  }

  async fn execute_dispatched(
    &self,
    run: &mut Run,
    task: TaskExecution,
    dispatched: Dispatched,
  ) -> Result<(), EngineError> {
    match dispatched {
      Dispatched::Action { action, input } => match action.run(input).await {
        Ok(Some(result)) => self.complete_task(run, task, result).await,
        Ok(None) => {
          debug!(execution_id = %run.id(), task = %task.name, "task_waiting_for_result");
          Ok(())
        }
        Err(e) => self.complete_task(run, task, ActionResult::error(e.to_string())).await,
      },
      Dispatched::Items {
        action,
        inputs,
        concurrency,
      } => {
        debug!(execution_id = %run.id(), task = %task.name, items = inputs.len(), "task_items_started");
        let result = run_items(action, inputs, concurrency).await;
        self.complete_task(run, task, result).await
      }
      Dispatched::Workflow { name, input } => {
        let env = data_flow::environment(&run.execution.context.0);
        match self.start_child(&name, input, env, task.id.clone()).await {
          Ok(child) => {
            debug!(
              execution_id = %run.id(),
              task = %task.name,
              child_execution_id = %child.id,
              "sub_workflow_started"
            );
            Ok(())
          }
          Err(e) => self.complete_task(run, task, ActionResult::error(e.to_string())).await,
        }
      }
      Dispatched::Noop => self.complete_task(run, task, ActionResult::success(Value::Null)).await,
    }
  }

  /// Record a task result, then evaluate its transitions if the workflow is
  /// running.
  async fn complete_task(
    &self,
    run: &mut Run,
    mut task: TaskExecution,
    result: ActionResult,
  ) -> Result<(), EngineError> {
    let spec = run
      .spec
      .get_task(&task.name)
      .ok_or_else(|| EngineError::Workflow(format!("Task '{}' not found", task.name)))?;
    let success = result.is_success();

    if !success
      && run.is_running()
      && let Some(retry) = spec.retry
      && task.attempt < retry.count as i32
    {
      check_task_transition(&task.name, task.state, State::RunningDelayed)?;
      task.state = State::RunningDelayed;
      task.attempt += 1;
      task.state_info = result.error.as_ref().map(error_message);
      task.updated_at = Utc::now();
      self.store.update_task_execution(&task).await?;

      let mut args = CallArguments::new();
      args.insert("task_execution_id", &task.id)?;
      self
        .scheduler
        .schedule_call(
          Some(ENGINE_TARGET),
          RUN_EXISTING_TASK,
          retry.delay,
          BTreeMap::new(),
          args,
        )
        .await?;

      info!(
        execution_id = %run.id(),
        task = %task.name,
        attempt = task.attempt,
        delay_secs = retry.delay.as_secs(),
        "task_retry_scheduled"
      );
      self.notifier.notify(ExecutionEvent::TaskRetrying {
        execution_id: run.id().to_string(),
        task_execution_id: task.id.clone(),
        task_name: task.name.clone(),
        attempt: task.attempt,
      });
      return Ok(());
    }

    let state = if success { State::Success } else { State::Error };
    check_task_transition(&task.name, task.state, state)?;
    task.state = state;

    let value = if success {
      result.data
    } else {
      result.error.unwrap_or(Value::Null)
    };
    task.state_info = (!success).then(|| error_message(&value));
    task.published = Json(Value::Object(data_flow::publish_variables(
      &*self.evaluator,
      &spec.publish,
      &task,
      &value,
    )?));
    task.result = spec.keep_result.then(|| Json(value.clone()));
    task.processed = false;
    task.updated_at = Utc::now();
    self.store.update_task_execution(&task).await?;

    if success {
      info!(execution_id = %run.id(), task = %task.name, "task_succeeded");
      self.notifier.notify(ExecutionEvent::TaskCompleted {
        execution_id: run.id().to_string(),
        task_execution_id: task.id.clone(),
        task_name: task.name.clone(),
        result: value,
      });
    } else {
      warn!(
        execution_id = %run.id(),
        task = %task.name,
        error = %task.state_info.as_deref().unwrap_or_default(),
        "task_failed"
      );
      self.notifier.notify(ExecutionEvent::TaskFailed {
        execution_id: run.id().to_string(),
        task_execution_id: task.id.clone(),
        task_name: task.name.clone(),
        error: task.state_info.clone().unwrap_or_default(),
      });
    }

    if run.is_running() {
      self.process_transitions(run, task).await?;
    }
    Ok(())
  }

  /// Evaluate the transitions of a completed task and act on them.
  ///
  /// Sentinels end processing of the remaining commands.
  async fn process_transitions(&self, run: &mut Run, mut task: TaskExecution) -> Result<(), EngineError> {
    let context = Value::Object(data_flow::task_outbound_context(&task));
    let (commands, unhandled) = {
      let graph = DirectGraph::new(&run.spec)?;
      let commands = next_commands(&*self.evaluator, &graph, &task.name, task.state, &context)?;
      let unhandled = task.state == State::Error && !is_error_handled(&graph, &task.name);
      (commands, unhandled)
    };

    task.processed = true;
    task.updated_at = Utc::now();
    self.store.update_task_execution(&task).await?;

    if unhandled {
      let message = format!(
        "Failure caused by error in task '{}': {}",
        task.name,
        task.state_info.as_deref().unwrap_or_default()
      );
      return self.fail_workflow(run, &message).await;
    }

    for command in commands {
      match command {
        Command::RunTask(name) => {
          if run.spec.get_task(&name).is_none() {
            let message = format!("Task '{}' not found [transition from '{}']", name, task.name);
            return self.fail_workflow(run, &message).await;
          }
          self.create_task(run, &name, context.clone()).await?;
        }
        Command::Sentinel(Sentinel::Succeed) => return self.succeed_workflow(run).await,
        Command::Sentinel(Sentinel::Fail) => {
          let message = format!("Failed by 'fail' transition from task '{}'", task.name);
          return self.fail_workflow(run, &message).await;
        }
        Command::Sentinel(Sentinel::Pause) => {
          return self.set_workflow_state(run, State::Paused, None).await;
        }
        Command::Sentinel(Sentinel::Noop) => {}
      }
    }
    Ok(())
  }

  async fn check_workflow_completion(&self, run: &mut Run) -> Result<(), EngineError> {
    if !run.is_running() {
      return Ok(());
    }

    let tasks = self.store.list_task_executions(run.id()).await?;
    let active = tasks
      .iter()
      .any(|t| matches!(t.state, State::Idle | State::Running | State::RunningDelayed));
    if active {
      return Ok(());
    }

    self.succeed_workflow(run).await
  }

  /// Evaluate the output and complete the workflow successfully.
  ///
  /// An output that fails to evaluate fails the workflow instead.
  async fn succeed_workflow(&self, run: &mut Run) -> Result<(), EngineError> {
    let tasks = self.store.list_task_executions(run.id()).await?;
    let context = data_flow::final_context(&run.execution.context.0, &tasks);

    let output = match data_flow::evaluate_workflow_output(&*self.evaluator, &run.spec, &context) {
      Ok(output) => output,
      Err(e) => {
        let message = format!("Failed to evaluate workflow output: {}", e);
        return self.fail_workflow(run, &message).await;
      }
    };

    run.execution.output = Json(output);
    self.set_workflow_state(run, State::Success, None).await
  }

  /// Fail the workflow with `message`.
  ///
  /// Engine failures end an execution from any state that is not already
  /// completed.
  async fn fail_workflow(&self, run: &mut Run, message: &str) -> Result<(), EngineError> {
    if run.execution.state.is_completed() {
      debug!(execution_id = %run.id(), error = %message, "failure_after_completion_ignored");
      return Ok(());
    }

    run.execution.state = State::Error;
    run.execution.state_info = Some(message.to_string());
    run.execution.updated_at = Utc::now();
    self.store.update_execution(&run.execution).await?;
    self.after_state_change(run).await;
    Ok(())
  }

  async fn set_workflow_state(
    &self,
    run: &mut Run,
    state: State,
    state_info: Option<String>,
  ) -> Result<(), EngineError> {
    check_workflow_transition(run.execution.state, state)?;
    let previous = run.execution.state;

    run.execution.state = state;
    run.execution.state_info = state_info;
    run.execution.updated_at = Utc::now();
    self.store.update_execution(&run.execution).await?;

    if previous != State::Idle {
      self.after_state_change(run).await;
    }
    Ok(())
  }

  /// Log, notify and hand a completed sub-workflow's result to its parent.
  async fn after_state_change(&self, run: &Run) {
    let execution_id = run.id().to_string();
    match run.execution.state {
      State::Success => {
        info!(execution_id = %execution_id, "workflow_succeeded");
        self.notifier.notify(ExecutionEvent::WorkflowCompleted {
          execution_id,
          output: run.execution.output.0.clone(),
        });
      }
      State::Error => {
        let error = run.execution.state_info.clone().unwrap_or_default();
        error!(execution_id = %execution_id, error = %error, "workflow_failed");
        self.notifier.notify(ExecutionEvent::WorkflowFailed { execution_id, error });
      }
      State::Paused => {
        info!(execution_id = %execution_id, "workflow_paused");
        self.notifier.notify(ExecutionEvent::WorkflowPaused { execution_id });
      }
      State::Running => {
        info!(execution_id = %execution_id, "workflow_resumed");
        self.notifier.notify(ExecutionEvent::WorkflowResumed { execution_id });
      }
      State::Idle | State::RunningDelayed => {}
    }

    if run.execution.state.is_completed()
      && let Some(parent_id) = &run.execution.parent_task_execution_id
    {
      let result = if run.execution.state == State::Success {
        ActionResult::success(run.execution.output.0.clone())
      } else {
        ActionResult::error(run.execution.state_info.clone().unwrap_or_default())
      };
      if let Err(e) = self
        .schedule_action_complete(parent_id, &result, Duration::ZERO)
        .await
      {
        error!(
          execution_id = %run.id(),
          parent_task_execution_id = %parent_id,
          error = %e,
          "sub_workflow_result_delivery_failed"
        );
      }
    }
  }
}

/// Run `action` once per input, at most `concurrency` at a time.
///
/// Results keep the order of `inputs`. The first failing item (in that order)
/// fails the whole task.
async fn run_items(
  action: Arc<dyn Action>,
  inputs: Vec<Map<String, Value>>,
  concurrency: Option<usize>,
) -> ActionResult {
  let limit = concurrency.unwrap_or(inputs.len()).max(1);
  let outcomes: Vec<_> = stream::iter(inputs)
    .map(|input| {
      let action = Arc::clone(&action);
      async move { action.run(input).await }
    })
    .buffered(limit)
    .collect()
    .await;

  let mut data = Vec::with_capacity(outcomes.len());
  for (index, outcome) in outcomes.into_iter().enumerate() {
    match outcome {
      Ok(Some(result)) if result.is_success() => data.push(result.data),
      Ok(Some(result)) => {
        let error = result.error.unwrap_or(Value::Null);
        return ActionResult::error(format!("Item {} failed: {}", index, error_message(&error)));
      }
      Ok(None) => {
        return ActionResult::error(format!(
          "Item {} failed: asynchronous actions can't be used with with-items",
          index
        ));
      }
      Err(e) => return ActionResult::error(format!("Item {} failed: {}", index, e)),
    }
  }
  ActionResult::success(Value::Array(data))
}

fn error_message(error: &Value) -> String {
  match error {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// Scheduler entry points into the engine.
struct EngineTarget<N: ExecutionNotifier> {
  engine: Weak<WorkflowEngine<N>>,
}

#[async_trait]
impl<N: ExecutionNotifier + 'static> MethodTarget for EngineTarget<N> {
  async fn call_method(&self, method: &str, args: CallArguments) -> Result<(), SchedulerError> {
    let engine = self
      .engine
      .upgrade()
      .ok_or_else(|| SchedulerError::Invocation("workflow engine has been dropped".to_string()))?;
    let task_execution_id: String = args.get("task_execution_id")?;

    let outcome = match method {
      RUN_EXISTING_TASK => engine.run_existing_task(&task_execution_id).await,
      ON_ACTION_COMPLETE => {
        let result: ActionResult = args.get("result")?;
        engine.on_action_complete(&task_execution_id, result).await
      }
      other => {
        return Err(SchedulerError::UnknownMethod {
          target: ENGINE_TARGET.to_string(),
          method: other.to_string(),
        });
      }
    };

    outcome
      .map(|_| ())
      .map_err(|e| SchedulerError::Invocation(e.to_string()))
  }
}

struct EngineFactory<N: ExecutionNotifier> {
  engine: Weak<WorkflowEngine<N>>,
}

impl<N: ExecutionNotifier + 'static> TargetFactory for EngineFactory<N> {
  fn create(&self) -> Result<Arc<dyn MethodTarget>, SchedulerError> {
    Ok(Arc::new(EngineTarget {
      engine: self.engine.clone(),
    }))
  }
}
