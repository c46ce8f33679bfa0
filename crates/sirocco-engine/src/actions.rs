//! Actions: the units of work tasks run.
//!
//! An action either returns its result right away or returns `None` and has
//! the result delivered later through `WorkflowEngine::on_action_complete`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sirocco_scheduler::TypedSerializer;
use thiserror::Error;

/// Outcome of an action or sub-workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
  #[serde(default)]
  pub data: Value,
  #[serde(default)]
  pub error: Option<Value>,
}

impl ActionResult {
  pub fn success(data: Value) -> Self {
    Self { data, error: None }
  }

  pub fn error(error: impl Into<Value>) -> Self {
    Self {
      data: Value::Null,
      error: Some(error.into()),
    }
  }

  pub fn is_success(&self) -> bool {
    self.error.is_none()
  }
}

/// Scheduler serializer for [`ActionResult`] arguments.
pub type ResultSerializer = TypedSerializer<ActionResult>;

/// Locator the engine registers [`ResultSerializer`] under.
pub const RESULT_SERIALIZER: &str = "sirocco_engine::ResultSerializer";

#[derive(Debug, Clone, Error)]
pub enum ActionError {
  #[error("action not found: {0}")]
  NotFound(String),

  #[error("{0}")]
  InvalidInput(String),

  #[error("{0}")]
  Failed(String),
}

#[async_trait]
pub trait Action: Send + Sync {
  /// Reject input the action can't run with.
  fn validate_input(&self, input: &Map<String, Value>) -> Result<(), ActionError>;

  /// Run the action. `Ok(None)` means the result arrives asynchronously.
  async fn run(&self, input: Map<String, Value>) -> Result<Option<ActionResult>, ActionError>;
}

/// Check `input` against required and optional parameter names.
pub fn check_params(
  action: &str,
  input: &Map<String, Value>,
  required: &[&str],
  optional: &[&str],
) -> Result<(), ActionError> {
  let missing: Vec<&str> = required
    .iter()
    .filter(|name| !input.contains_key(**name))
    .copied()
    .collect();
  let unexpected: Vec<&str> = input
    .keys()
    .map(String::as_str)
    .filter(|key| !required.contains(key) && !optional.contains(key))
    .collect();

  if missing.is_empty() && unexpected.is_empty() {
    return Ok(());
  }

  Err(ActionError::InvalidInput(format!(
    "Invalid input [action={}, missing=[{}], unexpected=[{}]]",
    action,
    missing.join(", "),
    unexpected.join(", ")
  )))
}

/// Does nothing and succeeds with `null`.
pub struct NoopAction;

#[async_trait]
impl Action for NoopAction {
  fn validate_input(&self, input: &Map<String, Value>) -> Result<(), ActionError> {
    check_params("std.noop", input, &[], &[])
  }

  async fn run(&self, _input: Map<String, Value>) -> Result<Option<ActionResult>, ActionError> {
    Ok(Some(ActionResult::success(Value::Null)))
  }
}

/// Like [`NoopAction`], but the result has to be delivered separately.
pub struct AsyncNoopAction;

#[async_trait]
impl Action for AsyncNoopAction {
  fn validate_input(&self, input: &Map<String, Value>) -> Result<(), ActionError> {
    check_params("std.async_noop", input, &[], &[])
  }

  async fn run(&self, _input: Map<String, Value>) -> Result<Option<ActionResult>, ActionError> {
    Ok(None)
  }
}

/// Returns its `output` parameter.
pub struct EchoAction;

#[async_trait]
impl Action for EchoAction {
  fn validate_input(&self, input: &Map<String, Value>) -> Result<(), ActionError> {
    check_params("std.echo", input, &["output"], &[])
  }

  async fn run(&self, mut input: Map<String, Value>) -> Result<Option<ActionResult>, ActionError> {
    let output = input.remove("output").unwrap_or(Value::Null);
    Ok(Some(ActionResult::success(output)))
  }
}

/// Always fails.
pub struct FailAction;

#[async_trait]
impl Action for FailAction {
  fn validate_input(&self, input: &Map<String, Value>) -> Result<(), ActionError> {
    check_params("std.fail", input, &[], &[])
  }

  async fn run(&self, _input: Map<String, Value>) -> Result<Option<ActionResult>, ActionError> {
    Err(ActionError::Failed("Fail action expected exception.".to_string()))
  }
}

/// Actions by name.
#[derive(Default)]
pub struct ActionRegistry {
  actions: RwLock<HashMap<String, Arc<dyn Action>>>,
}

impl ActionRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry holding the `std.*` actions.
  pub fn with_std() -> Self {
    let registry = Self::new();
    registry.register("std.noop", Arc::new(NoopAction));
    registry.register("std.async_noop", Arc::new(AsyncNoopAction));
    registry.register("std.echo", Arc::new(EchoAction));
    registry.register("std.fail", Arc::new(FailAction));
    registry
  }

  pub fn register(&self, name: impl Into<String>, action: Arc<dyn Action>) {
    self
      .actions
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(name.into(), action);
  }

  pub fn get(&self, name: &str) -> Result<Arc<dyn Action>, ActionError> {
    self
      .actions
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(name)
      .cloned()
      .ok_or_else(|| ActionError::NotFound(name.to_string()))
  }
}
