use sirocco_expr::ExpressionError;
use sirocco_scheduler::SchedulerError;
use sirocco_workflow::SpecError;
use thiserror::Error;

use crate::actions::ActionError;

/// Errors returned by the engine and the definition service.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("invalid workflow definition: {0}")]
  Spec(#[from] SpecError),

  /// An operation not allowed in the execution's current state.
  #[error("{0}")]
  Workflow(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("{0}")]
  Input(String),

  #[error("action failed: {0}")]
  Action(String),

  #[error("{0}")]
  InvalidAction(String),

  #[error("Can not evaluate expression: {0}")]
  Expression(#[from] ExpressionError),

  #[error("store error: {0}")]
  Store(sirocco_store::Error),

  #[error("scheduler error: {0}")]
  Scheduler(#[from] SchedulerError),
}

impl From<sirocco_store::Error> for EngineError {
  fn from(e: sirocco_store::Error) -> Self {
    match e {
      sirocco_store::Error::NotFound(what) => EngineError::NotFound(what),
      other => EngineError::Store(other),
    }
  }
}

impl From<ActionError> for EngineError {
  fn from(e: ActionError) -> Self {
    match e {
      ActionError::NotFound(name) => {
        EngineError::InvalidAction(format!("Failed to find action [action_name={}]", name))
      }
      ActionError::InvalidInput(message) => EngineError::Input(message),
      ActionError::Failed(message) => EngineError::Action(message),
    }
  }
}
