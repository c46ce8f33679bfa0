//! Allowed state transitions of workflow and task executions.

use sirocco_store::State;

use crate::EngineError;

/// `IDLE -> RUNNING -> {SUCCESS, ERROR, PAUSED}` and `PAUSED -> RUNNING`.
pub fn is_valid_workflow_transition(from: State, to: State) -> bool {
  matches!(
    (from, to),
    (State::Idle, State::Running)
      | (State::Running, State::Success | State::Error | State::Paused)
      | (State::Paused, State::Running)
  )
}

/// `IDLE -> RUNNING -> {SUCCESS, ERROR, RUNNING_DELAYED}` and
/// `RUNNING_DELAYED -> RUNNING`. A failed task may be rerun.
pub fn is_valid_task_transition(from: State, to: State) -> bool {
  matches!(
    (from, to),
    (State::Idle, State::Running)
      | (State::Running, State::Success | State::Error | State::RunningDelayed)
      | (State::RunningDelayed | State::Error, State::Running)
  )
}

pub(crate) fn check_workflow_transition(from: State, to: State) -> Result<(), EngineError> {
  if is_valid_workflow_transition(from, to) {
    Ok(())
  } else {
    Err(EngineError::Workflow(format!(
      "Can't change workflow execution state from {} to {}",
      from, to
    )))
  }
}

pub(crate) fn check_task_transition(name: &str, from: State, to: State) -> Result<(), EngineError> {
  if is_valid_task_transition(from, to) {
    Ok(())
  } else {
    Err(EngineError::Workflow(format!(
      "Can't change state of task '{}' from {} to {}",
      name, from, to
    )))
  }
}
