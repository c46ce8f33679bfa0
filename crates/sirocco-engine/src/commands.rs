//! What a completed task asks the engine to do next.

use serde_json::Value;
use sirocco_expr::{Evaluator, ExpressionError};
use sirocco_store::State;
use sirocco_workflow::{ClauseKind, DirectGraph, Sentinel, TransitionClause};

/// A step produced by a task's transition clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  /// Create a task execution for the named task.
  RunTask(String),
  /// Act on a sentinel target.
  Sentinel(Sentinel),
}

/// Commands for a completed task, in order.
///
/// `on-complete` targets come first, followed by `on-success` or `on-error`
/// depending on `state`. Transitions whose guard evaluates false against
/// `context` are dropped.
pub fn next_commands(
  evaluator: &dyn Evaluator,
  graph: &DirectGraph<'_>,
  task_name: &str,
  state: State,
  context: &Value,
) -> Result<Vec<Command>, ExpressionError> {
  let mut commands = Vec::new();

  push_commands(
    evaluator,
    graph.effective_clause(task_name, ClauseKind::OnComplete),
    context,
    &mut commands,
  )?;

  let kind = match state {
    State::Success => Some(ClauseKind::OnSuccess),
    State::Error => Some(ClauseKind::OnError),
    _ => None,
  };
  if let Some(kind) = kind {
    push_commands(
      evaluator,
      graph.effective_clause(task_name, kind),
      context,
      &mut commands,
    )?;
  }

  Ok(commands)
}

/// Whether a failed task has `on-error` or `on-complete` transitions.
pub fn is_error_handled(graph: &DirectGraph<'_>, task_name: &str) -> bool {
  !graph.effective_clause(task_name, ClauseKind::OnError).is_empty()
    || !graph
      .effective_clause(task_name, ClauseKind::OnComplete)
      .is_empty()
}

fn push_commands(
  evaluator: &dyn Evaluator,
  clause: &TransitionClause,
  context: &Value,
  commands: &mut Vec<Command>,
) -> Result<(), ExpressionError> {
  for transition in clause {
    if let Some(guard) = &transition.guard
      && !evaluator.evaluate_condition(guard, context)?
    {
      continue;
    }

    commands.push(match transition.sentinel() {
      Some(sentinel) => Command::Sentinel(sentinel),
      None => Command::RunTask(transition.target.clone()),
    });
  }
  Ok(())
}
