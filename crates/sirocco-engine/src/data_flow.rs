//! Data flow between tasks.
//!
//! Every task runs against an inbound context. Its outbound context is the
//! inbound one with the published variables and the task's own result (under
//! the task name) merged on top. Next tasks start from that outbound context.

use serde_json::{Map, Value};
use sirocco_expr::{Evaluator, ExpressionError, evaluate_recursively};
use sirocco_store::{State, TaskExecution};
use sirocco_workflow::{WithItems, WorkflowSpec};

use crate::error::EngineError;

/// Key holding execution metadata in every context.
pub const EXECUTION_KEY: &str = "__execution";

/// Key holding the environment an execution was started with.
pub const ENV_KEY: &str = "__env";

/// Key holding the caller's auth context when auth is enabled.
pub const AUTH_KEY: &str = "auth";

/// Deep merge `from` into `into`; `from` wins on conflicts.
pub fn merge(into: &mut Map<String, Value>, from: &Map<String, Value>) {
  for (key, value) in from {
    match (into.get_mut(key), value) {
      (Some(Value::Object(existing)), Value::Object(incoming)) => merge(existing, incoming),
      _ => {
        into.insert(key.clone(), value.clone());
      }
    }
  }
}

/// The environment stored in an execution context, empty if there is none.
pub fn environment(context: &Value) -> Map<String, Value> {
  context.get(ENV_KEY).map(as_map).unwrap_or_default()
}

fn as_map(value: &Value) -> Map<String, Value> {
  value.as_object().cloned().unwrap_or_default()
}

/// Context a new workflow execution starts with: input, execution metadata,
/// the environment, auth (if any) and the evaluated `vars`.
///
/// Environment values may refer to each other through `__env`. An empty
/// environment leaves `__env` out of the context.
pub fn initial_context(
  evaluator: &dyn Evaluator,
  spec: &WorkflowSpec,
  execution_id: &str,
  input: &Map<String, Value>,
  env: &Map<String, Value>,
  auth: Option<Value>,
) -> Result<Map<String, Value>, ExpressionError> {
  let mut context = input.clone();
  context.insert(
    EXECUTION_KEY.to_string(),
    serde_json::json!({
      "id": execution_id,
      "input": Value::Object(input.clone()),
    }),
  );
  if !env.is_empty() {
    let env = Value::Object(env.clone());
    let mut scope = Map::new();
    scope.insert(ENV_KEY.to_string(), env.clone());
    context.insert(
      ENV_KEY.to_string(),
      evaluate_recursively(evaluator, &env, &Value::Object(scope))?,
    );
  }
  if let Some(auth) = auth {
    context.insert(AUTH_KEY.to_string(), auth);
  }

  let vars = evaluate_recursively(
    evaluator,
    &Value::Object(spec.vars().clone()),
    &Value::Object(context.clone()),
  )?;
  merge(&mut context, &as_map(&vars));
  Ok(context)
}

/// Evaluate task input against its inbound context.
pub fn evaluate_task_input(
  evaluator: &dyn Evaluator,
  input: &Map<String, Value>,
  in_context: &Value,
) -> Result<Map<String, Value>, ExpressionError> {
  let evaluated = evaluate_recursively(evaluator, &Value::Object(input.clone()), in_context)?;
  Ok(as_map(&evaluated))
}

/// Task input for every item of a `with-items` task, in item order.
///
/// Each item is evaluated against the inbound context with its variables
/// bound on top.
pub fn with_items_inputs(
  evaluator: &dyn Evaluator,
  with_items: &WithItems,
  input: &Map<String, Value>,
  in_context: &Value,
) -> Result<Vec<Map<String, Value>>, EngineError> {
  let mut lists = Vec::with_capacity(with_items.items.len());
  for (var, source) in &with_items.items {
    match evaluate_recursively(evaluator, source, in_context)? {
      Value::Array(list) => lists.push((var, list)),
      other => {
        return Err(EngineError::Workflow(format!(
          "with-items variable '{}' must be a list, got: {}",
          var, other
        )));
      }
    }
  }

  let len = lists.first().map_or(0, |(_, list)| list.len());
  if let Some((var, list)) = lists.iter().find(|(_, list)| list.len() != len) {
    return Err(EngineError::Workflow(format!(
      "with-items lists must have the same length [{}={}, expected={}]",
      var,
      list.len(),
      len
    )));
  }

  (0..len)
    .map(|index| {
      let mut context = as_map(in_context);
      for (var, list) in &lists {
        context.insert((*var).clone(), list[index].clone());
      }
      Ok(evaluate_task_input(evaluator, input, &Value::Object(context))?)
    })
    .collect()
}

/// Evaluate `publish` with the task result visible under the task name.
pub fn publish_variables(
  evaluator: &dyn Evaluator,
  publish: &Map<String, Value>,
  task: &TaskExecution,
  result: &Value,
) -> Result<Map<String, Value>, ExpressionError> {
  if task.state != State::Success || publish.is_empty() {
    return Ok(Map::new());
  }

  let mut context = as_map(&task.in_context.0);
  context.insert(task.name.clone(), result.clone());

  let published = evaluate_recursively(
    evaluator,
    &Value::Object(publish.clone()),
    &Value::Object(context),
  )?;
  Ok(as_map(&published))
}

/// Inbound context merged with published variables and the task result.
pub fn task_outbound_context(task: &TaskExecution) -> Map<String, Value> {
  let mut context = as_map(&task.in_context.0);
  merge(&mut context, &as_map(&task.published.0));
  context.insert(
    task.name.clone(),
    task.result.as_ref().map(|r| r.0.clone()).unwrap_or(Value::Null),
  );
  context
}

/// Context at the end of a workflow: the execution context with the outbound
/// context of every successful task merged in creation order.
pub fn final_context(workflow_context: &Value, tasks: &[TaskExecution]) -> Map<String, Value> {
  let mut context = as_map(workflow_context);
  for task in tasks.iter().filter(|t| t.state == State::Success) {
    merge(&mut context, &task_outbound_context(task));
  }
  context
}

/// Evaluate the workflow `output` over the final context.
///
/// Without an output section (or when it evaluates to nothing) the whole
/// context is the output.
pub fn evaluate_workflow_output(
  evaluator: &dyn Evaluator,
  spec: &WorkflowSpec,
  context: &Map<String, Value>,
) -> Result<Value, ExpressionError> {
  let context = Value::Object(context.clone());
  let output = evaluate_recursively(evaluator, &Value::Object(spec.output().clone()), &context)?;

  match &output {
    Value::Object(map) if map.is_empty() => Ok(context),
    _ => Ok(output),
  }
}
