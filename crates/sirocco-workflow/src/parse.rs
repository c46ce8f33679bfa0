use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Map, Value};
use sirocco_config::{
  ClauseDef, ClauseEntryDef, InputEntryDef, RetryDef, TaskDef, WithItemsDef, WorkflowDef,
  WorkflowListDef, WorkflowType,
};
use sirocco_expr::{Evaluator, has_expressions, validate_recursively};

use crate::action::parse_inline;
use crate::error::{Location, SpecError};
use crate::graph::validate_semantics;
use crate::spec::{InputParam, WorkflowSpec};
use crate::task::{
  RetryPolicy, Sentinel, TaskDefaults, TaskKind, TaskSpec, TaskTarget, Transition,
  TransitionClause, WithItems,
};

/// Build a validated [`WorkflowSpec`] from a raw JSON definition.
///
/// Shape errors are `InvalidModel`; bad expressions and a direct workflow
/// without start tasks are `DslParsing`.
pub fn parse(raw: &Value, evaluator: &dyn Evaluator) -> Result<WorkflowSpec, SpecError> {
  let location = raw
    .get("name")
    .and_then(Value::as_str)
    .map(Location::workflow)
    .unwrap_or_default();

  let def = WorkflowDef::from_value(raw)
    .map_err(|e| SpecError::invalid_model(&location, e.to_string()))?;

  if def.tasks.is_empty() {
    return Err(SpecError::invalid_model(
      &location,
      "workflow doesn't have any tasks",
    ));
  }

  for (section, values) in [("output", &def.output), ("vars", &def.vars)] {
    validate_expressions(evaluator, &location, section, values)?;
  }

  let input = build_input(&location, &def.input)?;
  let task_defaults = build_task_defaults(&location, &def)?;

  let mut tasks = Vec::with_capacity(def.tasks.len());
  let mut index = HashMap::with_capacity(def.tasks.len());

  for (name, raw_task) in &def.tasks {
    let task_location = location.task(name);
    let task = build_task(
      def.workflow_type,
      &task_location,
      name,
      raw_task,
      &task_defaults,
    )?;
    validate_task_expressions(evaluator, &task_location, &task)?;

    index.insert(name.clone(), tasks.len());
    tasks.push(task);
  }

  let spec = WorkflowSpec {
    name: def.name,
    description: def.description,
    tags: def.tags,
    version: def.version.map(|v| match v {
      Value::String(s) => s,
      other => other.to_string(),
    }),
    workflow_type: def.workflow_type,
    input,
    output: def.output,
    vars: def.vars,
    task_defaults,
    tasks,
    index,
    raw: raw.clone(),
  };

  validate_semantics(&spec)?;

  Ok(spec)
}

/// Parse a YAML document holding several workflows keyed by name.
///
/// ```yaml
/// version: '2.0'
///
/// hello:
///   tasks:
///     greet:
///       action: std.echo output="Hello"
/// ```
pub fn parse_workflow_list(
  text: &str,
  evaluator: &dyn Evaluator,
) -> Result<Vec<WorkflowSpec>, SpecError> {
  let list: WorkflowListDef = serde_yaml::from_str(text)
    .map_err(|e| SpecError::invalid_model(&Location::default(), e.to_string()))?;

  if list.workflows.is_empty() {
    return Err(SpecError::invalid_model(
      &Location::default(),
      "document doesn't define any workflows",
    ));
  }

  list
    .named_definitions()
    .iter()
    .map(|(_, raw)| parse(raw, evaluator))
    .collect()
}

fn validate_expressions(
  evaluator: &dyn Evaluator,
  location: &Location,
  section: &str,
  values: &Map<String, Value>,
) -> Result<(), SpecError> {
  for (key, value) in values {
    validate_recursively(evaluator, value).map_err(|e| {
      SpecError::dsl_parsing(location, format!("{} '{}': {}", section, key, e))
    })?;
  }
  Ok(())
}

fn validate_task_expressions(
  evaluator: &dyn Evaluator,
  location: &Location,
  task: &TaskSpec,
) -> Result<(), SpecError> {
  validate_expressions(evaluator, location, "input", &task.input)?;
  validate_expressions(evaluator, location, "publish", &task.publish)?;
  if let Some(with_items) = &task.with_items {
    validate_expressions(evaluator, location, "with-items", &with_items.items)?;
  }

  if let TaskKind::Direct {
    on_success,
    on_error,
    on_complete,
  } = &task.kind
  {
    for transition in on_success.iter().chain(on_error).chain(on_complete) {
      if let Some(guard) = &transition.guard {
        evaluator.validate(guard).map_err(|e| {
          SpecError::dsl_parsing(
            location,
            format!("guard of transition to '{}': {}", transition.target, e),
          )
        })?;
      }
    }
  }

  Ok(())
}

fn build_input(location: &Location, entries: &[InputEntryDef]) -> Result<Vec<InputParam>, SpecError> {
  let mut params: Vec<InputParam> = Vec::with_capacity(entries.len());

  for entry in entries {
    let param = match entry {
      InputEntryDef::Name(name) => InputParam {
        name: name.clone(),
        default: None,
      },
      InputEntryDef::WithDefault(map) => {
        let mut pairs = map.iter();
        match (pairs.next(), pairs.next()) {
          (Some((name, default)), None) => InputParam {
            name: name.clone(),
            default: Some(default.clone()),
          },
          _ => {
            return Err(SpecError::invalid_model(
              location,
              "input entry with a default must have exactly one key",
            ));
          }
        }
      }
    };

    if params.iter().any(|p| p.name == param.name) {
      return Err(SpecError::invalid_model(
        location,
        format!("duplicate input parameter '{}'", param.name),
      ));
    }
    params.push(param);
  }

  Ok(params)
}

fn build_task_defaults(location: &Location, def: &WorkflowDef) -> Result<TaskDefaults, SpecError> {
  let Some(defaults) = &def.task_defaults else {
    return Ok(TaskDefaults::default());
  };

  Ok(TaskDefaults::new(
    build_clause(location, defaults.on_success.as_ref())?,
    build_clause(location, defaults.on_error.as_ref())?,
    build_clause(location, defaults.on_complete.as_ref())?,
    defaults.retry.map(build_retry),
  ))
}

fn build_clause(location: &Location, def: Option<&ClauseDef>) -> Result<TransitionClause, SpecError> {
  let Some(def) = def else {
    return Ok(TransitionClause::default());
  };

  let transitions = def
    .entries()
    .into_iter()
    .map(|entry| match entry {
      ClauseEntryDef::Name(target) => Ok(Transition {
        target,
        guard: None,
      }),
      ClauseEntryDef::Guarded(map) => {
        let mut pairs = map.into_iter();
        match (pairs.next(), pairs.next()) {
          (Some((target, Value::String(guard))), None) => Ok(Transition {
            target,
            guard: Some(guard),
          }),
          (Some((target, Value::Null)), None) => Ok(Transition {
            target,
            guard: None,
          }),
          (Some((target, _)), None) => Err(SpecError::invalid_model(
            location,
            format!("guard of transition to '{}' must be an expression string", target),
          )),
          _ => Err(SpecError::invalid_model(
            location,
            "guarded transition must have exactly one key",
          )),
        }
      }
    })
    .collect::<Result<Vec<_>, _>>()?;

  Ok(TransitionClause::new(transitions))
}

fn build_retry(def: RetryDef) -> RetryPolicy {
  RetryPolicy {
    count: def.count,
    delay: Duration::from_secs(def.delay),
  }
}

/// Task factory keyed on the workflow type.
fn build_task(
  workflow_type: WorkflowType,
  location: &Location,
  name: &str,
  raw: &Value,
  defaults: &TaskDefaults,
) -> Result<TaskSpec, SpecError> {
  if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
    return Err(SpecError::invalid_model(
      location,
      format!("task name '{}' must contain only letters, digits and '_'", name),
    ));
  }
  if Sentinel::from_name(name).is_some() {
    return Err(SpecError::invalid_model(
      location,
      format!("'{}' is reserved and can not be used as a task name", name),
    ));
  }

  let def = TaskDef::from_value(raw).map_err(|e| SpecError::invalid_model(location, e.to_string()))?;

  let kind = match workflow_type {
    WorkflowType::Direct => build_direct_kind(location, &def)?,
    WorkflowType::Reverse => build_reverse_kind(location, &def)?,
  };

  let (target, inline) = build_target(location, &def)?;
  let with_items = build_with_items(location, &def, &target)?;

  // Explicit input wins over inline parameters
  let mut input = inline;
  for (key, value) in def.input {
    input.insert(key, value);
  }

  Ok(TaskSpec {
    name: name.to_string(),
    description: def.description,
    target,
    input,
    publish: def.publish,
    retry: def.retry.map(build_retry).or(defaults.retry),
    keep_result: def.keep_result.unwrap_or(true),
    with_items,
    kind,
  })
}

fn build_direct_kind(location: &Location, def: &TaskDef) -> Result<TaskKind, SpecError> {
  if def.requires.is_some() {
    return Err(SpecError::invalid_model(
      location,
      "'requires' is only allowed in reverse workflows",
    ));
  }

  Ok(TaskKind::Direct {
    on_success: build_clause(location, def.on_success.as_ref())?,
    on_error: build_clause(location, def.on_error.as_ref())?,
    on_complete: build_clause(location, def.on_complete.as_ref())?,
  })
}

fn build_reverse_kind(location: &Location, def: &TaskDef) -> Result<TaskKind, SpecError> {
  if def.on_success.is_some() || def.on_error.is_some() || def.on_complete.is_some() {
    return Err(SpecError::invalid_model(
      location,
      "transition clauses are only allowed in direct workflows",
    ));
  }

  Ok(TaskKind::Reverse {
    requires: def
      .requires
      .as_ref()
      .map(|r| r.names())
      .unwrap_or_default(),
  })
}

fn build_target(
  location: &Location,
  def: &TaskDef,
) -> Result<(TaskTarget, Map<String, Value>), SpecError> {
  match (&def.action, &def.workflow) {
    (Some(_), Some(_)) => Err(SpecError::invalid_model(
      location,
      "task can not have both 'action' and 'workflow'",
    )),
    (Some(line), None) => {
      let (name, params) =
        parse_inline(line).map_err(|message| SpecError::invalid_model(location, message))?;
      Ok((TaskTarget::Action { name }, params))
    }
    (None, Some(line)) => {
      let (name, params) =
        parse_inline(line).map_err(|message| SpecError::invalid_model(location, message))?;
      Ok((TaskTarget::Workflow { name }, params))
    }
    (None, None) => Ok((TaskTarget::Noop, Map::new())),
  }
}

fn build_with_items(
  location: &Location,
  def: &TaskDef,
  target: &TaskTarget,
) -> Result<Option<WithItems>, SpecError> {
  let Some(entries) = def.with_items.as_ref().map(WithItemsDef::entries) else {
    if def.concurrency.is_some() {
      return Err(SpecError::invalid_model(
        location,
        "'concurrency' requires 'with-items'",
      ));
    }
    return Ok(None);
  };

  if !matches!(target, TaskTarget::Action { .. }) {
    return Err(SpecError::invalid_model(
      location,
      "'with-items' requires an 'action'",
    ));
  }
  if entries.is_empty() {
    return Err(SpecError::invalid_model(location, "'with-items' is empty"));
  }

  let mut items = Map::new();
  for entry in entries {
    let (var, source) = parse_with_items_entry(entry)
      .map_err(|message| SpecError::invalid_model(location, message))?;
    if items.insert(var.clone(), source).is_some() {
      return Err(SpecError::invalid_model(
        location,
        format!("'with-items' binds '{}' twice", var),
      ));
    }
  }

  let concurrency = match def.concurrency {
    Some(0) => {
      return Err(SpecError::invalid_model(
        location,
        "'concurrency' must be at least 1",
      ));
    }
    other => other.map(|n| n as usize),
  };

  Ok(Some(WithItems { items, concurrency }))
}

/// Split `var in <% expression %>` (or `var in [literal, list]`).
fn parse_with_items_entry(entry: &str) -> Result<(String, Value), String> {
  let invalid = || format!("invalid 'with-items' entry '{}', expected 'var in <list>'", entry);

  let (var, source) = entry.split_once(" in ").ok_or_else(invalid)?;
  let (var, source) = (var.trim(), source.trim());
  let valid_var = var.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    && var.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
  if !valid_var || source.is_empty() {
    return Err(invalid());
  }

  if has_expressions(source) {
    return Ok((var.to_string(), Value::String(source.to_string())));
  }
  match serde_json::from_str(source) {
    Ok(list @ Value::Array(_)) => Ok((var.to_string(), list)),
    _ => Err(invalid()),
  }
}
