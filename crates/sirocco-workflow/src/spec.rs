use std::collections::HashMap;

use serde_json::{Map, Value};
use sirocco_config::WorkflowType;

use crate::task::{TaskDefaults, TaskSpec};

/// A declared workflow input parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct InputParam {
  pub name: String,
  /// `None` means the parameter is required; `Some(Value::Null)` is a real
  /// default.
  pub default: Option<Value>,
}

/// A validated, immutable workflow specification.
///
/// Built by [`crate::parse`]. Tasks keep their declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSpec {
  pub(crate) name: String,
  pub(crate) description: Option<String>,
  pub(crate) tags: Vec<String>,
  pub(crate) version: Option<String>,
  pub(crate) workflow_type: WorkflowType,
  pub(crate) input: Vec<InputParam>,
  pub(crate) output: Map<String, Value>,
  pub(crate) vars: Map<String, Value>,
  pub(crate) task_defaults: TaskDefaults,
  pub(crate) tasks: Vec<TaskSpec>,
  pub(crate) index: HashMap<String, usize>,
  pub(crate) raw: Value,
}

impl WorkflowSpec {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn description(&self) -> Option<&str> {
    self.description.as_deref()
  }

  pub fn tags(&self) -> &[String] {
    &self.tags
  }

  pub fn version(&self) -> Option<&str> {
    self.version.as_deref()
  }

  pub fn workflow_type(&self) -> WorkflowType {
    self.workflow_type
  }

  pub fn input(&self) -> &[InputParam] {
    &self.input
  }

  pub fn output(&self) -> &Map<String, Value> {
    &self.output
  }

  pub fn vars(&self) -> &Map<String, Value> {
    &self.vars
  }

  pub fn task_defaults(&self) -> &TaskDefaults {
    &self.task_defaults
  }

  /// Tasks in declaration order.
  pub fn tasks(&self) -> &[TaskSpec] {
    &self.tasks
  }

  pub fn get_task(&self, name: &str) -> Option<&TaskSpec> {
    self.index.get(name).map(|&i| &self.tasks[i])
  }

  pub(crate) fn task_index(&self, name: &str) -> Option<usize> {
    self.index.get(name).copied()
  }

  /// The raw JSON definition this spec was built from.
  pub fn raw(&self) -> &Value {
    &self.raw
  }

  /// User-facing input signature, e.g. `name, greeting="Hello"`.
  pub fn input_signature(&self) -> String {
    self
      .input
      .iter()
      .map(|param| match &param.default {
        Some(default) => format!("{}={}", param.name, default),
        None => param.name.clone(),
      })
      .collect::<Vec<_>>()
      .join(", ")
  }

  /// Check `given` against the declared input and fill in defaults.
  ///
  /// Returns a message naming the missing or unexpected parameters.
  pub fn apply_input(&self, given: &Map<String, Value>) -> Result<Map<String, Value>, String> {
    let missing: Vec<&str> = self
      .input
      .iter()
      .filter(|p| p.default.is_none() && !given.contains_key(&p.name))
      .map(|p| p.name.as_str())
      .collect();

    let unexpected: Vec<&str> = given
      .keys()
      .filter(|k| !self.input.iter().any(|p| &p.name == *k))
      .map(String::as_str)
      .collect();

    if !missing.is_empty() || !unexpected.is_empty() {
      let mut message = format!(
        "Invalid input [name={}, signature={}",
        self.name,
        self.input_signature()
      );
      if !missing.is_empty() {
        message.push_str(&format!(", missing={}", missing.join(", ")));
      }
      if !unexpected.is_empty() {
        message.push_str(&format!(", unexpected={}", unexpected.join(", ")));
      }
      message.push(']');
      return Err(message);
    }

    let mut resolved = Map::new();
    for param in &self.input {
      let value = given
        .get(&param.name)
        .cloned()
        .or_else(|| param.default.clone())
        .unwrap_or(Value::Null);
      resolved.insert(param.name.clone(), value);
    }
    Ok(resolved)
  }
}
