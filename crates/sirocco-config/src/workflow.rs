use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::input::InputEntryDef;
use crate::task::TaskDefaultsDef;

/// Graph semantics of a workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
  /// Tasks declare where to go next (`on-success`, `on-error`, `on-complete`).
  #[default]
  Direct,
  /// Tasks declare what they depend on (`requires`).
  Reverse,
}

impl std::fmt::Display for WorkflowType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      WorkflowType::Direct => f.write_str("direct"),
      WorkflowType::Reverse => f.write_str("reverse"),
    }
  }
}

/// A single workflow definition.
///
/// Tasks are kept as raw JSON values in declaration order so each task can be
/// validated on its own and errors can name the offending task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDef {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<String>,
  #[serde(rename = "type", default)]
  pub workflow_type: WorkflowType,
  #[serde(
    rename = "task-defaults",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub task_defaults: Option<TaskDefaultsDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub input: Vec<InputEntryDef>,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub output: Map<String, Value>,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub vars: Map<String, Value>,
  pub tasks: Map<String, Value>,
}

impl WorkflowDef {
  /// Deserialize a workflow definition from its raw JSON value.
  pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
    serde_json::from_value(value.clone())
  }
}

/// A document holding several workflows keyed by name.
///
/// ```yaml
/// version: '2.0'
///
/// my_workflow:
///   tasks:
///     task1:
///       action: std.noop
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowListDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<Value>,
  #[serde(flatten)]
  pub workflows: Map<String, Value>,
}

impl WorkflowListDef {
  /// Raw workflow definitions with the mapping key injected as `name`.
  ///
  /// Entries that are not mappings are returned untouched so that the
  /// workflow parser reports them as malformed.
  pub fn named_definitions(&self) -> Vec<(String, Value)> {
    self
      .workflows
      .iter()
      .map(|(name, raw)| {
        let mut raw = raw.clone();
        if let Value::Object(map) = &mut raw
          && !map.contains_key("name")
        {
          map.insert("name".to_string(), Value::String(name.clone()));
        }
        (name.clone(), raw)
      })
      .collect()
  }
}
