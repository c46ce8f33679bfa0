use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clause::ClauseDef;

/// A task definition.
///
/// The same shape is used for direct and reverse workflows; which fields are
/// legal is decided when the owning workflow builds its task specs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct TaskDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  /// Action name, optionally followed by inline parameters
  /// (`std.echo output="Hello"`).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub action: Option<String>,
  /// Name of a sub-workflow to run instead of an action.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workflow: Option<String>,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub input: Map<String, Value>,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub publish: Map<String, Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retry: Option<RetryDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub keep_result: Option<bool>,
  /// Run the action once per item: `var in <% expression %>`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub with_items: Option<WithItemsDef>,
  /// How many items of a `with-items` task run at the same time.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub concurrency: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_success: Option<ClauseDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_error: Option<ClauseDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_complete: Option<ClauseDef>,
  /// Reverse workflows only: upstream task names.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub requires: Option<RequiresDef>,
}

impl TaskDef {
  /// Deserialize a single task from its raw JSON value.
  pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
    serde_json::from_value(value.clone())
  }
}

/// Shared clauses and policies inherited by tasks that declare none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct TaskDefaultsDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_success: Option<ClauseDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_error: Option<ClauseDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_complete: Option<ClauseDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retry: Option<RetryDef>,
}

/// Retry policy: re-run a failed task up to `count` times, `delay` seconds apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryDef {
  pub count: u32,
  #[serde(default)]
  pub delay: u64,
}

/// `with-items` accepts a single `var in <% expression %>` entry or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WithItemsDef {
  One(String),
  Many(Vec<String>),
}

impl WithItemsDef {
  pub fn entries(&self) -> Vec<&str> {
    match self {
      WithItemsDef::One(entry) => vec![entry.as_str()],
      WithItemsDef::Many(entries) => entries.iter().map(String::as_str).collect(),
    }
  }
}

/// `requires` accepts a single name or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequiresDef {
  One(String),
  Many(Vec<String>),
}

impl RequiresDef {
  pub fn names(&self) -> Vec<String> {
    match self {
      RequiresDef::One(name) => vec![name.clone()],
      RequiresDef::Many(names) => names.clone(),
    }
  }
}
