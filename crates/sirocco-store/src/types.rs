use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use sqlx::types::Json;

/// State of a workflow or task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
  Idle,
  Running,
  /// Task waiting for a scheduled retry.
  RunningDelayed,
  Paused,
  Success,
  Error,
}

impl State {
  pub fn is_completed(&self) -> bool {
    matches!(self, State::Success | State::Error)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      State::Idle => "IDLE",
      State::Running => "RUNNING",
      State::RunningDelayed => "RUNNING_DELAYED",
      State::Paused => "PAUSED",
      State::Success => "SUCCESS",
      State::Error => "ERROR",
    }
  }
}

impl fmt::Display for State {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A registered workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowDefinition {
  pub name: String,
  /// Definition text as submitted.
  pub definition: String,
  /// Raw JSON definition of this workflow.
  pub spec: Json<Value>,
  pub tags: Json<Vec<String>>,
  /// Input signature, e.g. `name, greeting="Hello"`.
  pub input: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: Option<DateTime<Utc>>,
}

/// A workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowExecution {
  pub id: String,
  pub workflow_name: String,
  pub spec: Json<Value>,
  pub state: State,
  pub state_info: Option<String>,
  pub input: Json<Value>,
  /// Data flow context: input, evaluated vars and execution metadata.
  pub context: Json<Value>,
  pub output: Json<Value>,
  /// Set when this execution runs as a sub-workflow of a task.
  pub parent_task_execution_id: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// One run of a task within a workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TaskExecution {
  pub id: String,
  pub workflow_execution_id: String,
  pub name: String,
  pub state: State,
  pub state_info: Option<String>,
  /// Context the task was started with.
  pub in_context: Json<Value>,
  /// Variables published on success.
  pub published: Json<Value>,
  pub result: Option<Json<Value>>,
  /// Whether the task's transitions have already been evaluated.
  pub processed: bool,
  /// Number of retries performed so far.
  pub attempt: i32,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// A persisted request to invoke a target at or after `execution_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayedCall {
  pub id: String,
  /// Factory producing the object the method is called on; `None` for free
  /// functions.
  pub factory_method_path: Option<String>,
  pub target_method_name: String,
  /// Encoded arguments keyed by parameter name.
  pub method_arguments: Map<String, Value>,
  /// Parameter name to serializer locator.
  pub serializers: BTreeMap<String, String>,
  pub auth_context: Option<Value>,
  pub execution_time: DateTime<Utc>,
  /// Claim flag; only ever flipped by a conditional update.
  pub processing: bool,
}

/// Database row of a delayed call.
#[derive(Debug, FromRow)]
pub(crate) struct DelayedCallRow {
  pub id: String,
  pub factory_method_path: Option<String>,
  pub target_method_name: String,
  pub method_arguments: Json<Map<String, Value>>,
  pub serializers: Json<BTreeMap<String, String>>,
  pub auth_context: Option<Json<Value>>,
  pub execution_time: i64,
  pub processing: bool,
}

impl TryFrom<DelayedCallRow> for DelayedCall {
  type Error = sqlx::Error;

  fn try_from(row: DelayedCallRow) -> Result<Self, Self::Error> {
    let execution_time = DateTime::from_timestamp_millis(row.execution_time).ok_or_else(|| {
      sqlx::Error::Decode(format!("invalid execution_time {}", row.execution_time).into())
    })?;

    Ok(DelayedCall {
      id: row.id,
      factory_method_path: row.factory_method_path,
      target_method_name: row.target_method_name,
      method_arguments: row.method_arguments.0,
      serializers: row.serializers.0,
      auth_context: row.auth_context.map(|c| c.0),
      execution_time,
      processing: row.processing,
    })
  }
}
