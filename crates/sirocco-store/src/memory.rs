//! In-memory store (for tests and one-shot runs).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
  DefinitionWrite, DelayedCall, Error, Store, TaskExecution, WorkflowDefinition, WorkflowExecution,
};

/// Rows keyed by id that remember insertion order.
struct Table<T> {
  rows: HashMap<String, (u64, T)>,
  next_seq: u64,
}

impl<T: Clone> Table<T> {
  fn new() -> Self {
    Self {
      rows: HashMap::new(),
      next_seq: 0,
    }
  }

  fn insert(&mut self, id: &str, value: T) -> bool {
    if self.rows.contains_key(id) {
      return false;
    }
    self.rows.insert(id.to_string(), (self.next_seq, value));
    self.next_seq += 1;
    true
  }

  fn replace(&mut self, id: &str, value: T) -> bool {
    match self.rows.get_mut(id) {
      Some((_, row)) => {
        *row = value;
        true
      }
      None => false,
    }
  }

  fn get(&self, id: &str) -> Option<&T> {
    self.rows.get(id).map(|(_, row)| row)
  }

  fn get_mut(&mut self, id: &str) -> Option<&mut T> {
    self.rows.get_mut(id).map(|(_, row)| row)
  }

  fn remove(&mut self, id: &str) -> bool {
    self.rows.remove(id).is_some()
  }

  fn ordered(&self, filter: impl Fn(&T) -> bool) -> Vec<T> {
    let mut rows: Vec<&(u64, T)> = self.rows.values().filter(|(_, row)| filter(row)).collect();
    rows.sort_by_key(|(seq, _)| *seq);
    rows.into_iter().map(|(_, row)| row.clone()).collect()
  }
}

/// In-memory store.
#[derive(Clone)]
pub struct MemoryStore {
  definitions: Arc<RwLock<Table<WorkflowDefinition>>>,
  executions: Arc<RwLock<Table<WorkflowExecution>>>,
  tasks: Arc<RwLock<Table<TaskExecution>>>,
  delayed_calls: Arc<RwLock<Table<DelayedCall>>>,
}

impl MemoryStore {
  /// Create a new empty store.
  pub fn new() -> Self {
    Self {
      definitions: Arc::new(RwLock::new(Table::new())),
      executions: Arc::new(RwLock::new(Table::new())),
      tasks: Arc::new(RwLock::new(Table::new())),
      delayed_calls: Arc::new(RwLock::new(Table::new())),
    }
  }
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

fn not_found(kind: &str, id: &str) -> Error {
  Error::NotFound(format!("{} '{}'", kind, id))
}

#[async_trait]
impl Store for MemoryStore {
  async fn write_definitions(
    &self,
    definitions: &[WorkflowDefinition],
    mode: DefinitionWrite,
  ) -> Result<(), Error> {
    let mut table = self.definitions.write().await;

    // Check the whole batch before touching the table
    for definition in definitions {
      let exists = table.get(&definition.name).is_some();
      match mode {
        DefinitionWrite::Create if exists => {
          return Err(Error::AlreadyExists(format!(
            "workflow definition '{}'",
            definition.name
          )));
        }
        DefinitionWrite::Update if !exists => {
          return Err(not_found("workflow definition", &definition.name));
        }
        _ => {}
      }
    }

    for definition in definitions {
      match table.get(&definition.name).cloned() {
        Some(existing) => {
          let updated_at = match mode {
            DefinitionWrite::Upsert => Some(definition.created_at),
            _ => definition.updated_at,
          };
          let updated = WorkflowDefinition {
            created_at: existing.created_at,
            updated_at,
            ..definition.clone()
          };
          table.replace(&definition.name, updated);
        }
        None => {
          table.insert(&definition.name, definition.clone());
        }
      }
    }
    Ok(())
  }

  async fn get_definition(&self, name: &str) -> Result<WorkflowDefinition, Error> {
    let definitions = self.definitions.read().await;
    definitions
      .get(name)
      .cloned()
      .ok_or_else(|| not_found("workflow definition", name))
  }

  async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, Error> {
    let definitions = self.definitions.read().await;
    let mut all = definitions.ordered(|_| true);
    all.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(all)
  }

  async fn delete_definition(&self, name: &str) -> Result<(), Error> {
    let mut definitions = self.definitions.write().await;
    if !definitions.remove(name) {
      return Err(not_found("workflow definition", name));
    }
    Ok(())
  }

  async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), Error> {
    let mut executions = self.executions.write().await;
    if !executions.insert(&execution.id, execution.clone()) {
      return Err(Error::AlreadyExists(format!(
        "workflow execution '{}'",
        execution.id
      )));
    }
    Ok(())
  }

  async fn get_execution(&self, id: &str) -> Result<WorkflowExecution, Error> {
    let executions = self.executions.read().await;
    executions
      .get(id)
      .cloned()
      .ok_or_else(|| not_found("workflow execution", id))
  }

  async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), Error> {
    let mut executions = self.executions.write().await;
    if !executions.replace(&execution.id, execution.clone()) {
      return Err(not_found("workflow execution", &execution.id));
    }
    Ok(())
  }

  async fn list_executions(&self, workflow_name: Option<&str>) -> Result<Vec<WorkflowExecution>, Error> {
    let executions = self.executions.read().await;
    Ok(executions.ordered(|e| workflow_name.is_none_or(|name| e.workflow_name == name)))
  }

  async fn create_task_execution(&self, task: &TaskExecution) -> Result<(), Error> {
    if !self
      .executions
      .read()
      .await
      .rows
      .contains_key(&task.workflow_execution_id)
    {
      return Err(not_found("workflow execution", &task.workflow_execution_id));
    }

    let mut tasks = self.tasks.write().await;
    if !tasks.insert(&task.id, task.clone()) {
      return Err(Error::AlreadyExists(format!("task execution '{}'", task.id)));
    }
    Ok(())
  }

  async fn get_task_execution(&self, id: &str) -> Result<TaskExecution, Error> {
    let tasks = self.tasks.read().await;
    tasks
      .get(id)
      .cloned()
      .ok_or_else(|| not_found("task execution", id))
  }

  async fn update_task_execution(&self, task: &TaskExecution) -> Result<(), Error> {
    let mut tasks = self.tasks.write().await;
    if !tasks.replace(&task.id, task.clone()) {
      return Err(not_found("task execution", &task.id));
    }
    Ok(())
  }

  async fn list_task_executions(&self, execution_id: &str) -> Result<Vec<TaskExecution>, Error> {
    let tasks = self.tasks.read().await;
    Ok(tasks.ordered(|t| t.workflow_execution_id == execution_id))
  }

  async fn create_delayed_call(&self, call: &DelayedCall) -> Result<(), Error> {
    let mut calls = self.delayed_calls.write().await;
    if !calls.insert(&call.id, call.clone()) {
      return Err(Error::AlreadyExists(format!("delayed call '{}'", call.id)));
    }
    Ok(())
  }

  async fn get_delayed_call(&self, id: &str) -> Result<DelayedCall, Error> {
    let calls = self.delayed_calls.read().await;
    calls
      .get(id)
      .cloned()
      .ok_or_else(|| not_found("delayed call", id))
  }

  async fn get_delayed_calls_to_start(&self, threshold: DateTime<Utc>) -> Result<Vec<DelayedCall>, Error> {
    let calls = self.delayed_calls.read().await;
    Ok(calls.ordered(|c| !c.processing && c.execution_time <= threshold))
  }

  async fn update_delayed_call(
    &self,
    id: &str,
    processing: bool,
    expected_processing: bool,
  ) -> Result<(Option<DelayedCall>, u64), Error> {
    let mut calls = self.delayed_calls.write().await;
    match calls.get_mut(id) {
      Some(call) if call.processing == expected_processing => {
        call.processing = processing;
        Ok((Some(call.clone()), 1))
      }
      Some(call) => Ok((Some(call.clone()), 0)),
      None => Ok((None, 0)),
    }
  }

  async fn delete_delayed_call(&self, id: &str) -> Result<(), Error> {
    let mut calls = self.delayed_calls.write().await;
    if !calls.remove(id) {
      return Err(not_found("delayed call", id));
    }
    Ok(())
  }
}
