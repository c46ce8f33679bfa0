//! Sirocco Store
//!
//! This crate provides the storage trait and implementations for workflow
//! definitions, executions and delayed calls. Data is persisted to SQLite
//! ([`SqliteStore`]) or kept in process ([`MemoryStore`], for tests and
//! one-shot runs).
//!
//! The [`Store`] trait defines operations for:
//! - Registering and looking up workflow definitions
//! - Creating and updating workflow and task executions
//! - Creating, claiming and deleting delayed calls

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use sqlx::types::Json;
pub use types::{DelayedCall, State, TaskExecution, WorkflowDefinition, WorkflowExecution};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A record with the same key already exists.
  #[error("already exists: {0}")]
  AlreadyExists(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Schema migration failed.
  #[error("migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),
}

/// How [`Store::write_definitions`] treats existing names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionWrite {
  /// Every name must be new (`AlreadyExists` otherwise).
  Create,
  /// Every name must exist (`NotFound` otherwise).
  Update,
  /// Insert new names. Existing rows keep `created_at` and get the incoming
  /// `created_at` as `updated_at`.
  Upsert,
}

/// Storage trait for definitions, executions and delayed calls.
#[async_trait]
pub trait Store: Send + Sync {
  /// Write a batch of definitions atomically: either every definition is
  /// stored or none is.
  async fn write_definitions(
    &self,
    definitions: &[WorkflowDefinition],
    mode: DefinitionWrite,
  ) -> Result<(), Error>;

  /// Get a workflow definition by name.
  async fn get_definition(&self, name: &str) -> Result<WorkflowDefinition, Error>;

  /// List all workflow definitions ordered by name.
  async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, Error>;

  /// Delete a workflow definition by name.
  async fn delete_definition(&self, name: &str) -> Result<(), Error>;

  /// Create a new workflow execution.
  async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), Error>;

  /// Get a workflow execution by ID.
  async fn get_execution(&self, id: &str) -> Result<WorkflowExecution, Error>;

  /// Persist every mutable field of a workflow execution.
  async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), Error>;

  /// List executions in creation order, optionally for one workflow.
  async fn list_executions(&self, workflow_name: Option<&str>) -> Result<Vec<WorkflowExecution>, Error>;

  /// Create a new task execution.
  async fn create_task_execution(&self, task: &TaskExecution) -> Result<(), Error>;

  /// Get a task execution by ID.
  async fn get_task_execution(&self, id: &str) -> Result<TaskExecution, Error>;

  /// Persist every mutable field of a task execution.
  async fn update_task_execution(&self, task: &TaskExecution) -> Result<(), Error>;

  /// List the task executions of a workflow execution in creation order.
  async fn list_task_executions(&self, execution_id: &str) -> Result<Vec<TaskExecution>, Error>;

  /// Persist a new delayed call.
  async fn create_delayed_call(&self, call: &DelayedCall) -> Result<(), Error>;

  /// Get a delayed call by ID.
  async fn get_delayed_call(&self, id: &str) -> Result<DelayedCall, Error>;

  /// Unclaimed calls with `execution_time <= threshold`, in no particular order.
  async fn get_delayed_calls_to_start(&self, threshold: DateTime<Utc>) -> Result<Vec<DelayedCall>, Error>;

  /// Set `processing` only if it currently equals `expected_processing`.
  ///
  /// Returns the row as it is after the update (if it exists) and the
  /// number of affected rows; `0` means another worker won the claim.
  async fn update_delayed_call(
    &self,
    id: &str,
    processing: bool,
    expected_processing: bool,
  ) -> Result<(Option<DelayedCall>, u64), Error>;

  /// Delete a delayed call by ID.
  async fn delete_delayed_call(&self, id: &str) -> Result<(), Error>;
}
