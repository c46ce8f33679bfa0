use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;

use crate::types::DelayedCallRow;
use crate::{
  DefinitionWrite, DelayedCall, Error, Store, TaskExecution, WorkflowDefinition, WorkflowExecution,
};

const DEFINITION_COLUMNS: &str = "name, definition, spec, tags, input, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, workflow_name, spec, state, state_info, input, context, \
   output, parent_task_execution_id, created_at, updated_at";

const TASK_COLUMNS: &str = "id, workflow_execution_id, name, state, state_info, in_context, \
   published, result, processed, attempt, created_at, updated_at";

const DELAYED_CALL_COLUMNS: &str = "id, factory_method_path, target_method_name, \
   method_arguments, serializers, auth_context, execution_time, processing";

/// SQLite-based store implementation.
#[derive(Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) the database at `url`, e.g.
  /// `sqlite:///home/me/.sirocco/sirocco.db`.
  pub async fn connect(url: &str) -> Result<Self, Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(5)
      .connect_with(options)
      .await?;
    Ok(Self::new(pool))
  }

  /// A private in-memory database.
  ///
  /// Each SQLite `:memory:` connection is its own database, so the pool is
  /// pinned to a single connection that never expires.
  pub async fn in_memory() -> Result<Self, Error> {
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect("sqlite::memory:")
      .await?;
    Ok(Self::new(pool))
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    Ok(())
  }

  pub fn pool(&self) -> &SqlitePool {
    &self.pool
  }
}

fn not_found(kind: &str, id: &str) -> Error {
  Error::NotFound(format!("{} '{}'", kind, id))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
  matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl Store for SqliteStore {
  async fn write_definitions(
    &self,
    definitions: &[WorkflowDefinition],
    mode: DefinitionWrite,
  ) -> Result<(), Error> {
    // Dropping the transaction on an early return rolls it back
    let mut tx = self.pool.begin().await?;

    for definition in definitions {
      match mode {
        DefinitionWrite::Create => {
          let result = sqlx::query(&format!(
            "INSERT INTO workflow_definitions ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
            DEFINITION_COLUMNS
          ))
          .bind(&definition.name)
          .bind(&definition.definition)
          .bind(&definition.spec)
          .bind(&definition.tags)
          .bind(&definition.input)
          .bind(definition.created_at)
          .bind(definition.updated_at)
          .execute(&mut *tx)
          .await;

          match result {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
              return Err(Error::AlreadyExists(format!(
                "workflow definition '{}'",
                definition.name
              )));
            }
            Err(e) => return Err(e.into()),
          }
        }
        DefinitionWrite::Update => {
          let result = sqlx::query(
            r#"
            UPDATE workflow_definitions
            SET definition = ?, spec = ?, tags = ?, input = ?, updated_at = ?
            WHERE name = ?
            "#,
          )
          .bind(&definition.definition)
          .bind(&definition.spec)
          .bind(&definition.tags)
          .bind(&definition.input)
          .bind(definition.updated_at)
          .bind(&definition.name)
          .execute(&mut *tx)
          .await?;

          if result.rows_affected() == 0 {
            return Err(not_found("workflow definition", &definition.name));
          }
        }
        DefinitionWrite::Upsert => {
          sqlx::query(&format!(
            r#"
            INSERT INTO workflow_definitions ({}) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
              definition = excluded.definition,
              spec = excluded.spec,
              tags = excluded.tags,
              input = excluded.input,
              updated_at = excluded.created_at
            "#,
            DEFINITION_COLUMNS
          ))
          .bind(&definition.name)
          .bind(&definition.definition)
          .bind(&definition.spec)
          .bind(&definition.tags)
          .bind(&definition.input)
          .bind(definition.created_at)
          .bind(definition.updated_at)
          .execute(&mut *tx)
          .await?;
        }
      }
    }

    tx.commit().await?;
    Ok(())
  }

  async fn get_definition(&self, name: &str) -> Result<WorkflowDefinition, Error> {
    sqlx::query_as(&format!(
      "SELECT {} FROM workflow_definitions WHERE name = ?",
      DEFINITION_COLUMNS
    ))
    .bind(name)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| not_found("workflow definition", name))
  }

  async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, Error> {
    Ok(
      sqlx::query_as(&format!(
        "SELECT {} FROM workflow_definitions ORDER BY name ASC",
        DEFINITION_COLUMNS
      ))
      .fetch_all(&self.pool)
      .await?,
    )
  }

  async fn delete_definition(&self, name: &str) -> Result<(), Error> {
    let result = sqlx::query("DELETE FROM workflow_definitions WHERE name = ?")
      .bind(name)
      .execute(&self.pool)
      .await?;

    if result.rows_affected() == 0 {
      return Err(not_found("workflow definition", name));
    }
    Ok(())
  }

  async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), Error> {
    sqlx::query(&format!(
      "INSERT INTO workflow_executions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
      EXECUTION_COLUMNS
    ))
    .bind(&execution.id)
    .bind(&execution.workflow_name)
    .bind(&execution.spec)
    .bind(execution.state)
    .bind(&execution.state_info)
    .bind(&execution.input)
    .bind(&execution.context)
    .bind(&execution.output)
    .bind(&execution.parent_task_execution_id)
    .bind(execution.created_at)
    .bind(execution.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_execution(&self, id: &str) -> Result<WorkflowExecution, Error> {
    sqlx::query_as(&format!(
      "SELECT {} FROM workflow_executions WHERE id = ?",
      EXECUTION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| not_found("workflow execution", id))
  }

  async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
      UPDATE workflow_executions
      SET state = ?, state_info = ?, context = ?, output = ?, updated_at = ?
      WHERE id = ?
      "#,
    )
    .bind(execution.state)
    .bind(&execution.state_info)
    .bind(&execution.context)
    .bind(&execution.output)
    .bind(execution.updated_at)
    .bind(&execution.id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(not_found("workflow execution", &execution.id));
    }
    Ok(())
  }

  async fn list_executions(&self, workflow_name: Option<&str>) -> Result<Vec<WorkflowExecution>, Error> {
    let executions = match workflow_name {
      Some(name) => {
        sqlx::query_as(&format!(
          "SELECT {} FROM workflow_executions WHERE workflow_name = ? ORDER BY rowid ASC",
          EXECUTION_COLUMNS
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await?
      }
      None => {
        sqlx::query_as(&format!(
          "SELECT {} FROM workflow_executions ORDER BY rowid ASC",
          EXECUTION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?
      }
    };
    Ok(executions)
  }

  async fn create_task_execution(&self, task: &TaskExecution) -> Result<(), Error> {
    sqlx::query(&format!(
      "INSERT INTO task_executions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
      TASK_COLUMNS
    ))
    .bind(&task.id)
    .bind(&task.workflow_execution_id)
    .bind(&task.name)
    .bind(task.state)
    .bind(&task.state_info)
    .bind(&task.in_context)
    .bind(&task.published)
    .bind(&task.result)
    .bind(task.processed)
    .bind(task.attempt)
    .bind(task.created_at)
    .bind(task.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_task_execution(&self, id: &str) -> Result<TaskExecution, Error> {
    sqlx::query_as(&format!(
      "SELECT {} FROM task_executions WHERE id = ?",
      TASK_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| not_found("task execution", id))
  }

  async fn update_task_execution(&self, task: &TaskExecution) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
      UPDATE task_executions
      SET state = ?, state_info = ?, in_context = ?, published = ?, result = ?,
          processed = ?, attempt = ?, updated_at = ?
      WHERE id = ?
      "#,
    )
    .bind(task.state)
    .bind(&task.state_info)
    .bind(&task.in_context)
    .bind(&task.published)
    .bind(&task.result)
    .bind(task.processed)
    .bind(task.attempt)
    .bind(task.updated_at)
    .bind(&task.id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(not_found("task execution", &task.id));
    }
    Ok(())
  }

  async fn list_task_executions(&self, execution_id: &str) -> Result<Vec<TaskExecution>, Error> {
    Ok(
      sqlx::query_as(&format!(
        "SELECT {} FROM task_executions WHERE workflow_execution_id = ? ORDER BY rowid ASC",
        TASK_COLUMNS
      ))
      .bind(execution_id)
      .fetch_all(&self.pool)
      .await?,
    )
  }

  async fn create_delayed_call(&self, call: &DelayedCall) -> Result<(), Error> {
    sqlx::query(&format!(
      "INSERT INTO delayed_calls ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      DELAYED_CALL_COLUMNS
    ))
    .bind(&call.id)
    .bind(&call.factory_method_path)
    .bind(&call.target_method_name)
    .bind(Json(&call.method_arguments))
    .bind(Json(&call.serializers))
    .bind(call.auth_context.as_ref().map(Json))
    .bind(call.execution_time.timestamp_millis())
    .bind(call.processing)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_delayed_call(&self, id: &str) -> Result<DelayedCall, Error> {
    let row: DelayedCallRow = sqlx::query_as(&format!(
      "SELECT {} FROM delayed_calls WHERE id = ?",
      DELAYED_CALL_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| not_found("delayed call", id))?;

    Ok(row.try_into()?)
  }

  async fn get_delayed_calls_to_start(&self, threshold: DateTime<Utc>) -> Result<Vec<DelayedCall>, Error> {
    let rows: Vec<DelayedCallRow> = sqlx::query_as(&format!(
      "SELECT {} FROM delayed_calls WHERE processing = 0 AND execution_time <= ?",
      DELAYED_CALL_COLUMNS
    ))
    .bind(threshold.timestamp_millis())
    .fetch_all(&self.pool)
    .await?;

    Ok(
      rows
        .into_iter()
        .map(DelayedCall::try_from)
        .collect::<Result<Vec<_>, _>>()?,
    )
  }

  async fn update_delayed_call(
    &self,
    id: &str,
    processing: bool,
    expected_processing: bool,
  ) -> Result<(Option<DelayedCall>, u64), Error> {
    let result = sqlx::query("UPDATE delayed_calls SET processing = ? WHERE id = ? AND processing = ?")
      .bind(processing)
      .bind(id)
      .bind(expected_processing)
      .execute(&self.pool)
      .await?;

    let row: Option<DelayedCallRow> = sqlx::query_as(&format!(
      "SELECT {} FROM delayed_calls WHERE id = ?",
      DELAYED_CALL_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&self.pool)
    .await?;

    let call = row.map(DelayedCall::try_from).transpose()?;
    Ok((call, result.rows_affected()))
  }

  async fn delete_delayed_call(&self, id: &str) -> Result<(), Error> {
    let result = sqlx::query("DELETE FROM delayed_calls WHERE id = ?")
      .bind(id)
      .execute(&self.pool)
      .await?;

    if result.rows_affected() == 0 {
      return Err(not_found("delayed call", id));
    }
    Ok(())
  }
}
