//! Registering and looking up workflow definitions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sirocco_expr::{Evaluator, MinijinjaEvaluator};
use sirocco_store::{DefinitionWrite, Json, Store, WorkflowDefinition};
use sirocco_workflow::{WorkflowSpec, parse_workflow_list};
use tracing::info;

use crate::EngineError;

/// Listing view of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowSummary {
  pub name: String,
  pub tags: Vec<String>,
  pub input: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: Option<DateTime<Utc>>,
}

impl From<&WorkflowDefinition> for WorkflowSummary {
  fn from(definition: &WorkflowDefinition) -> Self {
    Self {
      name: definition.name.clone(),
      tags: definition.tags.0.clone(),
      input: definition.input.clone(),
      created_at: definition.created_at,
      updated_at: definition.updated_at,
    }
  }
}

/// Workflow definition service.
///
/// Definitions are submitted as workflow list documents (`version: '2.0'`
/// plus one mapping per workflow). Every workflow in a document is validated
/// before any of them is stored.
pub struct WorkflowService {
  store: Arc<dyn Store>,
  evaluator: Arc<dyn Evaluator>,
}

impl WorkflowService {
  pub fn new(store: Arc<dyn Store>) -> Self {
    Self {
      store,
      evaluator: Arc::new(MinijinjaEvaluator::new()),
    }
  }

  /// Parse and validate a workflow list document without storing it.
  pub fn validate(&self, text: &str) -> Result<Vec<WorkflowSpec>, EngineError> {
    Ok(parse_workflow_list(text, &*self.evaluator)?)
  }

  /// Register every workflow in `text`. Fails without storing anything if
  /// any name is already taken.
  pub async fn create_workflows(&self, text: &str) -> Result<Vec<WorkflowDefinition>, EngineError> {
    let definitions = self.definitions(text)?;
    self
      .store
      .write_definitions(&definitions, DefinitionWrite::Create)
      .await?;
    for definition in &definitions {
      info!(workflow = %definition.name, "workflow_registered");
    }
    Ok(definitions)
  }

  /// Replace every workflow in `text`. Fails without storing anything if any
  /// of them is unknown.
  pub async fn update_workflows(&self, text: &str) -> Result<Vec<WorkflowDefinition>, EngineError> {
    let mut definitions = self.definitions(text)?;
    let now = Utc::now();
    for definition in &mut definitions {
      definition.updated_at = Some(now);
    }
    self
      .store
      .write_definitions(&definitions, DefinitionWrite::Update)
      .await?;
    for definition in &definitions {
      info!(workflow = %definition.name, "workflow_updated");
    }
    self.reload(&definitions).await
  }

  /// Register new workflows and replace existing ones, all in one write.
  pub async fn put_workflows(&self, text: &str) -> Result<Vec<WorkflowDefinition>, EngineError> {
    let definitions = self.definitions(text)?;
    self
      .store
      .write_definitions(&definitions, DefinitionWrite::Upsert)
      .await?;
    for definition in &definitions {
      info!(workflow = %definition.name, "workflow_stored");
    }
    self.reload(&definitions).await
  }

  pub async fn get_workflow(&self, name: &str) -> Result<WorkflowDefinition, EngineError> {
    Ok(self.store.get_definition(name).await?)
  }

  pub async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, EngineError> {
    let definitions = self.store.list_definitions().await?;
    Ok(definitions.iter().map(WorkflowSummary::from).collect())
  }

  pub async fn delete_workflow(&self, name: &str) -> Result<(), EngineError> {
    self.store.delete_definition(name).await?;
    info!(workflow = %name, "workflow_deleted");
    Ok(())
  }

  /// Read back stored rows so callers see the preserved `created_at`.
  async fn reload(&self, definitions: &[WorkflowDefinition]) -> Result<Vec<WorkflowDefinition>, EngineError> {
    let mut stored = Vec::with_capacity(definitions.len());
    for definition in definitions {
      stored.push(self.store.get_definition(&definition.name).await?);
    }
    Ok(stored)
  }

  fn definitions(&self, text: &str) -> Result<Vec<WorkflowDefinition>, EngineError> {
    let now = Utc::now();
    Ok(
      self
        .validate(text)?
        .into_iter()
        .map(|spec| WorkflowDefinition {
          name: spec.name().to_string(),
          definition: text.to_string(),
          spec: Json(spec.raw().clone()),
          tags: Json(spec.tags().to_vec()),
          input: spec.input_signature(),
          created_at: now,
          updated_at: None,
        })
        .collect(),
    )
  }
}
