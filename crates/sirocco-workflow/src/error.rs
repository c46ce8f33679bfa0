use std::fmt;

use thiserror::Error;

/// Where in a definition an error was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
  pub workflow: Option<String>,
  pub task: Option<String>,
}

impl Location {
  pub fn workflow(name: impl Into<String>) -> Self {
    Self {
      workflow: Some(name.into()),
      task: None,
    }
  }

  pub fn task(&self, name: impl Into<String>) -> Self {
    Self {
      workflow: self.workflow.clone(),
      task: Some(name.into()),
    }
  }
}

impl fmt::Display for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (&self.workflow, &self.task) {
      (Some(wf), Some(task)) => write!(f, " [workflow={}, task={}]", wf, task),
      (Some(wf), None) => write!(f, " [workflow={}]", wf),
      (None, Some(task)) => write!(f, " [task={}]", task),
      (None, None) => Ok(()),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpecError {
  /// The definition does not have the required shape.
  #[error("invalid workflow model: {message}{location}")]
  InvalidModel { location: Location, message: String },

  /// The definition is well formed but its content is unusable
  /// (bad expression, no start task, ...).
  #[error("DSL parsing error: {message}{location}")]
  DslParsing { location: Location, message: String },
}

impl SpecError {
  pub fn invalid_model(location: &Location, message: impl Into<String>) -> Self {
    SpecError::InvalidModel {
      location: location.clone(),
      message: message.into(),
    }
  }

  pub fn dsl_parsing(location: &Location, message: impl Into<String>) -> Self {
    SpecError::DslParsing {
      location: location.clone(),
      message: message.into(),
    }
  }

  pub fn location(&self) -> &Location {
    match self {
      SpecError::InvalidModel { location, .. } => location,
      SpecError::DslParsing { location, .. } => location,
    }
  }
}
