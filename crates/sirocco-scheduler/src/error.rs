use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
  #[error("store error: {0}")]
  Store(#[from] sirocco_store::Error),

  #[error("unknown call target: {0}")]
  UnknownTarget(String),

  #[error("target '{target}' has no method '{method}'")]
  UnknownMethod { target: String, method: String },

  #[error("invalid delay: {0}")]
  InvalidDelay(String),

  #[error("unknown serializer: {0}")]
  UnknownSerializer(String),

  #[error("failed to (de)serialize argument '{argument}': {message}")]
  Serialization { argument: String, message: String },

  /// The target ran and reported a failure.
  #[error("invocation failed: {0}")]
  Invocation(String),
}

impl SchedulerError {
  /// Errors that invoking the same call again can never fix: the call
  /// names something unregistered or its stored arguments don't decode.
  pub fn is_permanent(&self) -> bool {
    matches!(
      self,
      SchedulerError::UnknownTarget(_)
        | SchedulerError::UnknownMethod { .. }
        | SchedulerError::UnknownSerializer(_)
        | SchedulerError::Serialization { .. }
    )
  }
}
