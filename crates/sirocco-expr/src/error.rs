use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
  /// The expression could not be parsed.
  #[error("invalid expression '{expression}': {message}")]
  Syntax { expression: String, message: String },

  /// The expression parsed but failed against the given context.
  #[error("can not evaluate expression '{expression}': {message}")]
  Evaluation { expression: String, message: String },
}

impl ExpressionError {
  pub fn expression(&self) -> &str {
    match self {
      ExpressionError::Syntax { expression, .. } => expression,
      ExpressionError::Evaluation { expression, .. } => expression,
    }
  }
}
