use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;

use crate::error::ExpressionError;
use crate::segment::{Segment, has_expressions, is_pure_expression, split_segments};

/// Expression evaluator used by the definition parser and the engine.
///
/// `source` is always a full string value as written in the definition; it may
/// contain zero or more `<% ... %>` expressions.
pub trait Evaluator: Send + Sync {
  /// Check the syntax of every embedded expression without evaluating it.
  fn validate(&self, source: &str) -> Result<(), ExpressionError>;

  /// Evaluate a string value against a context.
  fn evaluate(&self, source: &str, context: &Value) -> Result<Value, ExpressionError>;

  /// Evaluate a transition guard.
  fn evaluate_condition(&self, source: &str, context: &Value) -> Result<bool, ExpressionError> {
    self.evaluate(source, context).map(|value| is_truthy(&value))
  }
}

/// Truthiness of a JSON value: null, false, zero and empty values are false.
pub fn is_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    Value::String(s) => !s.is_empty(),
    Value::Array(items) => !items.is_empty(),
    Value::Object(map) => !map.is_empty(),
  }
}

/// Evaluator backed by minijinja expressions.
///
/// Undefined variables are errors rather than silently empty values.
pub struct MinijinjaEvaluator {
  env: Environment<'static>,
}

impl MinijinjaEvaluator {
  pub fn new() -> Self {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    Self { env }
  }

  fn eval_expression(
    &self,
    expression: &str,
    context: &Value,
  ) -> Result<minijinja::Value, ExpressionError> {
    let compiled = self
      .env
      .compile_expression(expression)
      .map_err(|e| ExpressionError::Syntax {
        expression: expression.to_string(),
        message: e.to_string(),
      })?;

    let value = compiled
      .eval(context)
      .map_err(|e| ExpressionError::Evaluation {
        expression: expression.to_string(),
        message: e.to_string(),
      })?;

    if value.is_undefined() {
      return Err(ExpressionError::Evaluation {
        expression: expression.to_string(),
        message: "expression resolved to an undefined value".to_string(),
      });
    }

    Ok(value)
  }

  fn to_json(expression: &str, value: &minijinja::Value) -> Result<Value, ExpressionError> {
    serde_json::to_value(value).map_err(|e| ExpressionError::Evaluation {
      expression: expression.to_string(),
      message: format!("result is not representable as JSON: {}", e),
    })
  }
}

impl Default for MinijinjaEvaluator {
  fn default() -> Self {
    Self::new()
  }
}

impl Evaluator for MinijinjaEvaluator {
  fn validate(&self, source: &str) -> Result<(), ExpressionError> {
    for segment in split_segments(source)? {
      if let Segment::Expression(expression) = segment {
        self
          .env
          .compile_expression(expression)
          .map_err(|e| ExpressionError::Syntax {
            expression: expression.to_string(),
            message: e.to_string(),
          })?;
      }
    }
    Ok(())
  }

  fn evaluate(&self, source: &str, context: &Value) -> Result<Value, ExpressionError> {
    if !has_expressions(source) {
      return Ok(Value::String(source.to_string()));
    }

    // A lone expression keeps its type, so `<% count %>` stays a number
    if is_pure_expression(source)
      && let [Segment::Expression(expression)] = split_segments(source.trim())?.as_slice()
    {
      let value = self.eval_expression(expression, context)?;
      return Self::to_json(expression, &value);
    }

    let mut rendered = String::new();
    for segment in split_segments(source)? {
      match segment {
        Segment::Text(text) => rendered.push_str(text),
        Segment::Expression(expression) => {
          let value = Self::to_json(expression, &self.eval_expression(expression, context)?)?;
          match value {
            Value::String(s) => rendered.push_str(&s),
            other => rendered.push_str(&other.to_string()),
          }
        }
      }
    }

    Ok(Value::String(rendered))
  }
}
