//! Walk JSON values and apply the evaluator to every string inside them.

use serde_json::Value;

use crate::error::ExpressionError;
use crate::evaluator::Evaluator;
use crate::segment::has_expressions;

/// Validate every expression found anywhere inside `value`.
pub fn validate_recursively(evaluator: &dyn Evaluator, value: &Value) -> Result<(), ExpressionError> {
  match value {
    Value::String(s) if has_expressions(s) => evaluator.validate(s),
    Value::Array(items) => items
      .iter()
      .try_for_each(|v| validate_recursively(evaluator, v)),
    Value::Object(map) => map
      .values()
      .try_for_each(|v| validate_recursively(evaluator, v)),
    _ => Ok(()),
  }
}

/// Evaluate every string inside `value` against `context`.
///
/// Object keys are left untouched. Numbers, booleans and nulls pass through.
pub fn evaluate_recursively(
  evaluator: &dyn Evaluator,
  value: &Value,
  context: &Value,
) -> Result<Value, ExpressionError> {
  match value {
    Value::String(s) if has_expressions(s) => evaluator.evaluate(s, context),
    Value::Array(items) => {
      let resolved: Result<Vec<_>, _> = items
        .iter()
        .map(|v| evaluate_recursively(evaluator, v, context))
        .collect();
      Ok(Value::Array(resolved?))
    }
    Value::Object(map) => {
      let mut resolved = serde_json::Map::new();
      for (k, v) in map {
        resolved.insert(k.clone(), evaluate_recursively(evaluator, v, context)?);
      }
      Ok(Value::Object(resolved))
    }
    _ => Ok(value.clone()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::MinijinjaEvaluator;
  use serde_json::json;

  #[test]
  fn test_evaluate_nested() {
    let evaluator = MinijinjaEvaluator::new();
    let ctx = json!({ "user": { "name": "ann", "age": 30 } });
    let value = json!({
      "greeting": "hi <% user.name %>",
      "details": { "age": "<% user.age %>", "tags": ["<% user.name | upper %>", 1, true] },
      "static": null
    });

    let resolved = evaluate_recursively(&evaluator, &value, &ctx).unwrap();
    assert_eq!(
      resolved,
      json!({
        "greeting": "hi ann",
        "details": { "age": 30, "tags": ["ANN", 1, true] },
        "static": null
      })
    );
  }

  #[test]
  fn test_validate_reports_first_bad_expression() {
    let evaluator = MinijinjaEvaluator::new();
    let value = json!({ "ok": "<% a %>", "nested": ["<% b + %>"] });

    let err = validate_recursively(&evaluator, &value).unwrap_err();
    assert_eq!(err.expression(), "b +");
  }
}
