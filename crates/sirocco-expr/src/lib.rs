//! Sirocco Expressions
//!
//! Workflow definitions embed expressions between `<%` and `%>`:
//!
//! ```yaml
//! input:
//!   count: <% items | length %>
//!   message: "Hello <% name | title %>!"
//! ```
//!
//! A string that consists of exactly one expression evaluates to the typed
//! result (`<% 1 + 1 %>` is the number `2`). Any other string containing
//! expressions is interpolated into a string. Strings without expressions are
//! passed through.
//!
//! The engine only depends on the [`Evaluator`] trait. [`MinijinjaEvaluator`]
//! is the bundled implementation; undefined variables are errors.

mod error;
mod evaluator;
mod recursive;
mod segment;

pub use error::ExpressionError;
pub use evaluator::{Evaluator, MinijinjaEvaluator, is_truthy};
pub use recursive::{evaluate_recursively, validate_recursively};
pub use segment::{Segment, has_expressions, is_pure_expression, split_segments};
