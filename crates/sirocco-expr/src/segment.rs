use crate::error::ExpressionError;

const OPEN: &str = "<%";
const CLOSE: &str = "%>";

/// A piece of a string value: literal text or an embedded expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
  Text(&'a str),
  Expression(&'a str),
}

/// Split a string into literal text and `<% ... %>` expressions.
///
/// Expression bodies are trimmed. An opening `<%` without a matching `%>` is
/// a syntax error.
pub fn split_segments(source: &str) -> Result<Vec<Segment<'_>>, ExpressionError> {
  let mut segments = Vec::new();
  let mut rest = source;

  while let Some(start) = rest.find(OPEN) {
    if start > 0 {
      segments.push(Segment::Text(&rest[..start]));
    }

    let body = &rest[start + OPEN.len()..];
    let end = body.find(CLOSE).ok_or_else(|| ExpressionError::Syntax {
      expression: source.to_string(),
      message: format!("unterminated '{}'", OPEN),
    })?;

    segments.push(Segment::Expression(body[..end].trim()));
    rest = &body[end + CLOSE.len()..];
  }

  if !rest.is_empty() {
    segments.push(Segment::Text(rest));
  }

  Ok(segments)
}

/// Check whether a string contains any expression delimiters.
pub fn has_expressions(s: &str) -> bool {
  s.contains(OPEN)
}

/// Check if a string is exactly one expression (`<% expr %>`), ignoring
/// surrounding whitespace.
pub fn is_pure_expression(s: &str) -> bool {
  let trimmed = s.trim();
  trimmed.starts_with(OPEN)
    && trimmed.ends_with(CLOSE)
    && trimmed.matches(OPEN).count() == 1
    && trimmed.matches(CLOSE).count() == 1
}
