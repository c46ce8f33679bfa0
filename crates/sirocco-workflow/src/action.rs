//! Inline action parameters.
//!
//! ```yaml
//! action: std.echo output="Hello, <% name %>" count=3 flag=true
//! ```
//!
//! Values in quotes are strings. Unquoted values are read as JSON when they
//! parse as JSON and kept as strings otherwise. Whitespace inside quotes or
//! inside `<% ... %>` does not split parameters.

use serde_json::{Map, Value};

/// Split an action line into the action name and its inline parameters.
pub fn parse_inline(line: &str) -> Result<(String, Map<String, Value>), String> {
  let tokens = tokenize(line)?;
  let mut tokens = tokens.into_iter();

  let name = tokens
    .next()
    .ok_or_else(|| "action name is empty".to_string())?;

  let mut params = Map::new();
  for token in tokens {
    let (key, raw) = token
      .split_once('=')
      .ok_or_else(|| format!("invalid action parameter '{}', expected key=value", token))?;

    if key.is_empty() {
      return Err(format!("invalid action parameter '{}'", token));
    }

    params.insert(key.to_string(), parse_value(raw));
  }

  Ok((name, params))
}

fn parse_value(raw: &str) -> Value {
  if let Some(quoted) = strip_quotes(raw) {
    return Value::String(quoted.to_string());
  }
  if raw.contains("<%") {
    return Value::String(raw.to_string());
  }
  serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn strip_quotes(raw: &str) -> Option<&str> {
  ['"', '\''].into_iter().find_map(|q| {
    raw
      .strip_prefix(q)
      .and_then(|rest| rest.strip_suffix(q))
  })
}

fn tokenize(line: &str) -> Result<Vec<String>, String> {
  let mut tokens = Vec::new();
  let mut current = String::new();
  let mut quote: Option<char> = None;
  let mut in_expression = false;
  let mut chars = line.chars().peekable();

  while let Some(c) = chars.next() {
    match quote {
      Some(q) => {
        current.push(c);
        if c == q {
          quote = None;
        }
      }
      None if in_expression => {
        current.push(c);
        if c == '%' && chars.peek() == Some(&'>') {
          current.push('>');
          chars.next();
          in_expression = false;
        }
      }
      None => match c {
        '"' | '\'' => {
          quote = Some(c);
          current.push(c);
        }
        '<' if chars.peek() == Some(&'%') => {
          current.push('<');
          current.push('%');
          chars.next();
          in_expression = true;
        }
        c if c.is_whitespace() => {
          if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
          }
        }
        c => current.push(c),
      },
    }
  }

  if quote.is_some() {
    return Err(format!("unterminated quote in '{}'", line));
  }
  if in_expression {
    return Err(format!("unterminated expression in '{}'", line));
  }
  if !current.is_empty() {
    tokens.push(current);
  }

  Ok(tokens)
}
