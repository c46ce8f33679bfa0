//! Workflow input parameter declarations.
//!
//! ```yaml
//! input:
//!   - name              # required, no default
//!   - greeting: Hello   # optional, default "Hello"
//!   - limit: null       # optional, default null
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One declared workflow input parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputEntryDef {
  /// Bare parameter name without a default.
  Name(String),
  /// Single-key mapping `name: default`.
  WithDefault(Map<String, Value>),
}
