use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A transition clause as written in the DSL.
///
/// Accepts the one-line form (`on-success: task2`) as well as a list whose
/// entries are bare task names or single-key `{task: guard}` mappings:
///
/// ```yaml
/// on-complete:
///   - task3
///   - task4: <% ok %>
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClauseDef {
  Single(String),
  List(Vec<ClauseEntryDef>),
}

/// One entry of a transition clause list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClauseEntryDef {
  /// Unconditional transition.
  Name(String),
  /// Guarded transition; must hold exactly one key.
  Guarded(Map<String, Value>),
}

impl ClauseDef {
  /// Flatten the shorthand forms into a list of entries.
  pub fn entries(&self) -> Vec<ClauseEntryDef> {
    match self {
      ClauseDef::Single(name) => vec![ClauseEntryDef::Name(name.clone())],
      ClauseDef::List(entries) => entries.clone(),
    }
  }
}
