use std::time::Duration;

use serde_json::{Map, Value};

/// Targets with a built-in meaning in transition clauses.
///
/// They are never resolved as task names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
  /// Complete the workflow successfully.
  Succeed,
  /// Fail the workflow.
  Fail,
  /// Pause the workflow.
  Pause,
  /// Do nothing.
  Noop,
}

impl Sentinel {
  pub fn from_name(name: &str) -> Option<Self> {
    match name {
      "succeed" => Some(Sentinel::Succeed),
      "fail" => Some(Sentinel::Fail),
      "pause" => Some(Sentinel::Pause),
      "noop" => Some(Sentinel::Noop),
      _ => None,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      Sentinel::Succeed => "succeed",
      Sentinel::Fail => "fail",
      Sentinel::Pause => "pause",
      Sentinel::Noop => "noop",
    }
  }
}

/// Which transition clause of a direct task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseKind {
  OnSuccess,
  OnError,
  OnComplete,
}

impl ClauseKind {
  pub const ALL: [ClauseKind; 3] = [
    ClauseKind::OnSuccess,
    ClauseKind::OnError,
    ClauseKind::OnComplete,
  ];

  /// DSL key of the clause.
  pub fn key(&self) -> &'static str {
    match self {
      ClauseKind::OnSuccess => "on-success",
      ClauseKind::OnError => "on-error",
      ClauseKind::OnComplete => "on-complete",
    }
  }

  pub(crate) fn index(&self) -> usize {
    match self {
      ClauseKind::OnSuccess => 0,
      ClauseKind::OnError => 1,
      ClauseKind::OnComplete => 2,
    }
  }
}

/// One `(target, guard)` pair of a clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
  pub target: String,
  /// Expression that must be truthy for the transition to fire.
  pub guard: Option<String>,
}

impl Transition {
  pub fn sentinel(&self) -> Option<Sentinel> {
    Sentinel::from_name(&self.target)
  }
}

/// Ordered transitions of one clause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionClause(Vec<Transition>);

impl TransitionClause {
  pub fn new(transitions: Vec<Transition>) -> Self {
    Self(transitions)
  }

  pub const fn empty() -> Self {
    Self(Vec::new())
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Transition> {
    self.0.iter()
  }

  pub fn targets(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(|t| t.target.as_str())
  }

  pub fn contains_target(&self, target: &str) -> bool {
    self.targets().any(|t| t == target)
  }

  /// Copy of this clause without transitions pointing at `target`.
  pub fn without_target(&self, target: &str) -> Self {
    Self(
      self
        .0
        .iter()
        .filter(|t| t.target != target)
        .cloned()
        .collect(),
    )
  }
}

impl<'a> IntoIterator for &'a TransitionClause {
  type Item = &'a Transition;
  type IntoIter = std::slice::Iter<'a, Transition>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.iter()
  }
}

/// Retry policy of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Additional attempts after the first failure.
  pub count: u32,
  pub delay: Duration,
}

/// What a task runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTarget {
  Action { name: String },
  Workflow { name: String },
  /// No action or workflow; completes immediately.
  Noop,
}

/// Runs a task's action once per item.
#[derive(Debug, Clone, PartialEq)]
pub struct WithItems {
  /// Variable name to the expression (or literal list) it iterates over.
  /// All lists must be equally long; item `i` binds every variable to its
  /// `i`-th element.
  pub items: Map<String, Value>,
  /// Items running at the same time; `None` runs them all at once.
  pub concurrency: Option<usize>,
}

/// Clauses shared by all tasks of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDefaults {
  clauses: [TransitionClause; 3],
  pub retry: Option<RetryPolicy>,
}

impl TaskDefaults {
  pub fn new(
    on_success: TransitionClause,
    on_error: TransitionClause,
    on_complete: TransitionClause,
    retry: Option<RetryPolicy>,
  ) -> Self {
    Self {
      clauses: [on_success, on_error, on_complete],
      retry,
    }
  }

  pub fn clause(&self, kind: ClauseKind) -> &TransitionClause {
    &self.clauses[kind.index()]
  }
}

/// Variant-specific part of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
  Direct {
    on_success: TransitionClause,
    on_error: TransitionClause,
    on_complete: TransitionClause,
  },
  Reverse {
    requires: Vec<String>,
  },
}

/// A validated task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
  pub name: String,
  pub description: Option<String>,
  pub target: TaskTarget,
  /// Argument expressions, inline action parameters included.
  pub input: Map<String, Value>,
  pub publish: Map<String, Value>,
  /// Own retry policy, falling back to the workflow's task defaults.
  pub retry: Option<RetryPolicy>,
  pub keep_result: bool,
  pub with_items: Option<WithItems>,
  pub kind: TaskKind,
}

impl TaskSpec {
  /// The task's own clause; `None` for reverse tasks.
  pub fn clause(&self, kind: ClauseKind) -> Option<&TransitionClause> {
    match &self.kind {
      TaskKind::Direct {
        on_success,
        on_error,
        on_complete,
      } => Some(match kind {
        ClauseKind::OnSuccess => on_success,
        ClauseKind::OnError => on_error,
        ClauseKind::OnComplete => on_complete,
      }),
      TaskKind::Reverse { .. } => None,
    }
  }

  pub fn requires(&self) -> &[String] {
    match &self.kind {
      TaskKind::Reverse { requires } => requires,
      TaskKind::Direct { .. } => &[],
    }
  }

  pub fn action_name(&self) -> Option<&str> {
    match &self.target {
      TaskTarget::Action { name } => Some(name),
      _ => None,
    }
  }

  pub fn workflow_name(&self) -> Option<&str> {
    match &self.target {
      TaskTarget::Workflow { name } => Some(name),
      _ => None,
    }
  }
}
