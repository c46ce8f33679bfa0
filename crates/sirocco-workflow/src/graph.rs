use sirocco_config::WorkflowType;

use crate::error::{Location, SpecError};
use crate::spec::WorkflowSpec;
use crate::task::{ClauseKind, TaskSpec, TransitionClause};

/// Transition graph of a direct workflow.
///
/// Effective clauses and adjacency are computed once; all queries are reads.
#[derive(Debug, Clone)]
pub struct DirectGraph<'a> {
  spec: &'a WorkflowSpec,
  /// Per task (declaration order): effective on-success, on-error, on-complete.
  clauses: Vec<[TransitionClause; 3]>,
  /// Adjacency list: task index -> downstream task indices.
  adjacency: Vec<Vec<usize>>,
  /// Reverse adjacency: task index -> upstream task indices.
  reverse_adjacency: Vec<Vec<usize>>,
  /// Tasks with no incoming transitions.
  start_tasks: Vec<usize>,
}

impl<'a> DirectGraph<'a> {
  /// Build the graph for a direct workflow.
  pub fn new(spec: &'a WorkflowSpec) -> Result<Self, SpecError> {
    if spec.workflow_type() != WorkflowType::Direct {
      return Err(SpecError::invalid_model(
        &Location::workflow(spec.name()),
        format!(
          "transition graph requires a direct workflow, got '{}'",
          spec.workflow_type()
        ),
      ));
    }

    let clauses: Vec<[TransitionClause; 3]> = spec
      .tasks()
      .iter()
      .map(|task| ClauseKind::ALL.map(|kind| compute_effective(spec, task, kind)))
      .collect();

    let count = spec.tasks().len();
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut reverse_adjacency: Vec<Vec<usize>> = vec![Vec::new(); count];

    for (from, task_clauses) in clauses.iter().enumerate() {
      for clause in task_clauses {
        for target in clause.targets() {
          if let Some(to) = spec.task_index(target)
            && !adjacency[from].contains(&to)
          {
            adjacency[from].push(to);
            reverse_adjacency[to].push(from);
          }
        }
      }
    }

    // Declaration order for query results
    for list in adjacency.iter_mut().chain(reverse_adjacency.iter_mut()) {
      list.sort_unstable();
    }

    let start_tasks = (0..count)
      .filter(|&i| reverse_adjacency[i].is_empty())
      .collect();

    Ok(Self {
      spec,
      clauses,
      adjacency,
      reverse_adjacency,
      start_tasks,
    })
  }

  pub fn spec(&self) -> &'a WorkflowSpec {
    self.spec
  }

  /// The clause that applies to `task_name`: its own clause when non-empty,
  /// otherwise the task-defaults clause minus transitions to the task itself.
  ///
  /// Unknown tasks get an empty clause.
  pub fn effective_clause(&self, task_name: &str, kind: ClauseKind) -> &TransitionClause {
    static EMPTY: TransitionClause = TransitionClause::empty();

    match self.spec.task_index(task_name) {
      Some(i) => &self.clauses[i][kind.index()],
      None => &EMPTY,
    }
  }

  /// Whether `to` is a target of any of `from`'s effective clauses.
  pub fn transition_exists(&self, from: &str, to: &str) -> bool {
    self
      .spec
      .task_index(from)
      .is_some_and(|i| self.clauses[i].iter().any(|c| c.contains_target(to)))
  }

  /// Tasks with a transition into `task_name`, in declaration order.
  pub fn find_inbound_task_specs(&self, task_name: &str) -> Vec<&'a TaskSpec> {
    self.related(task_name, &self.reverse_adjacency)
  }

  /// Tasks `task_name` transitions to, in declaration order.
  pub fn find_outbound_task_specs(&self, task_name: &str) -> Vec<&'a TaskSpec> {
    self.related(task_name, &self.adjacency)
  }

  pub fn has_inbound_transitions(&self, task_name: &str) -> bool {
    self
      .spec
      .task_index(task_name)
      .is_some_and(|i| !self.reverse_adjacency[i].is_empty())
  }

  pub fn has_outbound_transitions(&self, task_name: &str) -> bool {
    self
      .spec
      .task_index(task_name)
      .is_some_and(|i| !self.adjacency[i].is_empty())
  }

  /// Tasks with no inbound transitions, in declaration order.
  pub fn find_start_tasks(&self) -> Vec<&'a TaskSpec> {
    let tasks = self.spec.tasks();
    self.start_tasks.iter().map(|&i| &tasks[i]).collect()
  }

  fn related(&self, task_name: &str, lists: &[Vec<usize>]) -> Vec<&'a TaskSpec> {
    let tasks = self.spec.tasks();
    self
      .spec
      .task_index(task_name)
      .map(|i| lists[i].iter().map(|&j| &tasks[j]).collect())
      .unwrap_or_default()
  }
}

fn compute_effective(spec: &WorkflowSpec, task: &TaskSpec, kind: ClauseKind) -> TransitionClause {
  match task.clause(kind) {
    Some(own) if !own.is_empty() => own.clone(),
    _ => spec
      .task_defaults()
      .clause(kind)
      .without_target(&task.name),
  }
}

/// Structural checks that need the whole workflow.
///
/// Direct workflows need at least one start task. Reverse workflows have no
/// further checks.
pub fn validate_semantics(spec: &WorkflowSpec) -> Result<(), SpecError> {
  match spec.workflow_type() {
    WorkflowType::Direct => {
      let graph = DirectGraph::new(spec)?;
      if graph.find_start_tasks().is_empty() {
        return Err(SpecError::dsl_parsing(
          &Location::workflow(spec.name()),
          "Failed to find start tasks in direct workflow. \
           There must be at least one task without inbound transition.",
        ));
      }
      Ok(())
    }
    WorkflowType::Reverse => Ok(()),
  }
}
