//! Integration tests for spec parsing and the direct-workflow graph.

use serde_json::{Value, json};
use sirocco_expr::MinijinjaEvaluator;
use sirocco_workflow::{
  ClauseKind, DirectGraph, SpecError, WorkflowSpec, WorkflowType, parse, parse_workflow_list,
};

fn parse_json(raw: Value) -> Result<WorkflowSpec, SpecError> {
  parse(&raw, &MinijinjaEvaluator::new())
}

fn names(tasks: Vec<&sirocco_workflow::TaskSpec>) -> Vec<&str> {
  tasks.into_iter().map(|t| t.name.as_str()).collect()
}

/// task-defaults route errors to `cleanup` and `task2` and successes to
/// `task3`; tasks override some clauses.
fn defaults_fixture() -> Value {
  json!({
    "name": "wf",
    "task-defaults": {
      "on-error": ["cleanup", "task2"],
      "on-success": ["task3"]
    },
    "tasks": {
      "task1": {
        "action": "std.noop",
        "on-success": "task2"
      },
      "task2": { "action": "std.noop" },
      "task3": {
        "action": "std.noop",
        "on-complete": ["succeed"]
      },
      "cleanup": { "action": "std.noop", "on-success": "fail" }
    }
  })
}

#[test]
fn test_start_tasks_have_no_inbound() {
  let fixtures = vec![
    defaults_fixture(),
    json!({
      "name": "linear",
      "tasks": {
        "a": { "on-success": "b" },
        "b": { "on-complete": ["c"] },
        "c": {}
      }
    }),
    json!({
      "name": "fan_in",
      "tasks": {
        "a": { "on-success": "join" },
        "b": { "on-error": "join" },
        "join": { "on-success": "fail" }
      }
    }),
  ];

  for raw in fixtures {
    let spec = parse_json(raw).unwrap();
    let graph = DirectGraph::new(&spec).unwrap();
    let start = graph.find_start_tasks();

    assert!(!start.is_empty(), "no start tasks for {}", spec.name());
    for task in start {
      assert!(graph.find_inbound_task_specs(&task.name).is_empty());
      assert!(!graph.has_inbound_transitions(&task.name));
    }
  }
}

#[test]
fn test_self_reference_removed_from_defaults() {
  let spec = parse_json(defaults_fixture()).unwrap();
  let graph = DirectGraph::new(&spec).unwrap();

  let targets = |task: &str, kind: ClauseKind| -> Vec<String> {
    graph
      .effective_clause(task, kind)
      .targets()
      .map(str::to_string)
      .collect()
  };

  // Inherited unchanged
  assert_eq!(targets("task1", ClauseKind::OnError), vec!["cleanup", "task2"]);
  // Inherited minus the task itself, others untouched
  assert_eq!(targets("task2", ClauseKind::OnError), vec!["cleanup"]);
  assert_eq!(targets("cleanup", ClauseKind::OnError), vec!["task2"]);
  assert!(targets("task3", ClauseKind::OnSuccess).is_empty());
  // Own clause wins over the default
  assert_eq!(targets("task1", ClauseKind::OnSuccess), vec!["task2"]);
  // Unknown task
  assert!(targets("nope", ClauseKind::OnSuccess).is_empty());

  // Materialized: can be traversed more than once
  let clause = graph.effective_clause("task1", ClauseKind::OnError);
  assert_eq!(clause.iter().count(), 2);
  assert_eq!(clause.iter().count(), 2);
}

#[test]
fn test_transition_exists_own_default_and_mixed() {
  let spec = parse_json(defaults_fixture()).unwrap();
  let graph = DirectGraph::new(&spec).unwrap();

  // Own on-success
  assert!(graph.transition_exists("task1", "task2"));
  // Own on-success hides the default one
  assert!(!graph.transition_exists("task1", "task3"));
  // Default on-success
  assert!(graph.transition_exists("task2", "task3"));
  // Default on-error, self filtered
  assert!(graph.transition_exists("task1", "cleanup"));
  assert!(!graph.transition_exists("task2", "task2"));
  // Mixed: own on-complete plus default on-error
  assert!(graph.transition_exists("task3", "succeed"));
  assert!(graph.transition_exists("task3", "cleanup"));
  assert!(graph.transition_exists("task3", "task2"));
  // Unknown tasks
  assert!(!graph.transition_exists("nope", "task1"));
  assert!(!graph.transition_exists("task2", "nope"));

  let all = ["task1", "task2", "task3", "cleanup", "succeed", "fail"];
  for from in all {
    for to in all {
      let expected = ClauseKind::ALL
        .iter()
        .any(|&kind| graph.effective_clause(from, kind).contains_target(to));
      assert_eq!(graph.transition_exists(from, to), expected, "{} -> {}", from, to);
    }
  }
}

#[test]
fn test_inbound_and_outbound_in_declaration_order() {
  let spec = parse_json(defaults_fixture()).unwrap();
  let graph = DirectGraph::new(&spec).unwrap();

  assert_eq!(
    names(graph.find_outbound_task_specs("task1")),
    vec!["task2", "cleanup"]
  );
  assert_eq!(
    names(graph.find_inbound_task_specs("task2")),
    vec!["task1", "task3", "cleanup"]
  );
  assert_eq!(
    names(graph.find_inbound_task_specs("cleanup")),
    vec!["task1", "task2", "task3"]
  );
  assert_eq!(names(graph.find_start_tasks()), vec!["task1"]);
  // Sentinels never count as outbound tasks
  assert_eq!(names(graph.find_outbound_task_specs("cleanup")), vec!["task2"]);
  assert!(graph.find_outbound_task_specs("unknown").is_empty());
}

#[test]
fn test_single_task_without_transitions() {
  let spec = parse_json(json!({
    "name": "single",
    "tasks": { "only": { "action": "std.noop" } }
  }))
  .unwrap();
  let graph = DirectGraph::new(&spec).unwrap();

  for kind in ClauseKind::ALL {
    assert!(graph.effective_clause("only", kind).is_empty());
  }
  assert_eq!(names(graph.find_start_tasks()), vec!["only"]);
}

#[test]
fn test_zero_tasks_is_invalid_model() {
  let err = parse_json(json!({ "name": "empty", "tasks": {} })).unwrap_err();
  assert!(matches!(err, SpecError::InvalidModel { .. }));
  assert_eq!(err.location().workflow.as_deref(), Some("empty"));

  let err = parse_json(json!({ "name": "missing" })).unwrap_err();
  assert!(matches!(err, SpecError::InvalidModel { .. }));
}

#[test]
fn test_cycle_without_entry_is_dsl_error() {
  let err = parse_json(json!({
    "name": "cycle",
    "tasks": {
      "a": { "on-success": "b" },
      "b": { "on-complete": ["c"] },
      "c": { "on-error": ["a"] }
    }
  }))
  .unwrap_err();

  match err {
    SpecError::DslParsing { message, .. } => {
      assert!(message.contains("Failed to find start tasks"));
    }
    other => panic!("expected DslParsing, got {:?}", other),
  }
}

#[test]
fn test_bad_output_expression_is_dsl_error() {
  let err = parse_json(json!({
    "name": "wf",
    "output": { "result": "<% 1 + %>" },
    "tasks": { "t": {} }
  }))
  .unwrap_err();
  assert!(matches!(err, SpecError::DslParsing { .. }));

  let err = parse_json(json!({
    "name": "wf",
    "tasks": {
      "t": { "action": "std.noop", "on-success": [{ "t2": "<% ( %>" }] },
      "t2": {}
    }
  }))
  .unwrap_err();
  assert!(matches!(err, SpecError::DslParsing { .. }));
  assert_eq!(err.location().task.as_deref(), Some("t"));
}

#[test]
fn test_unknown_targets_are_accepted() {
  let spec = parse_json(json!({
    "name": "wf",
    "tasks": { "t": { "on-success": "not_defined_yet" } }
  }))
  .unwrap();
  let graph = DirectGraph::new(&spec).unwrap();

  assert!(graph.transition_exists("t", "not_defined_yet"));
  assert!(!graph.has_outbound_transitions("t"));
}

#[test]
fn test_reverse_workflow() {
  let spec = parse_json(json!({
    "name": "rev",
    "type": "reverse",
    "tasks": {
      "a": {},
      "b": { "requires": "a" },
      "c": { "requires": ["a", "b"] }
    }
  }))
  .unwrap();

  assert_eq!(spec.workflow_type(), WorkflowType::Reverse);
  assert_eq!(spec.get_task("c").unwrap().requires(), ["a", "b"]);
  assert!(DirectGraph::new(&spec).is_err());

  let err = parse_json(json!({
    "name": "rev",
    "type": "reverse",
    "tasks": { "a": { "on-success": "b" }, "b": {} }
  }))
  .unwrap_err();
  assert!(matches!(err, SpecError::InvalidModel { .. }));

  let err = parse_json(json!({
    "name": "direct",
    "tasks": { "a": { "requires": "b" }, "b": {} }
  }))
  .unwrap_err();
  assert!(matches!(err, SpecError::InvalidModel { .. }));
}

#[test]
fn test_parse_workflow_list() {
  let text = r#"
version: '2.0'

wf1:
  description: First
  tags: [a, b]
  input:
    - name
  output:
    greeting: <% greeting %>
  tasks:
    hello:
      action: std.echo output="Hello, <% name %>"
      publish:
        greeting: <% hello %>

wf2:
  type: reverse
  tasks:
    only:
      action: std.noop
"#;

  let specs = parse_workflow_list(text, &MinijinjaEvaluator::new()).unwrap();
  assert_eq!(specs.len(), 2);
  assert_eq!(specs[0].name(), "wf1");
  assert_eq!(specs[0].description(), Some("First"));
  assert_eq!(specs[0].tags(), ["a", "b"]);
  assert_eq!(specs[0].input_signature(), "name");
  assert_eq!(specs[1].workflow_type(), WorkflowType::Reverse);
  assert_eq!(specs[0].raw()["name"], "wf1");
}
