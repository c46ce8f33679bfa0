//! Sirocco Workflow
//!
//! This crate turns raw workflow definitions (`sirocco-config`) into
//! validated, immutable [`WorkflowSpec`]s and answers transition queries on
//! direct workflows through [`DirectGraph`].
//!
//! Key differences from `sirocco-config`:
//! - Shorthand forms are normalized (clauses, input, inline action parameters)
//! - Expressions are syntax checked
//! - Task variants are closed per workflow type (direct vs reverse)
//! - Direct workflows are guaranteed to have at least one start task

mod action;
mod error;
mod graph;
mod parse;
mod spec;
mod task;

pub use error::{Location, SpecError};
pub use graph::{DirectGraph, validate_semantics};
pub use parse::{parse, parse_workflow_list};
pub use sirocco_config::WorkflowType;
pub use spec::{InputParam, WorkflowSpec};
pub use task::{
  ClauseKind, RetryPolicy, Sentinel, TaskDefaults, TaskKind, TaskSpec, TaskTarget, Transition,
  TransitionClause, WithItems,
};
