//! Sirocco Config
//!
//! This crate contains the serializable workflow definition types for sirocco.
//! These types mirror the DSL shape exactly (kebab-case keys, shorthand forms)
//! and reject unknown keys, so a typo in a definition fails loudly instead of
//! being dropped.
//!
//! Definitions can be loaded from:
//! - YAML documents (the usual authoring format, see [`WorkflowListDef`])
//! - JSON blobs stored alongside executions
//!
//! `sirocco-workflow` takes these types, validates them and builds the
//! immutable `WorkflowSpec` used by the engine.

mod clause;
mod input;
mod task;
mod workflow;

pub use clause::{ClauseDef, ClauseEntryDef};
pub use input::InputEntryDef;
pub use task::{RequiresDef, RetryDef, TaskDef, TaskDefaultsDef, WithItemsDef};
pub use workflow::{WorkflowDef, WorkflowListDef, WorkflowType};
