//! Sirocco Workflow Engine
//!
//! This crate runs direct workflows on top of `sirocco-store` and
//! `sirocco-scheduler`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowService                        │
//! │  - validates and stores workflow list documents             │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowEngine                         │
//! │  - start / pause / resume / stop executions                 │
//! │  - runs actions, evaluates transitions and data flow        │
//! │  - emits ExecutionEvents through an ExecutionNotifier       │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                            │
//! │  - retries and deferred action results re-enter the engine  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let store: Arc<dyn Store> = Arc::new(SqliteStore::connect(url).await?);
//! let scheduler = Arc::new(Scheduler::new(Arc::clone(&store), SchedulerConfig::default()));
//! let engine = WorkflowEngine::new(Arc::clone(&store), Arc::clone(&scheduler), EngineConfig::default());
//!
//! WorkflowService::new(Arc::clone(&store)).create_workflows(&text).await?;
//! scheduler.start(cancel.clone());
//!
//! let execution = engine.start_workflow("greet", input, Map::new()).await?;
//! ```

mod actions;
mod commands;
mod config;
mod data_flow;
mod definitions;
mod engine;
mod error;
mod events;
mod state;

pub use actions::{
  Action, ActionError, ActionRegistry, ActionResult, RESULT_SERIALIZER, ResultSerializer,
  check_params,
};
pub use commands::{Command, is_error_handled, next_commands};
pub use config::EngineConfig;
pub use definitions::{WorkflowService, WorkflowSummary};
pub use engine::{ENGINE_TARGET, WorkflowEngine};
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use state::{is_valid_task_transition, is_valid_workflow_transition};
