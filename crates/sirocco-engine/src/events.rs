//! Execution events and notifiers for observability.
//!
//! Events are emitted as executions change state so consumers can stream
//! progress, collect audit trails or drive tests.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// A workflow execution has been created and is running.
  WorkflowStarted {
    execution_id: String,
    workflow_name: String,
  },

  /// A task has started running its action or sub-workflow.
  TaskStarted {
    execution_id: String,
    task_execution_id: String,
    task_name: String,
  },

  /// A task has completed successfully.
  TaskCompleted {
    execution_id: String,
    task_execution_id: String,
    task_name: String,
    result: Value,
  },

  /// A task has failed for good.
  TaskFailed {
    execution_id: String,
    task_execution_id: String,
    task_name: String,
    error: String,
  },

  /// A failed task will be retried after a delay.
  TaskRetrying {
    execution_id: String,
    task_execution_id: String,
    task_name: String,
    attempt: i32,
  },

  WorkflowPaused { execution_id: String },

  WorkflowResumed { execution_id: String },

  /// Workflow execution has completed successfully.
  WorkflowCompleted { execution_id: String, output: Value },

  /// Workflow execution has failed.
  WorkflowFailed { execution_id: String, error: String },
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event; implementations decide what to
/// do with them.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls the engine.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
