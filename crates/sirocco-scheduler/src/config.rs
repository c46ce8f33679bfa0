use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What happens to a claimed call whose invocation fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
  /// Delete the call; it is never retried.
  #[default]
  AtMostOnce,
  /// Release the claim so a later poll picks the call up again. Calls that
  /// can never run (unknown target, undecodable arguments) are still deleted.
  AtLeastOnce,
}

/// Configuration for a scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  /// How often due calls are polled.
  pub poll_interval: Duration,
  /// Upper bound on invocations running at the same time.
  pub max_concurrent_calls: usize,
  pub failure_policy: FailurePolicy,
  /// Capture the caller's auth context when scheduling and restore it around
  /// the invocation.
  pub auth_enabled: bool,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_secs(1),
      max_concurrent_calls: 16,
      failure_policy: FailurePolicy::AtMostOnce,
      auth_enabled: false,
    }
  }
}
