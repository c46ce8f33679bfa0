/// Configuration for the workflow engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
  /// Expose the caller's auth context to expressions as `auth`.
  ///
  /// Should match the scheduler's `auth_enabled` so deferred work sees the
  /// same context.
  pub auth_enabled: bool,
}
