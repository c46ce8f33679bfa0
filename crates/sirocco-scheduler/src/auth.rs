//! Task-local auth context.
//!
//! When auth is enabled the scheduler captures [`current`] at scheduling
//! time and restores it with [`scope`] around the invocation, so targets
//! observe the same context as the code that scheduled them.

use std::future::Future;

use serde_json::Value;

tokio::task_local! {
  static AUTH_CONTEXT: Option<Value>;
}

/// The auth context of the running task, if any.
pub fn current() -> Option<Value> {
  AUTH_CONTEXT.try_with(|ctx| ctx.clone()).ok().flatten()
}

/// Run `f` with `ctx` as the current auth context.
pub async fn scope<F: Future>(ctx: Option<Value>, f: F) -> F::Output {
  AUTH_CONTEXT.scope(ctx, f).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_scope_sets_context() {
    assert_eq!(current(), None);

    let seen = scope(Some(json!({ "user": "admin" })), async { current() }).await;
    assert_eq!(seen, Some(json!({ "user": "admin" })));

    assert_eq!(current(), None);
  }
}
