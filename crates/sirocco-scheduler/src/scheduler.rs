//! Poll-claim-invoke scheduler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use sirocco_store::{DelayedCall, Store};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth;
use crate::config::{FailurePolicy, SchedulerConfig};
use crate::serializer::SerializerRegistry;
use crate::target::{CallArguments, TargetRegistry};
use crate::SchedulerError;

/// Persistent delayed-call scheduler.
///
/// Any number of schedulers may share one store. A call is invoked by the
/// scheduler that wins the conditional claim on its `processing` flag.
///
/// # Usage
///
/// ```ignore
/// let scheduler = Arc::new(Scheduler::new(store, SchedulerConfig::default()));
/// scheduler.targets().register_function("notify", target_fn(notify));
///
/// let cancel = CancellationToken::new();
/// let worker = scheduler.start(cancel.clone());
///
/// scheduler
///   .schedule_call(None, "notify", Duration::from_secs(5), BTreeMap::new(), args)
///   .await?;
/// ```
pub struct Scheduler {
  store: Arc<dyn Store>,
  config: SchedulerConfig,
  targets: TargetRegistry,
  serializers: SerializerRegistry,
  permits: Arc<Semaphore>,
}

impl Scheduler {
  pub fn new(store: Arc<dyn Store>, config: SchedulerConfig) -> Self {
    let permits = Arc::new(Semaphore::new(config.max_concurrent_calls.max(1)));
    Self {
      store,
      config,
      targets: TargetRegistry::new(),
      serializers: SerializerRegistry::new(),
      permits,
    }
  }

  pub fn config(&self) -> &SchedulerConfig {
    &self.config
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  pub fn targets(&self) -> &TargetRegistry {
    &self.targets
  }

  pub fn serializers(&self) -> &SerializerRegistry {
    &self.serializers
  }

  /// Persist a call due `delay` from now and return it without waiting.
  ///
  /// With a `factory_method_path` the call invokes `target_method_name` on an
  /// object made by that factory, otherwise `target_method_name` names a free
  /// function. Arguments listed in `serializers` are encoded through the
  /// named serializer before they are stored.
  pub async fn schedule_call(
    &self,
    factory_method_path: Option<&str>,
    target_method_name: &str,
    delay: Duration,
    serializers: BTreeMap<String, String>,
    arguments: CallArguments,
  ) -> Result<DelayedCall, SchedulerError> {
    let delay =
      TimeDelta::from_std(delay).map_err(|e| SchedulerError::InvalidDelay(e.to_string()))?;
    let execution_time = due_time(Utc::now(), delay)
      .ok_or_else(|| SchedulerError::InvalidDelay(format!("{delay} is out of range")))?;

    let mut method_arguments = arguments.into_map();
    self
      .serializers
      .apply(&serializers, &mut method_arguments, true)?;

    let auth_context = if self.config.auth_enabled {
      auth::current()
    } else {
      None
    };

    let call = DelayedCall {
      id: uuid::Uuid::new_v4().to_string(),
      factory_method_path: factory_method_path.map(str::to_string),
      target_method_name: target_method_name.to_string(),
      method_arguments,
      serializers,
      auth_context,
      execution_time,
      processing: false,
    };
    self.store.create_delayed_call(&call).await?;

    debug!(
      call_id = %call.id,
      target = %call.target_method_name,
      execution_time = %call.execution_time,
      "delayed_call_scheduled"
    );
    Ok(call)
  }

  /// Cancel a call that has not been claimed yet.
  pub async fn delete_call(&self, id: &str) -> Result<(), SchedulerError> {
    self.store.delete_delayed_call(id).await?;
    Ok(())
  }

  /// Claim and invoke every call due now.
  pub async fn poll_once(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>, SchedulerError> {
    self.poll_until(Utc::now()).await
  }

  /// Claim every unclaimed call due at `threshold` and spawn its invocation.
  ///
  /// Returns the handles of the spawned invocations. Calls claimed by
  /// another scheduler in the meantime are skipped. Waits for a free slot
  /// when `max_concurrent_calls` invocations are already running.
  pub async fn poll_until(
    self: &Arc<Self>,
    threshold: DateTime<Utc>,
  ) -> Result<Vec<JoinHandle<()>>, SchedulerError> {
    let due = self.store.get_delayed_calls_to_start(threshold).await?;
    let mut handles = Vec::with_capacity(due.len());

    for call in due {
      let (claimed, affected) = match self.store.update_delayed_call(&call.id, true, false).await {
        Ok(result) => result,
        Err(e) => {
          warn!(call_id = %call.id, error = %e, "delayed_call_claim_failed");
          continue;
        }
      };
      if affected == 0 {
        continue;
      }
      let call = claimed.unwrap_or(call);

      let permit = Arc::clone(&self.permits)
        .acquire_owned()
        .await
        .map_err(|e| SchedulerError::Invocation(e.to_string()))?;

      let this = Arc::clone(self);
      handles.push(tokio::spawn(async move {
        let _permit = permit;
        this.run_claimed(call).await;
      }));
    }

    Ok(handles)
  }

  /// Start the poll loop.
  ///
  /// Polls every `poll_interval` until the cancellation token is triggered.
  /// Invocations already spawned keep running after the loop stops.
  pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
    let this = Arc::clone(self);
    tokio::spawn(async move {
      info!(
        poll_interval_ms = this.config.poll_interval.as_millis() as u64,
        max_concurrent_calls = this.config.max_concurrent_calls,
        "scheduler_started"
      );

      let mut interval = tokio::time::interval(this.config.poll_interval);
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        tokio::select! {
          _ = cancel.cancelled() => {
            info!("scheduler_stopped");
            break;
          }
          _ = interval.tick() => {
            if let Err(e) = this.poll_once().await {
              error!(error = %e, "scheduler_poll_failed");
            }
          }
        }
      }
    })
  }

  async fn run_claimed(&self, call: DelayedCall) {
    match self.invoke(&call).await {
      Ok(()) => {
        info!(call_id = %call.id, target = %call.target_method_name, "delayed_call_completed");
        self.discard(&call.id).await;
      }
      Err(e) if e.is_permanent() => {
        error!(
          call_id = %call.id,
          target = %call.target_method_name,
          error = %e,
          "delayed_call_dropped"
        );
        self.discard(&call.id).await;
      }
      Err(e) => {
        error!(
          call_id = %call.id,
          target = %call.target_method_name,
          error = %e,
          "delayed_call_failed"
        );
        match self.config.failure_policy {
          FailurePolicy::AtMostOnce => self.discard(&call.id).await,
          FailurePolicy::AtLeastOnce => {
            if let Err(e) = self.store.update_delayed_call(&call.id, false, true).await {
              error!(call_id = %call.id, error = %e, "delayed_call_release_failed");
            }
          }
        }
      }
    }
  }

  async fn invoke(&self, call: &DelayedCall) -> Result<(), SchedulerError> {
    let mut arguments = call.method_arguments.clone();
    self
      .serializers
      .apply(&call.serializers, &mut arguments, false)?;
    let arguments = CallArguments::from(arguments);

    let run = async {
      match &call.factory_method_path {
        Some(path) => {
          let object = self.targets.factory(path)?.create()?;
          object.call_method(&call.target_method_name, arguments).await
        }
        None => {
          let target = self.targets.function(&call.target_method_name)?;
          target.call(arguments).await
        }
      }
    };

    if self.config.auth_enabled {
      auth::scope(call.auth_context.clone(), run).await
    } else {
      run.await
    }
  }

  async fn discard(&self, id: &str) {
    match self.store.delete_delayed_call(id).await {
      Ok(()) | Err(sirocco_store::Error::NotFound(_)) => {}
      Err(e) => error!(call_id = %id, error = %e, "delayed_call_delete_failed"),
    }
  }
}

/// Execution time of a call scheduled at `now`. Times are stored with
/// millisecond precision, so a delayed call is rounded up to never fire before
/// its delay has passed. Undelayed calls are rounded down to be due at once.
fn due_time(now: DateTime<Utc>, delay: TimeDelta) -> Option<DateTime<Utc>> {
  let millis = TimeDelta::milliseconds(1);
  if delay.is_zero() {
    return Some(now.duration_trunc(millis).unwrap_or(now));
  }
  now.checked_add_signed(delay).map(round_up_to_millis)
}

fn round_up_to_millis(time: DateTime<Utc>) -> DateTime<Utc> {
  let millis = TimeDelta::milliseconds(1);
  let truncated = time.duration_trunc(millis).unwrap_or(time);
  if truncated < time {
    truncated + millis
  } else {
    truncated
  }
}
