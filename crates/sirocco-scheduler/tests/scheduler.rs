//! Scheduler integration tests over the SQLite and in-memory stores.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sirocco_scheduler::{
  CallArguments, FailurePolicy, MethodTarget, Scheduler, SchedulerConfig, SchedulerError,
  TargetFactory, TypedSerializer, auth, target_fn,
};
use sirocco_store::{
  DefinitionWrite, DelayedCall, Error, MemoryStore, SqliteStore, Store, TaskExecution,
  WorkflowDefinition, WorkflowExecution,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

async fn sqlite_store() -> Arc<dyn Store> {
  let store = SqliteStore::in_memory().await.expect("failed to open sqlite");
  store.migrate().await.expect("failed to migrate");
  Arc::new(store)
}

fn scheduler(store: Arc<dyn Store>, config: SchedulerConfig) -> Arc<Scheduler> {
  Arc::new(Scheduler::new(store, config))
}

/// Register a free function `record` that forwards its arguments.
fn record_calls(scheduler: &Scheduler) -> mpsc::UnboundedReceiver<CallArguments> {
  let (tx, rx) = mpsc::unbounded_channel();
  scheduler.targets().register_function(
    "record",
    target_fn(move |args| {
      let tx = tx.clone();
      async move {
        let _ = tx.send(args);
        Ok(())
      }
    }),
  );
  rx
}

fn counting_target(scheduler: &Scheduler, name: &str, counter: Arc<AtomicUsize>) {
  scheduler.targets().register_function(
    name,
    target_fn(move |_| {
      let counter = Arc::clone(&counter);
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }
    }),
  );
}

fn failing_target(scheduler: &Scheduler) {
  scheduler.targets().register_function(
    "explode",
    target_fn(|_| async { Err(SchedulerError::Invocation("boom".to_string())) }),
  );
}

async fn join_all(handles: Vec<tokio::task::JoinHandle<()>>) {
  for handle in handles {
    handle.await.expect("invocation panicked");
  }
}

async fn check_due_call_invoked(store: Arc<dyn Store>) {
  let scheduler = scheduler(Arc::clone(&store), SchedulerConfig::default());
  let mut calls = record_calls(&scheduler);

  let args = CallArguments::new()
    .with("name", json!("task1"))
    .with("items", json!([1, 2, 3]));
  let call = scheduler
    .schedule_call(None, "record", Duration::from_secs(1), BTreeMap::new(), args.clone())
    .await
    .unwrap();
  assert!(!call.processing);

  // Not due yet
  let handles = scheduler.poll_once().await.unwrap();
  assert!(handles.is_empty());

  let handles = scheduler
    .poll_until(Utc::now() + chrono::Duration::seconds(2))
    .await
    .unwrap();
  assert_eq!(handles.len(), 1);
  join_all(handles).await;

  assert_eq!(calls.recv().await.unwrap(), args);
  assert!(matches!(
    store.get_delayed_call(&call.id).await,
    Err(Error::NotFound(_))
  ));
}

#[tokio::test]
async fn test_sqlite_due_call_invoked() {
  check_due_call_invoked(sqlite_store().await).await;
}

#[tokio::test]
async fn test_memory_due_call_invoked() {
  check_due_call_invoked(Arc::new(MemoryStore::new())).await;
}

struct Recorder {
  calls: Arc<AtomicUsize>,
  received: mpsc::UnboundedSender<(String, CallArguments)>,
}

#[async_trait]
impl MethodTarget for Recorder {
  async fn call_method(&self, method: &str, args: CallArguments) -> Result<(), SchedulerError> {
    match method {
      "run_method" => {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.received.send((method.to_string(), args));
        Ok(())
      }
      other => Err(SchedulerError::UnknownMethod {
        target: "recorder".to_string(),
        method: other.to_string(),
      }),
    }
  }
}

struct RecorderFactory {
  created: Arc<AtomicUsize>,
  calls: Arc<AtomicUsize>,
  received: mpsc::UnboundedSender<(String, CallArguments)>,
}

impl TargetFactory for RecorderFactory {
  fn create(&self) -> Result<Arc<dyn MethodTarget>, SchedulerError> {
    self.created.fetch_add(1, Ordering::SeqCst);
    Ok(Arc::new(Recorder {
      calls: Arc::clone(&self.calls),
      received: self.received.clone(),
    }))
  }
}

#[tokio::test]
async fn test_factory_method_invoked_once() {
  let store = sqlite_store().await;
  let scheduler = scheduler(Arc::clone(&store), SchedulerConfig::default());

  let created = Arc::new(AtomicUsize::new(0));
  let calls = Arc::new(AtomicUsize::new(0));
  let (tx, mut rx) = mpsc::unbounded_channel();
  scheduler.targets().register_factory(
    "recorder_factory",
    Arc::new(RecorderFactory {
      created: Arc::clone(&created),
      calls: Arc::clone(&calls),
      received: tx,
    }),
  );

  let args = CallArguments::new().with("name", json!("task"));
  let call = scheduler
    .schedule_call(
      Some("recorder_factory"),
      "run_method",
      Duration::ZERO,
      BTreeMap::new(),
      args.clone(),
    )
    .await
    .unwrap();
  assert_eq!(call.factory_method_path.as_deref(), Some("recorder_factory"));

  join_all(scheduler.poll_once().await.unwrap()).await;

  assert_eq!(created.load(Ordering::SeqCst), 1);
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert_eq!(rx.recv().await.unwrap(), ("run_method".to_string(), args));

  // A method the object doesn't have fails like any other invocation
  let call = scheduler
    .schedule_call(
      Some("recorder_factory"),
      "missing",
      Duration::ZERO,
      BTreeMap::new(),
      CallArguments::new(),
    )
    .await
    .unwrap();
  join_all(scheduler.poll_once().await.unwrap()).await;
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert!(matches!(
    store.get_delayed_call(&call.id).await,
    Err(Error::NotFound(_))
  ));
}

#[derive(Debug, Serialize, Deserialize)]
struct Outcome {
  data: Value,
  error: Option<String>,
}

#[tokio::test]
async fn test_serialized_arguments_round_trip() {
  let store = sqlite_store().await;
  let scheduler = scheduler(Arc::clone(&store), SchedulerConfig::default());
  scheduler
    .serializers()
    .register("test::Outcome", Arc::new(TypedSerializer::<Outcome>::new()));
  let mut calls = record_calls(&scheduler);

  let mut args = CallArguments::new();
  args.insert("task_ex_id", &"123").unwrap();
  args
    .insert("result", &Outcome { data: json!({ "x": 1 }), error: None })
    .unwrap();

  let mut serializers = BTreeMap::new();
  serializers.insert("result".to_string(), "test::Outcome".to_string());

  let call = scheduler
    .schedule_call(None, "record", Duration::ZERO, serializers.clone(), args)
    .await
    .unwrap();

  let stored = store.get_delayed_call(&call.id).await.unwrap();
  assert_eq!(stored.serializers, serializers);
  assert_eq!(
    stored.method_arguments["result"],
    json!({ "data": { "x": 1 }, "error": null })
  );

  join_all(scheduler.poll_once().await.unwrap()).await;

  let received = calls.recv().await.unwrap();
  assert_eq!(received.get::<String>("task_ex_id").unwrap(), "123");
  let outcome: Outcome = received.get("result").unwrap();
  assert_eq!(outcome.data, json!({ "x": 1 }));
  assert!(outcome.error.is_none());
}

#[tokio::test]
async fn test_unknown_serializer_rejected() {
  let store = sqlite_store().await;
  let scheduler = scheduler(Arc::clone(&store), SchedulerConfig::default());

  let mut serializers = BTreeMap::new();
  serializers.insert("result".to_string(), "nope".to_string());

  let err = scheduler
    .schedule_call(
      None,
      "record",
      Duration::ZERO,
      serializers,
      CallArguments::new().with("result", json!(1)),
    )
    .await
    .unwrap_err();
  assert!(matches!(err, SchedulerError::UnknownSerializer(_)));
  assert!(
    store
      .get_delayed_calls_to_start(Utc::now())
      .await
      .unwrap()
      .is_empty()
  );
}

#[tokio::test]
async fn test_two_schedulers_invoke_once() {
  let store = sqlite_store().await;
  let counter = Arc::new(AtomicUsize::new(0));

  let first = scheduler(Arc::clone(&store), SchedulerConfig::default());
  let second = scheduler(Arc::clone(&store), SchedulerConfig::default());
  counting_target(&first, "count", Arc::clone(&counter));
  counting_target(&second, "count", Arc::clone(&counter));

  first
    .schedule_call(None, "count", Duration::ZERO, BTreeMap::new(), CallArguments::new())
    .await
    .unwrap();

  let (a, b) = tokio::join!(first.poll_once(), second.poll_once());
  let a = a.unwrap();
  let b = b.unwrap();
  assert_eq!(a.len() + b.len(), 1);

  join_all(a).await;
  join_all(b).await;
  assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_claims_have_one_winner() {
  let store = sqlite_store().await;
  let scheduler = scheduler(Arc::clone(&store), SchedulerConfig::default());
  let call = scheduler
    .schedule_call(None, "count", Duration::ZERO, BTreeMap::new(), CallArguments::new())
    .await
    .unwrap();

  let (a, b) = tokio::join!(
    store.update_delayed_call(&call.id, true, false),
    store.update_delayed_call(&call.id, true, false)
  );
  let (_, a) = a.unwrap();
  let (_, b) = b.unwrap();
  assert_eq!(a + b, 1);

  // Claimed calls are hidden from every later poll
  assert!(
    store
      .get_delayed_calls_to_start(Utc::now() + chrono::Duration::days(1))
      .await
      .unwrap()
      .is_empty()
  );
}

#[tokio::test]
async fn test_failure_at_most_once_deletes_call() {
  let store = sqlite_store().await;
  let scheduler = scheduler(Arc::clone(&store), SchedulerConfig::default());
  failing_target(&scheduler);

  let call = scheduler
    .schedule_call(None, "explode", Duration::ZERO, BTreeMap::new(), CallArguments::new())
    .await
    .unwrap();
  join_all(scheduler.poll_once().await.unwrap()).await;

  assert!(matches!(
    store.get_delayed_call(&call.id).await,
    Err(Error::NotFound(_))
  ));
}

#[tokio::test]
async fn test_failure_at_least_once_releases_claim() {
  let store = sqlite_store().await;
  let config = SchedulerConfig {
    failure_policy: FailurePolicy::AtLeastOnce,
    ..SchedulerConfig::default()
  };
  let scheduler = scheduler(Arc::clone(&store), config);
  failing_target(&scheduler);

  let call = scheduler
    .schedule_call(None, "explode", Duration::ZERO, BTreeMap::new(), CallArguments::new())
    .await
    .unwrap();
  join_all(scheduler.poll_once().await.unwrap()).await;

  let stored = store.get_delayed_call(&call.id).await.unwrap();
  assert!(!stored.processing);

  // Picked up again by the next poll
  let handles = scheduler.poll_once().await.unwrap();
  assert_eq!(handles.len(), 1);
  join_all(handles).await;
}

#[tokio::test]
async fn test_undecodable_call_dropped_at_least_once() {
  let store = sqlite_store().await;
  let config = SchedulerConfig {
    failure_policy: FailurePolicy::AtLeastOnce,
    ..SchedulerConfig::default()
  };
  let scheduler = scheduler(Arc::clone(&store), config);
  scheduler
    .serializers()
    .register("test::Outcome", Arc::new(TypedSerializer::<Outcome>::new()));
  let mut calls = record_calls(&scheduler);

  // A stored argument that no longer matches its serializer
  let mut method_arguments = serde_json::Map::new();
  method_arguments.insert("result".to_string(), json!("not an outcome"));
  let mut serializers = BTreeMap::new();
  serializers.insert("result".to_string(), "test::Outcome".to_string());
  let call = DelayedCall {
    id: "corrupt".to_string(),
    factory_method_path: None,
    target_method_name: "record".to_string(),
    method_arguments,
    serializers,
    auth_context: None,
    execution_time: Utc::now(),
    processing: false,
  };
  store.create_delayed_call(&call).await.unwrap();

  join_all(scheduler.poll_once().await.unwrap()).await;
  assert!(matches!(
    store.get_delayed_call("corrupt").await,
    Err(Error::NotFound(_))
  ));
  assert!(scheduler.poll_once().await.unwrap().is_empty());
  assert!(calls.try_recv().is_err());

  // Unknown targets are dropped the same way
  let call = scheduler
    .schedule_call(None, "nobody", Duration::ZERO, BTreeMap::new(), CallArguments::new())
    .await
    .unwrap();
  join_all(scheduler.poll_once().await.unwrap()).await;
  assert!(matches!(
    store.get_delayed_call(&call.id).await,
    Err(Error::NotFound(_))
  ));
}

#[test]
fn test_permanent_errors() {
  assert!(SchedulerError::UnknownTarget("x".to_string()).is_permanent());
  assert!(
    SchedulerError::Serialization {
      argument: "result".to_string(),
      message: "bad".to_string()
    }
    .is_permanent()
  );
  assert!(!SchedulerError::Invocation("boom".to_string()).is_permanent());
}

#[tokio::test]
async fn test_unknown_target_is_discarded() {
  let store = sqlite_store().await;
  let scheduler = scheduler(Arc::clone(&store), SchedulerConfig::default());

  let call = scheduler
    .schedule_call(None, "nobody", Duration::ZERO, BTreeMap::new(), CallArguments::new())
    .await
    .unwrap();
  join_all(scheduler.poll_once().await.unwrap()).await;

  assert!(matches!(
    store.get_delayed_call(&call.id).await,
    Err(Error::NotFound(_))
  ));
}

#[tokio::test]
async fn test_deleted_call_is_never_invoked() {
  let store = sqlite_store().await;
  let scheduler = scheduler(Arc::clone(&store), SchedulerConfig::default());
  let counter = Arc::new(AtomicUsize::new(0));
  counting_target(&scheduler, "count", Arc::clone(&counter));

  let call = scheduler
    .schedule_call(None, "count", Duration::ZERO, BTreeMap::new(), CallArguments::new())
    .await
    .unwrap();
  scheduler.delete_call(&call.id).await.unwrap();

  assert!(scheduler.poll_once().await.unwrap().is_empty());
  assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_auth_context_restored() {
  let store = sqlite_store().await;
  let config = SchedulerConfig {
    auth_enabled: true,
    ..SchedulerConfig::default()
  };
  let scheduler = scheduler(Arc::clone(&store), config);

  let (tx, mut rx) = mpsc::unbounded_channel();
  scheduler.targets().register_function(
    "whoami",
    target_fn(move |_| {
      let tx = tx.clone();
      async move {
        let _ = tx.send(auth::current());
        Ok(())
      }
    }),
  );

  let ctx = json!({ "user": "admin", "project": "p1" });
  let call = auth::scope(Some(ctx.clone()), async {
    scheduler
      .schedule_call(None, "whoami", Duration::ZERO, BTreeMap::new(), CallArguments::new())
      .await
  })
  .await
  .unwrap();
  assert_eq!(call.auth_context, Some(ctx.clone()));

  join_all(scheduler.poll_once().await.unwrap()).await;
  assert_eq!(rx.recv().await.unwrap(), Some(ctx));
}

#[tokio::test]
async fn test_auth_disabled_stores_no_context() {
  let store = sqlite_store().await;
  let scheduler = scheduler(Arc::clone(&store), SchedulerConfig::default());

  let call = auth::scope(Some(json!({ "user": "admin" })), async {
    scheduler
      .schedule_call(None, "record", Duration::ZERO, BTreeMap::new(), CallArguments::new())
      .await
  })
  .await
  .unwrap();
  assert_eq!(call.auth_context, None);
}

#[tokio::test]
async fn test_poll_loop_runs_until_cancelled() {
  let store = sqlite_store().await;
  let config = SchedulerConfig {
    poll_interval: Duration::from_millis(20),
    ..SchedulerConfig::default()
  };
  let scheduler = scheduler(Arc::clone(&store), config);
  let mut calls = record_calls(&scheduler);

  let cancel = CancellationToken::new();
  let worker = scheduler.start(cancel.clone());

  scheduler
    .schedule_call(
      None,
      "record",
      Duration::from_millis(50),
      BTreeMap::new(),
      CallArguments::new().with("n", json!(1)),
    )
    .await
    .unwrap();

  let received = tokio::time::timeout(Duration::from_secs(5), calls.recv())
    .await
    .expect("call was not invoked")
    .unwrap();
  assert_eq!(received.get::<i64>("n").unwrap(), 1);

  cancel.cancel();
  tokio::time::timeout(Duration::from_secs(5), worker)
    .await
    .expect("scheduler did not stop")
    .unwrap();
}

/// Store that loses every claim, as if another worker always got there first.
struct ContendedStore(MemoryStore);

#[async_trait]
impl Store for ContendedStore {
  async fn write_definitions(
    &self,
    definitions: &[WorkflowDefinition],
    mode: DefinitionWrite,
  ) -> Result<(), Error> {
    self.0.write_definitions(definitions, mode).await
  }

  async fn get_definition(&self, name: &str) -> Result<WorkflowDefinition, Error> {
    self.0.get_definition(name).await
  }

  async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, Error> {
    self.0.list_definitions().await
  }

  async fn delete_definition(&self, name: &str) -> Result<(), Error> {
    self.0.delete_definition(name).await
  }

  async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), Error> {
    self.0.create_execution(execution).await
  }

  async fn get_execution(&self, id: &str) -> Result<WorkflowExecution, Error> {
    self.0.get_execution(id).await
  }

  async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), Error> {
    self.0.update_execution(execution).await
  }

  async fn list_executions(&self, workflow_name: Option<&str>) -> Result<Vec<WorkflowExecution>, Error> {
    self.0.list_executions(workflow_name).await
  }

  async fn create_task_execution(&self, task: &TaskExecution) -> Result<(), Error> {
    self.0.create_task_execution(task).await
  }

  async fn get_task_execution(&self, id: &str) -> Result<TaskExecution, Error> {
    self.0.get_task_execution(id).await
  }

  async fn update_task_execution(&self, task: &TaskExecution) -> Result<(), Error> {
    self.0.update_task_execution(task).await
  }

  async fn list_task_executions(&self, execution_id: &str) -> Result<Vec<TaskExecution>, Error> {
    self.0.list_task_executions(execution_id).await
  }

  async fn create_delayed_call(&self, call: &DelayedCall) -> Result<(), Error> {
    self.0.create_delayed_call(call).await
  }

  async fn get_delayed_call(&self, id: &str) -> Result<DelayedCall, Error> {
    self.0.get_delayed_call(id).await
  }

  async fn get_delayed_calls_to_start(&self, threshold: DateTime<Utc>) -> Result<Vec<DelayedCall>, Error> {
    self.0.get_delayed_calls_to_start(threshold).await
  }

  async fn update_delayed_call(
    &self,
    _id: &str,
    _processing: bool,
    _expected_processing: bool,
  ) -> Result<(Option<DelayedCall>, u64), Error> {
    Ok((None, 0))
  }

  async fn delete_delayed_call(&self, id: &str) -> Result<(), Error> {
    self.0.delete_delayed_call(id).await
  }
}

#[tokio::test]
async fn test_lost_claim_skips_invocation() {
  let store: Arc<dyn Store> = Arc::new(ContendedStore(MemoryStore::new()));
  let scheduler = scheduler(Arc::clone(&store), SchedulerConfig::default());
  let counter = Arc::new(AtomicUsize::new(0));
  counting_target(&scheduler, "count", Arc::clone(&counter));

  let call = scheduler
    .schedule_call(None, "count", Duration::ZERO, BTreeMap::new(), CallArguments::new())
    .await
    .unwrap();

  assert!(scheduler.poll_once().await.unwrap().is_empty());
  assert_eq!(counter.load(Ordering::SeqCst), 0);
  // Left for whoever holds the claim
  assert!(store.get_delayed_call(&call.id).await.is_ok());
}
