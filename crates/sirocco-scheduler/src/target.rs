//! Call targets and the registry the scheduler resolves them from.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::SchedulerError;

/// Decoded arguments handed to a target, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArguments(Map<String, Value>);

impl CallArguments {
  pub fn new() -> Self {
    Self::default()
  }

  /// Serialize `value` and store it under `name`.
  pub fn insert<T: Serialize>(&mut self, name: &str, value: &T) -> Result<(), SchedulerError> {
    let value = serde_json::to_value(value).map_err(|e| SchedulerError::Serialization {
      argument: name.to_string(),
      message: e.to_string(),
    })?;
    self.0.insert(name.to_string(), value);
    Ok(())
  }

  /// Builder form of [`CallArguments::insert`] for plain JSON values.
  pub fn with(mut self, name: &str, value: Value) -> Self {
    self.0.insert(name.to_string(), value);
    self
  }

  /// Deserialize the argument `name` into `T`.
  pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, SchedulerError> {
    let value = self.0.get(name).ok_or_else(|| SchedulerError::Serialization {
      argument: name.to_string(),
      message: "missing argument".to_string(),
    })?;
    serde_json::from_value(value.clone()).map_err(|e| SchedulerError::Serialization {
      argument: name.to_string(),
      message: e.to_string(),
    })
  }

  pub fn get_value(&self, name: &str) -> Option<&Value> {
    self.0.get(name)
  }

  pub fn as_map(&self) -> &Map<String, Value> {
    &self.0
  }

  pub fn into_map(self) -> Map<String, Value> {
    self.0
  }
}

impl From<Map<String, Value>> for CallArguments {
  fn from(map: Map<String, Value>) -> Self {
    Self(map)
  }
}

/// A free function the scheduler can invoke.
#[async_trait]
pub trait CallTarget: Send + Sync {
  async fn call(&self, args: CallArguments) -> Result<(), SchedulerError>;
}

/// An object whose methods are invoked by name.
#[async_trait]
pub trait MethodTarget: Send + Sync {
  async fn call_method(&self, method: &str, args: CallArguments) -> Result<(), SchedulerError>;
}

/// Produces the object a factory-bound call is invoked on.
///
/// A fresh object is requested for every invocation.
pub trait TargetFactory: Send + Sync {
  fn create(&self) -> Result<Arc<dyn MethodTarget>, SchedulerError>;
}

struct FnTarget<F>(F);

#[async_trait]
impl<F, Fut> CallTarget for FnTarget<F>
where
  F: Fn(CallArguments) -> Fut + Send + Sync,
  Fut: Future<Output = Result<(), SchedulerError>> + Send,
{
  async fn call(&self, args: CallArguments) -> Result<(), SchedulerError> {
    (self.0)(args).await
  }
}

/// Wrap an async closure as a [`CallTarget`].
pub fn target_fn<F, Fut>(f: F) -> Arc<dyn CallTarget>
where
  F: Fn(CallArguments) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<(), SchedulerError>> + Send + 'static,
{
  Arc::new(FnTarget(f))
}

/// Named call targets and factories.
///
/// Registration may happen after the scheduler is shared, so the maps sit
/// behind locks. Lookups clone the `Arc` and release the lock before any
/// target runs.
#[derive(Default)]
pub struct TargetRegistry {
  functions: RwLock<HashMap<String, Arc<dyn CallTarget>>>,
  factories: RwLock<HashMap<String, Arc<dyn TargetFactory>>>,
}

impl TargetRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a free function under `name`, replacing any previous one.
  pub fn register_function(&self, name: impl Into<String>, target: Arc<dyn CallTarget>) {
    self
      .functions
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(name.into(), target);
  }

  /// Register a factory under `path`, replacing any previous one.
  pub fn register_factory(&self, path: impl Into<String>, factory: Arc<dyn TargetFactory>) {
    self
      .factories
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(path.into(), factory);
  }

  pub fn function(&self, name: &str) -> Result<Arc<dyn CallTarget>, SchedulerError> {
    self
      .functions
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(name)
      .cloned()
      .ok_or_else(|| SchedulerError::UnknownTarget(name.to_string()))
  }

  pub fn factory(&self, path: &str) -> Result<Arc<dyn TargetFactory>, SchedulerError> {
    self
      .factories
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(path)
      .cloned()
      .ok_or_else(|| SchedulerError::UnknownTarget(path.to_string()))
  }
}
