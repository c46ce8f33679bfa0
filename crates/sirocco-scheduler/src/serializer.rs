//! Argument serializers.
//!
//! A call may name a serializer for any of its arguments. The value is passed
//! through [`ArgSerializer::serialize`] before it is stored and through
//! [`ArgSerializer::deserialize`] before the target sees it.

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::SchedulerError;

pub trait ArgSerializer: Send + Sync {
  /// Encode an argument for storage.
  fn serialize(&self, value: &Value) -> Result<Value, String>;

  /// Decode a stored argument.
  fn deserialize(&self, stored: &Value) -> Result<Value, String>;
}

/// Checks that an argument is a well formed `T` on both sides of storage.
pub struct TypedSerializer<T>(PhantomData<fn() -> T>);

impl<T> TypedSerializer<T> {
  pub fn new() -> Self {
    Self(PhantomData)
  }
}

impl<T> Default for TypedSerializer<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Serialize + DeserializeOwned> TypedSerializer<T> {
  fn round_trip(value: &Value) -> Result<Value, String> {
    let typed: T = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
    serde_json::to_value(typed).map_err(|e| e.to_string())
  }
}

impl<T: Serialize + DeserializeOwned> ArgSerializer for TypedSerializer<T> {
  fn serialize(&self, value: &Value) -> Result<Value, String> {
    Self::round_trip(value)
  }

  fn deserialize(&self, stored: &Value) -> Result<Value, String> {
    Self::round_trip(stored)
  }
}

/// Serializers keyed by locator.
#[derive(Default)]
pub struct SerializerRegistry {
  serializers: RwLock<HashMap<String, Arc<dyn ArgSerializer>>>,
}

impl SerializerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, locator: impl Into<String>, serializer: Arc<dyn ArgSerializer>) {
    self
      .serializers
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(locator.into(), serializer);
  }

  pub fn get(&self, locator: &str) -> Result<Arc<dyn ArgSerializer>, SchedulerError> {
    self
      .serializers
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(locator)
      .cloned()
      .ok_or_else(|| SchedulerError::UnknownSerializer(locator.to_string()))
  }

  /// Apply `serialize` or `deserialize` to every argument that names a
  /// serializer. An argument named in `serializers` but absent from `args`
  /// is an error.
  pub(crate) fn apply(
    &self,
    serializers: &BTreeMap<String, String>,
    args: &mut Map<String, Value>,
    encode: bool,
  ) -> Result<(), SchedulerError> {
    for (argument, locator) in serializers {
      let serializer = self.get(locator)?;
      let Some(value) = args.get_mut(argument) else {
        return Err(SchedulerError::Serialization {
          argument: argument.clone(),
          message: "missing argument".to_string(),
        });
      };

      let converted = if encode {
        serializer.serialize(value)
      } else {
        serializer.deserialize(value)
      };
      *value = converted.map_err(|message| SchedulerError::Serialization {
        argument: argument.clone(),
        message,
      })?;
    }
    Ok(())
  }
}
