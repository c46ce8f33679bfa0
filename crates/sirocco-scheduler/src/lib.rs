//! Sirocco Scheduler
//!
//! A persistent timer for deferred work. Calls are stored through
//! `sirocco-store`, polled when due, claimed with a conditional update and
//! invoked on a bounded pool. Multiple schedulers may share one store; the
//! claim guarantees a call runs at most once per claim.
//!
//! A process crash between claim and delete leaves the call marked as
//! processing. It is never picked up again.

mod config;
mod error;
mod scheduler;
mod serializer;
mod target;

pub mod auth;

pub use config::{FailurePolicy, SchedulerConfig};
pub use error::SchedulerError;
pub use scheduler::Scheduler;
pub use serializer::{ArgSerializer, SerializerRegistry, TypedSerializer};
pub use target::{CallArguments, CallTarget, MethodTarget, TargetFactory, TargetRegistry, target_fn};
