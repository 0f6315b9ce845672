//! Activity traits and invocation context
//!
//! An **activity** is a user-supplied unit of work: synchronous or
//! asynchronous, producing an optional typed result. Activities are
//! instantiated through the [`ServiceContainer`](crate::ServiceContainer)
//! and invoked by the executor with their input properties already resolved
//! from bindings.
//!
//! # Writing an activity
//!
//! ```rust
//! use async_trait::async_trait;
//! use microflow_core::{Activity, ActivityContext, ActivityError};
//! use serde_json::Value;
//!
//! #[derive(Default)]
//! struct Add {
//!     augend: i64,
//!     addend: i64,
//! }
//!
//! #[async_trait]
//! impl Activity for Add {
//!     type Output = i64;
//!
//!     fn required_inputs() -> &'static [&'static str] {
//!         &["Augend", "Addend"]
//!     }
//!
//!     fn set_input(&mut self, property: &str, value: Value) -> Result<(), ActivityError> {
//!         match property {
//!             "Augend" => self.augend = serde_json::from_value(value)?,
//!             "Addend" => self.addend = serde_json::from_value(value)?,
//!             other => return Err(ActivityError::new(format!("unknown input '{other}'"))),
//!         }
//!         Ok(())
//!     }
//!
//!     async fn execute(&mut self, _ctx: &ActivityContext) -> Result<i64, ActivityError> {
//!         Ok(self.augend + self.addend)
//!     }
//! }
//! ```
//!
//! Input metadata is an explicit declaration on the type
//! ([`Activity::required_inputs`]); the builder captures it when the node is
//! created and the validator enforces that every required property has
//! exactly one binding before any run starts.
//!
//! # Fault handlers
//!
//! A fault handler is an ordinary activity that additionally implements
//! [`FaultHandlerActivity`], naming the input property that receives the
//! captured [`FaultInfo`](crate::FaultInfo). Only types implementing this
//! trait may be wired as fault handlers; the validator rejects anything
//! else.
//!
//! # Cancellation
//!
//! Every invocation receives an [`ActivityContext`] carrying a
//! [`CancellationToken`] linked to the run (and, inside a fork-join, to the
//! fork region). Long-running activities should poll or await the token;
//! the engine imposes no timeouts of its own.

use crate::error::ActivityError;
use crate::node::NodeId;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::any::TypeId;
use tokio_util::sync::CancellationToken;

/// Type token identifying an activity type for container resolution.
///
/// Tokens are captured by the builder when a node is created and resolved by
/// the [`ServiceContainer`](crate::ServiceContainer) at invocation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActivityToken {
    type_id: TypeId,
    type_name: &'static str,
}

impl ActivityToken {
    /// Token of an activity type.
    pub fn of<A: Activity>() -> Self {
        Self {
            type_id: TypeId::of::<A>(),
            type_name: std::any::type_name::<A>(),
        }
    }

    /// Full Rust type name, for diagnostics and logging.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }
}

/// Per-invocation context handed to [`Activity::execute`].
#[derive(Debug, Clone)]
pub struct ActivityContext {
    node: NodeId,
    node_name: String,
    token: CancellationToken,
}

impl ActivityContext {
    pub(crate) fn new(node: NodeId, node_name: String, token: CancellationToken) -> Self {
        Self {
            node,
            node_name,
            token,
        }
    }

    /// Node this invocation belongs to.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Name of the node this invocation belongs to.
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Cancellation token linked to the run (and fork region, if any).
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }
}

/// A user-supplied unit of work.
///
/// See the [module docs](self) for a full example. Implementations must be
/// `Send` so background work can run on the worker pool; instances are never
/// shared between tasks (singletons are serialized by the container).
#[async_trait]
pub trait Activity: Send + 'static {
    /// Result type, serialized into the node's result thunk on success.
    /// Use `()` for activities without a meaningful result.
    type Output: Serialize + Send;

    /// Input property names that must have a binding. Enforced by the
    /// validator before any run.
    fn required_inputs() -> &'static [&'static str]
    where
        Self: Sized,
    {
        &[]
    }

    /// Apply one resolved input property. Called once per binding (plus once
    /// for the fault property on handlers) before [`execute`](Self::execute).
    ///
    /// The default implementation rejects every property; activities with
    /// inputs override it.
    fn set_input(&mut self, property: &str, value: Value) -> Result<(), ActivityError> {
        let _ = value;
        Err(ActivityError::unknown_property(property))
    }

    /// Perform the work. Runs after all inputs have been applied.
    async fn execute(&mut self, ctx: &ActivityContext) -> Result<Self::Output, ActivityError>;
}

/// Capability trait for activities usable as fault handlers.
///
/// The executor assigns the captured [`FaultInfo`](crate::FaultInfo)
/// (serialized) to [`fault_input`](Self::fault_input) before the handler
/// runs. Handlers execute as ordinary activities, but their own faults are
/// never re-dispatched: a failure inside a handler terminates the run with
/// [`RunError::HandlerFailed`](crate::RunError::HandlerFailed).
pub trait FaultHandlerActivity: Activity {
    /// Name of the input property that receives the captured fault.
    fn fault_input() -> &'static str
    where
        Self: Sized,
    {
        "fault"
    }
}

/// Object-safe erased form of [`Activity`], used by the container and the
/// executor. The typed output is serialized at this boundary.
#[async_trait]
pub(crate) trait ErasedActivity: Send {
    fn apply_input(&mut self, property: &str, value: Value) -> Result<(), ActivityError>;
    async fn invoke(&mut self, ctx: &ActivityContext) -> Result<Value, ActivityError>;
}

#[async_trait]
impl<A: Activity> ErasedActivity for A {
    fn apply_input(&mut self, property: &str, value: Value) -> Result<(), ActivityError> {
        self.set_input(property, value)
    }

    async fn invoke(&mut self, ctx: &ActivityContext) -> Result<Value, ActivityError> {
        let output = self.execute(ctx).await?;
        serde_json::to_value(output).map_err(ActivityError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greet {
        name: String,
    }

    #[async_trait]
    impl Activity for Greet {
        type Output = String;

        fn required_inputs() -> &'static [&'static str] {
            &["Name"]
        }

        fn set_input(&mut self, property: &str, value: Value) -> Result<(), ActivityError> {
            match property {
                "Name" => {
                    self.name = serde_json::from_value(value)?;
                    Ok(())
                }
                other => Err(ActivityError::unknown_property(other)),
            }
        }

        async fn execute(&mut self, _ctx: &ActivityContext) -> Result<String, ActivityError> {
            Ok(format!("hello {}", self.name))
        }
    }

    fn test_ctx() -> ActivityContext {
        ActivityContext::new(NodeId(0), "greet".into(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_erased_invocation_serializes_output() {
        let mut activity = Greet {
            name: String::new(),
        };
        let erased: &mut dyn ErasedActivity = &mut activity;
        erased
            .apply_input("Name", Value::String("flow".into()))
            .unwrap();
        let out = erased.invoke(&test_ctx()).await.unwrap();
        assert_eq!(out, Value::String("hello flow".into()));
    }

    #[tokio::test]
    async fn test_unknown_property_rejected() {
        let mut activity = Greet {
            name: String::new(),
        };
        let err = activity
            .set_input("Nope", Value::Null)
            .expect_err("unknown property must be rejected");
        assert!(err.message.contains("Nope"));
    }

    #[test]
    fn test_token_identity() {
        assert_eq!(ActivityToken::of::<Greet>(), ActivityToken::of::<Greet>());
        assert!(ActivityToken::of::<Greet>().type_name().contains("Greet"));
    }
}
