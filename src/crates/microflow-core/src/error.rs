//! Error types for flow execution
//!
//! Three orthogonal error dimensions exist in this engine:
//!
//! 1. **Build-time misuse** of the [`FlowBuilder`](crate::FlowBuilder)
//!    (double-connecting an edge, duplicate switch case). These are
//!    programmer errors and panic immediately; they never reach this module.
//! 2. **Validation diagnostics** — returned as data by
//!    [`Flow::validate`](crate::Flow::validate), never raised. See
//!    [`ValidationReport`](crate::ValidationReport).
//! 3. **Runtime errors** — failures inside activities or engine-level issues
//!    (instantiation, binding resolution, an unmapped switch key). These are
//!    the types below.
//!
//! An activity signals failure by returning an [`ActivityError`]. The
//! executor captures it as a [`FaultInfo`] anchored at the faulting node and
//! routes it to the nearest effective fault handler. The overall run
//! resolves to a [`RunError`] only when recovery is impossible: validation
//! refused the flow, no handler covered a fault, the run was cancelled, or a
//! handler itself failed.
//!
//! # Example
//!
//! ```rust
//! use microflow_core::{ActivityError, RunError};
//!
//! fn classify(err: &RunError) -> &'static str {
//!     match err {
//!         RunError::ValidationFailed(_) => "fix the flow definition",
//!         RunError::Faulted(_) => "no handler covered the fault",
//!         RunError::Cancelled => "the run was cancelled",
//!         RunError::HandlerFailed(_) => "a handler itself failed",
//!     }
//! }
//!
//! let err = ActivityError::new("upstream service unavailable");
//! assert_eq!(err.to_string(), "upstream service unavailable");
//! ```

use crate::node::NodeId;
use crate::validator::ValidationReport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Error produced by an activity or by an engine-level runtime issue.
///
/// Carries a human-readable message and an optional structured payload. The
/// payload travels with the fault into the handler's fault property, so an
/// activity can hand its handler more than a string:
///
/// ```rust
/// use microflow_core::ActivityError;
/// use serde_json::json;
///
/// let err = ActivityError::new("quota exceeded").with_value(json!({"limit": 100}));
/// assert_eq!(err.to_string(), "quota exceeded");
/// ```
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ActivityError {
    /// Human-readable description of the failure.
    pub message: String,
    /// Optional structured payload carried into the fault handler.
    pub value: Option<Value>,
}

impl ActivityError {
    /// Create an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            value: None,
        }
    }

    /// Attach a structured payload. Values that fail to serialize are
    /// dropped silently; the message always survives.
    pub fn with_value(mut self, value: impl Serialize) -> Self {
        self.value = serde_json::to_value(value).ok();
        self
    }

    pub(crate) fn unknown_property(property: &str) -> Self {
        Self::new(format!("unknown input property '{property}'"))
    }
}

impl From<serde_json::Error> for ActivityError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("serialization error: {err}"))
    }
}

/// A captured fault: which node failed, why, and what was suppressed.
///
/// This is the value assigned to a fault handler's fault property before the
/// handler runs. In a fork-join, the first observed fault becomes primary
/// and the remaining sibling faults are attached as `suppressed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultInfo {
    /// Node at which the fault originated.
    pub node: NodeId,
    /// Name of the faulting node.
    pub node_name: String,
    /// Failure message.
    pub message: String,
    /// Structured payload attached by the activity, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Sibling faults suppressed behind this one (fork-join only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed: Vec<FaultInfo>,
}

impl FaultInfo {
    pub(crate) fn from_error(node: NodeId, node_name: &str, error: ActivityError) -> Self {
        Self {
            node,
            node_name: node_name.to_string(),
            message: error.message,
            value: error.value,
            suppressed: Vec::new(),
        }
    }
}

impl fmt::Display for FaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault at '{}' ({}): {}", self.node_name, self.node, self.message)
    }
}

/// Outcome of a failed flow run.
///
/// A successful run — including one whose fault was absorbed by a fault
/// handler — resolves to `Ok(())`; these variants are the failure side.
#[derive(Debug, Error)]
pub enum RunError {
    /// Validation refused the flow; no activity was invoked.
    #[error("flow validation failed with {} error(s)", .0.errors.len())]
    ValidationFailed(ValidationReport),

    /// A fault occurred and no effective fault handler covered it.
    #[error("{0}")]
    Faulted(FaultInfo),

    /// The run was cancelled.
    #[error("flow cancelled")]
    Cancelled,

    /// A fault or cancellation handler itself failed. Handler failures are
    /// never re-dispatched.
    #[error("handler failed: {0}")]
    HandlerFailed(FaultInfo),
}
