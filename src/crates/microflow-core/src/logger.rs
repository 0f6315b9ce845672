//! Execution event sink
//!
//! The executor reports its progress through a narrow [`FlowLogger`] trait
//! rather than calling a logging framework directly. The default
//! implementation, [`TracingFlowLogger`], forwards every event to
//! [`tracing`] as structured fields; [`NullFlowLogger`] discards everything
//! (useful in tests).
//!
//! Events carrying per-step payloads (variable updates) are gated behind
//! [`Verbosity::Debug`]; the executor checks the sink's verbosity before
//! building the event. The executor never invokes the logger while holding
//! a lock.

use crate::error::{ActivityError, FaultInfo};
use crate::node::{NodeId, VarId};
use serde_json::Value;
use uuid::Uuid;

/// How much the sink wants to hear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Off,
    Error,
    Warning,
    Info,
    Debug,
}

/// Sink for structured execution events.
///
/// All methods have empty default bodies, so implementations only override
/// what they care about.
pub trait FlowLogger: Send + Sync {
    /// Maximum verbosity this sink wants to receive.
    fn verbosity(&self) -> Verbosity {
        Verbosity::Info
    }

    /// A run has started.
    fn flow_started(&self, _flow: &str, _run: Uuid) {}

    /// A run has finished; `outcome` is a short human-readable tag
    /// (`completed`, `faulted`, `cancelled`, ...).
    fn flow_finished(&self, _flow: &str, _run: Uuid, _outcome: &str) {}

    /// The executor entered a node.
    fn node_entered(&self, _node: NodeId, _name: &str) {}

    /// The executor left a node.
    fn node_exited(&self, _node: NodeId, _name: &str) {}

    /// An activity invocation finished; `ok` reports the outcome.
    fn activity_completed(&self, _node: NodeId, _name: &str, _ok: bool) {}

    /// A binding failed to resolve.
    fn binding_failed(&self, _node: NodeId, _property: &str, _error: &ActivityError) {}

    /// A variable was updated (emitted only at [`Verbosity::Debug`]).
    fn variable_updated(&self, _var: VarId, _name: &str, _value: &Value) {}

    /// A fault handler is about to run.
    fn fault_handler_invoked(&self, _handler: NodeId, _name: &str, _fault: &FaultInfo) {}

    /// Cancellation reached a node.
    fn cancellation(&self, _node: NodeId, _name: &str) {}
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFlowLogger;

impl FlowLogger for NullFlowLogger {
    fn verbosity(&self) -> Verbosity {
        Verbosity::Off
    }
}

/// Sink forwarding events to [`tracing`] with structured fields.
#[derive(Debug, Clone, Copy)]
pub struct TracingFlowLogger {
    verbosity: Verbosity,
}

impl TracingFlowLogger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }
}

impl Default for TracingFlowLogger {
    fn default() -> Self {
        // Emit everything; downstream tracing filters decide what survives.
        Self::new(Verbosity::Debug)
    }
}

impl FlowLogger for TracingFlowLogger {
    fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    fn flow_started(&self, flow: &str, run: Uuid) {
        tracing::info!(flow = %flow, run = %run, "Flow run started");
    }

    fn flow_finished(&self, flow: &str, run: Uuid, outcome: &str) {
        tracing::info!(flow = %flow, run = %run, outcome = %outcome, "Flow run finished");
    }

    fn node_entered(&self, node: NodeId, name: &str) {
        tracing::debug!(node = %node, name = %name, "Entering node");
    }

    fn node_exited(&self, node: NodeId, name: &str) {
        tracing::debug!(node = %node, name = %name, "Leaving node");
    }

    fn activity_completed(&self, node: NodeId, name: &str, ok: bool) {
        if ok {
            tracing::info!(node = %node, name = %name, "Activity completed");
        } else {
            tracing::warn!(node = %node, name = %name, "Activity faulted");
        }
    }

    fn binding_failed(&self, node: NodeId, property: &str, error: &ActivityError) {
        tracing::error!(node = %node, property = %property, error = %error, "Binding resolution failed");
    }

    fn variable_updated(&self, var: VarId, name: &str, value: &Value) {
        tracing::debug!(var = %var, name = %name, value = %value, "Variable updated");
    }

    fn fault_handler_invoked(&self, handler: NodeId, name: &str, fault: &FaultInfo) {
        tracing::info!(handler = %handler, name = %name, fault = %fault, "Invoking fault handler");
    }

    fn cancellation(&self, node: NodeId, name: &str) {
        tracing::info!(node = %node, name = %name, "Cancellation reached node");
    }
}
