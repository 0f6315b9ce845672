//! # microflow-core - In-Process Workflow Engine
//!
//! A lightweight engine that executes user-authored flowcharts: directed
//! graphs of activities, conditions, switches, fork-joins, and blocks, with
//! typed data bindings, scoped variables, and structured fault and
//! cancellation handling. Flows are validated ahead of execution; a flow
//! with validation errors never invokes a single activity.
//!
//! ## Overview
//!
//! Building and running a flow goes through three stages:
//!
//! 1. **Build** — [`FlowBuilder`] constructs the typed node graph through a
//!    fluent, write-only API and freezes it into an immutable [`Flow`].
//! 2. **Validate** — [`Flow::validate`] runs a sequence of graph passes
//!    (reference integrity, reachability, handler coverage, required
//!    inputs, binding liveness, switch coverage, fork-join structure,
//!    variable scoping) and returns a [`ValidationReport`] as data.
//! 3. **Execute** — [`Flow::run`] walks the graph, instantiates activities
//!    through the [`ServiceContainer`], resolves bindings, populates result
//!    thunks, applies variable updates, and honors fault/cancellation
//!    semantics, including fork-join concurrency.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              FlowBuilder (write-only)               │
//! │  activities · conditions · switches · fork-joins    │
//! │  blocks · variables · bindings · handler wiring     │
//! └──────────────────────┬──────────────────────────────┘
//!                        │ build()
//!                        ▼
//! ┌─────────────────────────────────────────────────────┐
//! │                 Flow (immutable)                    │
//! │   validate() ──► ValidationReport (errors/warnings) │
//! │   describe() ──► GraphDescription (DOT / Mermaid)   │
//! │   run()      ──► executor                           │
//! └──────────────────────┬──────────────────────────────┘
//!                        │
//!          ┌─────────────┴─────────────┐
//!          ▼                           ▼
//! ┌──────────────────┐       ┌──────────────────────┐
//! │     Executor     │──────►│   ServiceContainer   │
//! │  node traversal  │       │  singleton/transient │
//! │  fork-join tasks │       │  activity factories  │
//! │  fault dispatch  │       └──────────────────────┘
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     RunState     │
//! │  result thunks   │
//! │  scoped vars     │
//! └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use microflow_core::{FlowBuilder, ServiceContainer};
//! use std::sync::Arc;
//!
//! // 1. Build the graph.
//! let mut b = FlowBuilder::new("sum-two-inputs");
//! let first = b.activity::<ReadNumber>("first");
//! let second = b.activity::<ReadNumber>("second");
//! let add = b.activity::<Add>("add");
//! let on_fault = b.fault_handler::<LogFault>("on-fault");
//!
//! b.bind(&first, "Value").to_constant(7);
//! b.bind(&second, "Value").to_constant(5);
//! b.bind(&add, "FirstNumber").to_result_of(&first);
//! b.bind(&add, "SecondNumber").to_result_of(&second);
//!
//! b.connect(&first, &second);
//! b.connect(&second, &add);
//! b.with_initial_node(&first);
//! b.with_default_fault_handler(&on_fault);
//! b.with_default_cancellation_handler(&on_fault);
//! let flow = b.build();
//!
//! // 2. Register activity types.
//! let mut services = ServiceContainer::new();
//! services.add_transient(|_| Ok(ReadNumber::default()));
//! services.add_transient(|_| Ok(Add::default()));
//! services.add_transient(|_| Ok(LogFault::default()));
//!
//! // 3. Validate and run.
//! flow.run(Arc::new(services)).await?;
//! ```
//!
//! ## Failure semantics
//!
//! An activity fault routes to the nearest **effective handler**: the
//! node's own fault edge if present, otherwise the flow-wide default. A
//! handler runs as an ordinary activity with the captured [`FaultInfo`]
//! assigned to its fault property; when it completes, the run ends cleanly
//! — the fault has been handled. Faults inside handlers are never
//! re-dispatched ([`RunError::HandlerFailed`]). Cancellation follows the
//! same dispatch shape through cancellation handlers, and a fork-join
//! cancels the remaining siblings as soon as one child's fault escapes.
//!
//! ## Module Organization
//!
//! ### Core APIs (start here)
//! - [`builder`] - [`FlowBuilder`], node handles, binding and update wiring
//! - [`flow`] - [`Flow`]: the validate/run façade
//! - [`activity`] - the [`Activity`] and [`FaultHandlerActivity`] traits
//!
//! ### Data flow
//! - [`binding`] - constants, result bindings, and declared-read expressions
//! - [`state`] - result thunks, variables, and the expression [`EvalScope`]
//!
//! ### Infrastructure
//! - [`validator`] - the pre-execution pass set and [`ValidationReport`]
//! - [`services`] - [`ServiceContainer`] activity registration/resolution
//! - [`logger`] - the [`FlowLogger`] event sink
//! - [`export`] - [`GraphDescription`], DOT and Mermaid renderers
//! - [`error`] - [`ActivityError`], [`FaultInfo`], [`RunError`]
//! - [`node`] - graph ids and edge labels

pub mod activity;
pub mod binding;
pub mod builder;
pub mod error;
mod executor;
pub mod export;
pub mod flow;
pub mod logger;
pub mod node;
pub mod services;
pub mod state;
pub mod validator;

// Re-export main types
pub use activity::{Activity, ActivityContext, ActivityToken, FaultHandlerActivity};
pub use binding::{Dependency, Expression};
pub use builder::{
    ActivityHandle, BindingBuilder, BlockHandle, ConditionHandle, FlowBuilder, ForkHandle,
    ForkJoinHandle, NodeRef, ResultSource, SwitchHandle, UpdateActions, VariableHandle,
};
pub use error::{ActivityError, FaultInfo, RunError};
pub use export::{
    render_dot, render_mermaid, EdgeDescription, GraphDescription, NodeDescription, NodeKindTag,
};
pub use flow::Flow;
pub use logger::{FlowLogger, NullFlowLogger, TracingFlowLogger, Verbosity};
pub use node::{EdgeLabel, NodeId, ScopeId, VarId};
pub use services::ServiceContainer;
pub use state::{EvalScope, ResultRef};
pub use validator::{Diagnostic, DiagnosticCode, ValidationReport};

// The cancellation primitive threaded through runs and activities.
pub use tokio_util::sync::CancellationToken;
