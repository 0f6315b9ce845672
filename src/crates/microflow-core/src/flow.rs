//! Flow façade: the immutable bundle produced by the builder
//!
//! A [`Flow`] owns the node store, scopes, variables, bindings, and update
//! actions assembled by the [`FlowBuilder`](crate::FlowBuilder). It is
//! cheaply clonable (`Arc` inside) and exposes the two entry points of the
//! engine:
//!
//! - [`validate`](Flow::validate) — run the full diagnostic pass set and
//!   return a [`ValidationReport`] without executing anything.
//! - [`run`](Flow::run) — validate, then drive the executor. A flow with
//!   validation errors resolves to
//!   [`RunError::ValidationFailed`](crate::RunError::ValidationFailed)
//!   without invoking a single activity.
//!
//! [`describe`](Flow::describe) exposes the structural graph for the export
//! tooling; see the [`export`](crate::export) module.

use crate::error::RunError;
use crate::executor::Executor;
use crate::export::GraphDescription;
use crate::logger::{FlowLogger, TracingFlowLogger};
use crate::node::{BindingDecl, NodeData, NodeId, ScopeDecl, ScopeId, UpdateAction, VarId, VariableDecl};
use crate::services::ServiceContainer;
use crate::validator::{validate, ValidationReport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Immutable flow definition shared by the façade, validator, executor, and
/// export.
pub(crate) struct FlowCore {
    pub name: String,
    pub nodes: Vec<NodeData>,
    pub scopes: Vec<ScopeDecl>,
    pub variables: Vec<VariableDecl>,
    pub bindings: Vec<BindingDecl>,
    pub updates: Vec<UpdateAction>,
    pub initial: Option<NodeId>,
    pub default_fault: Option<NodeId>,
    pub default_cancel: Option<NodeId>,
}

impl FlowCore {
    pub(crate) fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }

    pub(crate) fn try_node(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0)
    }

    pub(crate) fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub(crate) fn bindings_of(&self, owner: NodeId) -> impl Iterator<Item = &BindingDecl> {
        self.bindings.iter().filter(move |b| b.owner == owner)
    }

    pub(crate) fn updates_for(&self, trigger: NodeId) -> impl Iterator<Item = &UpdateAction> {
        self.updates.iter().filter(move |u| u.trigger == trigger)
    }

    pub(crate) fn variables_in_scope(
        &self,
        scope: ScopeId,
    ) -> impl Iterator<Item = (VarId, &VariableDecl)> {
        self.variables
            .iter()
            .enumerate()
            .filter(move |(_, decl)| decl.scope == scope)
            .map(|(i, decl)| (VarId(i), decl))
    }

    /// Whether `target` is `from` itself or one of its ancestors.
    pub(crate) fn scope_visible(&self, target: ScopeId, from: ScopeId) -> bool {
        let mut cursor = Some(from);
        while let Some(scope) = cursor {
            if scope == target {
                return true;
            }
            cursor = self.scopes[scope.0].parent;
        }
        false
    }

    /// Block node owning a scope; `None` for the flow scope.
    pub(crate) fn block_of_scope(&self, scope: ScopeId) -> Option<NodeId> {
        self.scopes[scope.0].block
    }

    /// Nearest effective fault handler of a node: its own fault edge, the
    /// enclosing fork-join's for fork children, else the flow default.
    pub(crate) fn effective_fault(&self, id: NodeId) -> Option<NodeId> {
        match &self.node(id).kind {
            crate::node::NodeKind::Activity(a) => a
                .fault
                .or_else(|| a.fork_child_of.and_then(|fj| self.effective_fault(fj)))
                .or(self.default_fault),
            crate::node::NodeKind::ForkJoin(fj) => fj.fault.or(self.default_fault),
            _ => self.default_fault,
        }
    }

    /// Nearest effective cancellation handler of a node.
    pub(crate) fn effective_cancel(&self, id: NodeId) -> Option<NodeId> {
        match &self.node(id).kind {
            crate::node::NodeKind::Activity(a) => a
                .cancel
                .or_else(|| a.fork_child_of.and_then(|fj| self.effective_cancel(fj)))
                .or(self.default_cancel),
            crate::node::NodeKind::ForkJoin(fj) => fj.cancel.or(self.default_cancel),
            _ => self.default_cancel,
        }
    }
}

/// An immutable, executable flow. See the [module docs](self).
#[derive(Clone)]
pub struct Flow {
    core: Arc<FlowCore>,
}

impl Flow {
    pub(crate) fn from_core(core: FlowCore) -> Self {
        Self {
            core: Arc::new(core),
        }
    }

    /// Name given to the builder.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Run all validation passes and return the diagnostics. Validation is
    /// pure: re-validating an unmodified flow yields the same report.
    pub fn validate(&self) -> ValidationReport {
        validate(&self.core)
    }

    /// Validate and run the flow with the default tracing logger and a
    /// fresh cancellation token.
    pub async fn run(&self, services: Arc<ServiceContainer>) -> Result<(), RunError> {
        self.run_with(
            services,
            Arc::new(TracingFlowLogger::default()),
            CancellationToken::new(),
        )
        .await
    }

    /// Validate and run the flow with an explicit logger and cancellation
    /// token. Cancelling the token cancels the run: the current activity is
    /// signalled, and the executor routes to the effective cancellation
    /// handler.
    pub async fn run_with(
        &self,
        services: Arc<ServiceContainer>,
        logger: Arc<dyn FlowLogger>,
        token: CancellationToken,
    ) -> Result<(), RunError> {
        let report = self.validate();
        if !report.is_ok() {
            return Err(RunError::ValidationFailed(report));
        }
        let Some(initial) = self.core.initial else {
            // Unreachable past validation; kept as a defensive no-op.
            return Ok(());
        };
        Executor::new(self.core.clone(), services, logger)
            .run(initial, token)
            .await
    }

    /// Structural description of the graph for export and visualization.
    pub fn describe(&self) -> GraphDescription {
        crate::export::describe(&self.core)
    }
}
