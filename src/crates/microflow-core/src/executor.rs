//! Graph traversal runtime
//!
//! The executor walks a validated flow from its initial node. It is a
//! single logical task per run, except inside fork-join regions where each
//! child runs as its own spawned task.
//!
//! Per-node behavior:
//!
//! - **Activity** — resolve the instance through the service container,
//!   resolve bindings, apply inputs, invoke. On success the result thunk is
//!   populated, then the activity's variable updates run in declaration
//!   order, then control moves to `next`. On fault, control moves to the
//!   nearest effective fault handler (own edge, else flow default); the
//!   handler runs as an ordinary activity but its own faults are *not*
//!   re-dispatched — they end the run with
//!   [`RunError::HandlerFailed`](crate::RunError::HandlerFailed).
//! - **Condition** — evaluate the predicate, branch true/false.
//! - **Switch** — evaluate the choice, dispatch by key equality, else
//!   default, else fault (`UnhandledCase` semantics: dispatched to the flow
//!   default handler, not the node's own).
//! - **Fork-join** — spawn every child with a token linked to the fork
//!   region. The first fault that escapes a child cancels the remaining
//!   siblings; after all children settle, the first fault becomes primary
//!   with the rest suppressed and the fork-join's effective handler runs.
//! - **Block** — push a scope frame, create block-local variables, run the
//!   inner region; when it ends, tear the variables down and continue at
//!   the block's `next`.
//!
//! A run terminates when a node with no successor is exited at flow scope,
//! when a handler completes, or when cancellation reaches a node without a
//! registered handler. Ordering within a sequential region is strict: node
//! *i*'s thunk population and variable updates happen before node *i+1*'s
//! binding resolution. No lock is held across a suspension point; the only
//! exception is the per-instance mutex serializing singleton activities.

use crate::activity::ActivityContext;
use crate::binding::{Binding, Expression};
use crate::error::{ActivityError, FaultInfo, RunError};
use crate::flow::FlowCore;
use crate::logger::{FlowLogger, Verbosity};
use crate::node::{
    key_display, ActivityNode, ForkJoinNode, NodeId, NodeKind, ScopeId, UpdateOp,
};
use crate::services::{ResolvedActivity, ServiceContainer, SingletonCache};
use crate::state::{EvalScope, RunState};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Outcome of one activity invocation.
enum StepOutcome {
    Completed,
    Faulted(FaultInfo),
    Cancelled,
}

/// Aggregate outcome of a fork-join region.
enum ForkResult {
    Completed,
    Faulted(FaultInfo),
    Cancelled,
    HandlerFailed(FaultInfo),
}

/// How a single fork child settled.
enum ChildSettle {
    Completed,
    Faulted(FaultInfo),
    Cancelled,
    HandlerFailed(FaultInfo),
}

/// Drives one run of a flow. Cheap to clone; fork children share the run
/// state, logger, and per-run singleton cache through `Arc`s.
#[derive(Clone)]
pub(crate) struct Executor {
    flow: Arc<FlowCore>,
    services: Arc<ServiceContainer>,
    logger: Arc<dyn FlowLogger>,
    state: Arc<RunState>,
    singletons: Arc<SingletonCache>,
    run_id: Uuid,
}

impl Executor {
    pub(crate) fn new(
        flow: Arc<FlowCore>,
        services: Arc<ServiceContainer>,
        logger: Arc<dyn FlowLogger>,
    ) -> Self {
        Self {
            flow,
            services,
            logger,
            state: Arc::new(RunState::new()),
            singletons: Arc::new(SingletonCache::default()),
            run_id: Uuid::new_v4(),
        }
    }

    pub(crate) async fn run(
        self,
        initial: NodeId,
        token: CancellationToken,
    ) -> Result<(), RunError> {
        for (var, decl) in self.flow.variables_in_scope(ScopeId::FLOW) {
            self.state.enter_variable(var, decl.initial.clone());
        }
        self.logger.flow_started(&self.flow.name, self.run_id);
        let outcome = self.drive(initial, &token).await;
        let tag = match &outcome {
            Ok(()) => "completed",
            Err(RunError::Faulted(_)) => "faulted",
            Err(RunError::Cancelled) => "cancelled",
            Err(RunError::HandlerFailed(_)) => "handler-failed",
            Err(RunError::ValidationFailed(_)) => "validation-failed",
        };
        self.logger.flow_finished(&self.flow.name, self.run_id, tag);
        outcome
    }

    /// Sequential traversal loop. Blocks are handled iteratively with a
    /// frame stack; a `None` successor pops the innermost frame (tearing
    /// down its variables) or, at flow scope, completes the run.
    async fn drive(&self, start: NodeId, token: &CancellationToken) -> Result<(), RunError> {
        let mut frames: Vec<NodeId> = Vec::new();
        let mut current = Some(start);
        loop {
            let id = match current.take() {
                Some(id) => id,
                None => {
                    let Some(block_id) = frames.pop() else {
                        return Ok(());
                    };
                    if let NodeKind::Block(block) = &self.flow.node(block_id).kind {
                        self.exit_block(block.scope);
                        self.logger.node_exited(block_id, &self.flow.node(block_id).name);
                        current = block.next;
                    }
                    continue;
                }
            };
            if token.is_cancelled() {
                return self.dispatch_cancellation(id).await;
            }
            let node = self.flow.node(id);
            self.logger.node_entered(id, &node.name);
            match &node.kind {
                NodeKind::Activity(activity) => {
                    match self.run_activity(id, activity, token, None).await {
                        StepOutcome::Completed => current = activity.next,
                        StepOutcome::Faulted(fault) => {
                            return self.dispatch_fault(id, fault, token).await
                        }
                        StepOutcome::Cancelled => {
                            return self.dispatch_cancellation(id).await
                        }
                    }
                }
                NodeKind::Condition(condition) => {
                    match self.eval_bool(&condition.predicate) {
                        Ok(true) => current = condition.on_true,
                        Ok(false) => current = condition.on_false,
                        Err(err) => {
                            return self.dispatch_fault(id, self.fault_at(id, err), token).await
                        }
                    }
                }
                NodeKind::Switch(switch) => match self.eval_expression(&switch.chooser) {
                    Ok(key) => match switch.cases.iter().find(|(case, _)| *case == key) {
                        Some((_, target)) => current = Some(*target),
                        None => match switch.default {
                            Some(default) => current = Some(default),
                            None => {
                                let err = ActivityError::new(format!(
                                    "switch '{}' has no case for key {}",
                                    node.name,
                                    key_display(&key)
                                ))
                                .with_value(key);
                                // An unhandled case dispatches to the flow
                                // default handler, not the node's own.
                                return self
                                    .dispatch_default_fault(self.fault_at(id, err), token)
                                    .await;
                            }
                        },
                    },
                    Err(err) => {
                        return self.dispatch_fault(id, self.fault_at(id, err), token).await
                    }
                },
                NodeKind::ForkJoin(fork_join) => {
                    match self.run_fork_join(id, fork_join, token).await {
                        ForkResult::Completed => current = fork_join.next,
                        ForkResult::Faulted(fault) => {
                            return self.dispatch_fault(id, fault, token).await
                        }
                        ForkResult::Cancelled => {
                            return self.dispatch_cancellation(id).await
                        }
                        ForkResult::HandlerFailed(fault) => {
                            return Err(RunError::HandlerFailed(fault))
                        }
                    }
                }
                NodeKind::Block(block) => {
                    self.enter_block(block.scope);
                    frames.push(id);
                    current = block.initial;
                }
            }
            if !matches!(&node.kind, NodeKind::Block(_)) {
                self.logger.node_exited(id, &node.name);
            }
        }
    }

    // ── activities ─────────────────────────────────────────────────────

    async fn run_activity(
        &self,
        id: NodeId,
        activity: &ActivityNode,
        token: &CancellationToken,
        preset: Option<(String, Value)>,
    ) -> StepOutcome {
        if token.is_cancelled() {
            return StepOutcome::Cancelled;
        }
        let name = &self.flow.node(id).name;
        let resolved = match self.services.resolve(activity.token, &self.singletons) {
            Ok(resolved) => resolved,
            Err(err) => return StepOutcome::Faulted(self.fault_at(id, err)),
        };
        let inputs = match self.resolve_inputs(id) {
            Ok(inputs) => inputs,
            Err((property, err)) => {
                self.logger.binding_failed(id, &property, &err);
                return StepOutcome::Faulted(self.fault_at(id, err));
            }
        };
        let ctx = ActivityContext::new(id, name.clone(), token.clone());
        let outcome = match resolved {
            ResolvedActivity::Owned(mut instance) => {
                self.invoke(instance.as_mut(), inputs, preset, &ctx).await
            }
            ResolvedActivity::Shared(shared) => {
                let mut guard = shared.lock().await;
                self.invoke(guard.as_mut(), inputs, preset, &ctx).await
            }
        };
        match outcome {
            Ok(value) => {
                self.state.complete(id, value);
                self.logger.activity_completed(id, name, true);
                if let Err(err) = self.apply_updates(id) {
                    return StepOutcome::Faulted(self.fault_at(id, err));
                }
                StepOutcome::Completed
            }
            Err(err) => {
                if token.is_cancelled() {
                    self.logger.cancellation(id, name);
                    StepOutcome::Cancelled
                } else {
                    self.logger.activity_completed(id, name, false);
                    StepOutcome::Faulted(self.fault_at(id, err))
                }
            }
        }
    }

    async fn invoke(
        &self,
        instance: &mut dyn crate::activity::ErasedActivity,
        inputs: Vec<(String, Value)>,
        preset: Option<(String, Value)>,
        ctx: &ActivityContext,
    ) -> Result<Value, ActivityError> {
        for (property, value) in inputs {
            instance.apply_input(&property, value)?;
        }
        if let Some((property, value)) = preset {
            instance.apply_input(&property, value)?;
        }
        instance.invoke(ctx).await
    }

    fn resolve_inputs(&self, id: NodeId) -> Result<Vec<(String, Value)>, (String, ActivityError)> {
        let mut inputs = Vec::new();
        for decl in self.flow.bindings_of(id) {
            let value = match &decl.binding {
                Binding::Constant(value) => Ok(value.clone()),
                Binding::ResultOf(src) => self.state.result(*src),
                Binding::Expression(expr) => self.eval_expression(expr),
            };
            match value {
                Ok(value) => inputs.push((decl.property.clone(), value)),
                Err(err) => return Err((decl.property.clone(), err)),
            }
        }
        Ok(inputs)
    }

    /// Post-completion variable updates, in declaration order, after the
    /// result thunk is populated and before the successor starts.
    fn apply_updates(&self, trigger: NodeId) -> Result<(), ActivityError> {
        let debug = self.logger.verbosity() >= Verbosity::Debug;
        for update in self.flow.updates_for(trigger) {
            let value = match &update.op {
                UpdateOp::Assign(value) => {
                    self.state.write_variable(update.var, value.clone())?;
                    value.clone()
                }
                UpdateOp::AssignResult => {
                    let value = self.state.result(trigger)?;
                    self.state.write_variable(update.var, value.clone())?;
                    value
                }
                UpdateOp::Update(f) => self.state.update_variable(update.var, f)?,
            };
            if debug {
                self.logger.variable_updated(
                    update.var,
                    &self.flow.variables[update.var.0].name,
                    &value,
                );
            }
        }
        Ok(())
    }

    // ── expressions ────────────────────────────────────────────────────

    fn eval_expression(&self, expr: &Expression) -> Result<Value, ActivityError> {
        let scope = EvalScope::new(&self.state, &expr.reads);
        expr.evaluate(&scope)
    }

    fn eval_bool(&self, expr: &Expression) -> Result<bool, ActivityError> {
        match self.eval_expression(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(ActivityError::new(format!(
                "predicate produced {other}, expected a boolean"
            ))),
        }
    }

    fn fault_at(&self, id: NodeId, err: ActivityError) -> FaultInfo {
        FaultInfo::from_error(id, &self.flow.node(id).name, err)
    }

    // ── fault and cancellation dispatch ────────────────────────────────

    async fn dispatch_fault(
        &self,
        id: NodeId,
        fault: FaultInfo,
        token: &CancellationToken,
    ) -> Result<(), RunError> {
        match self.flow.effective_fault(id) {
            Some(handler) => self.run_handler(handler, Some(fault), token).await,
            None => Err(RunError::Faulted(fault)),
        }
    }

    async fn dispatch_default_fault(
        &self,
        fault: FaultInfo,
        token: &CancellationToken,
    ) -> Result<(), RunError> {
        match self.flow.default_fault {
            Some(handler) => self.run_handler(handler, Some(fault), token).await,
            None => Err(RunError::Faulted(fault)),
        }
    }

    async fn dispatch_cancellation(&self, id: NodeId) -> Result<(), RunError> {
        self.logger.cancellation(id, &self.flow.node(id).name);
        match self.flow.effective_cancel(id) {
            Some(handler) => {
                // The handler is a cleanup hook; it runs on a fresh token so
                // the cancellation that invoked it does not abort it.
                let handler_token = CancellationToken::new();
                self.run_handler(handler, None, &handler_token).await?;
                Err(RunError::Cancelled)
            }
            None => Err(RunError::Cancelled),
        }
    }

    /// Runs a fault or cancellation handler. Handler completion ends the
    /// run; handler faults are never re-dispatched.
    async fn run_handler(
        &self,
        handler: NodeId,
        fault: Option<FaultInfo>,
        token: &CancellationToken,
    ) -> Result<(), RunError> {
        let node = self.flow.node(handler);
        let Some(activity) = node.as_activity() else {
            return Err(RunError::HandlerFailed(FaultInfo {
                node: handler,
                node_name: node.name.clone(),
                message: "handler is not an activity node".into(),
                value: None,
                suppressed: Vec::new(),
            }));
        };
        let preset = fault.map(|f| {
            self.logger.fault_handler_invoked(handler, &node.name, &f);
            Self::handler_preset(activity, &f)
        });
        match self.run_activity(handler, activity, token, preset).await {
            StepOutcome::Completed => Ok(()),
            StepOutcome::Faulted(fault) => Err(RunError::HandlerFailed(fault)),
            StepOutcome::Cancelled => Err(RunError::Cancelled),
        }
    }

    fn handler_preset(activity: &ActivityNode, fault: &FaultInfo) -> (String, Value) {
        let property = activity
            .handler
            .map(|spec| spec.fault_property)
            .unwrap_or("fault");
        let value = serde_json::to_value(fault).unwrap_or(Value::Null);
        (property.to_string(), value)
    }

    // ── fork-join ──────────────────────────────────────────────────────

    async fn run_fork_join(
        &self,
        id: NodeId,
        fork_join: &ForkJoinNode,
        token: &CancellationToken,
    ) -> ForkResult {
        let fork_token = token.child_token();
        let mut tasks = JoinSet::new();
        for &child in &fork_join.children {
            let exec = self.clone();
            let child_token = fork_token.child_token();
            tasks.spawn(async move { exec.run_fork_child(child, child_token).await });
        }

        let mut faults: Vec<FaultInfo> = Vec::new();
        let mut cancelled = false;
        let mut handler_failure: Option<FaultInfo> = None;
        while let Some(joined) = tasks.join_next().await {
            let settle = joined.unwrap_or_else(|err| {
                ChildSettle::Faulted(FaultInfo {
                    node: id,
                    node_name: self.flow.node(id).name.clone(),
                    message: format!("fork child task failed: {err}"),
                    value: None,
                    suppressed: Vec::new(),
                })
            });
            match settle {
                ChildSettle::Completed => {}
                ChildSettle::Cancelled => cancelled = true,
                ChildSettle::Faulted(fault) => {
                    // First escaping fault cancels the remaining siblings.
                    if faults.is_empty() {
                        fork_token.cancel();
                    }
                    faults.push(fault);
                }
                ChildSettle::HandlerFailed(fault) => {
                    fork_token.cancel();
                    handler_failure.get_or_insert(fault);
                }
            }
        }

        if let Some(fault) = handler_failure {
            return ForkResult::HandlerFailed(fault);
        }
        if !faults.is_empty() {
            let mut primary = faults.remove(0);
            primary.suppressed.extend(faults);
            return ForkResult::Faulted(primary);
        }
        if cancelled {
            return ForkResult::Cancelled;
        }
        ForkResult::Completed
    }

    /// One fork child: run the activity; a per-child fault handler absorbs
    /// faults inside the child's sub-execution, anything else escapes to
    /// the join barrier.
    async fn run_fork_child(&self, child: NodeId, token: CancellationToken) -> ChildSettle {
        let node = self.flow.node(child);
        let Some(activity) = node.as_activity() else {
            return ChildSettle::Faulted(FaultInfo {
                node: child,
                node_name: node.name.clone(),
                message: "fork child is not an activity node".into(),
                value: None,
                suppressed: Vec::new(),
            });
        };
        match self.run_activity(child, activity, &token, None).await {
            StepOutcome::Completed => ChildSettle::Completed,
            StepOutcome::Cancelled => ChildSettle::Cancelled,
            StepOutcome::Faulted(fault) => match activity.fault {
                Some(handler) => self.run_child_handler(handler, fault, &token).await,
                None => ChildSettle::Faulted(fault),
            },
        }
    }

    async fn run_child_handler(
        &self,
        handler: NodeId,
        fault: FaultInfo,
        token: &CancellationToken,
    ) -> ChildSettle {
        let node = self.flow.node(handler);
        let Some(activity) = node.as_activity() else {
            return ChildSettle::HandlerFailed(FaultInfo {
                node: handler,
                node_name: node.name.clone(),
                message: "handler is not an activity node".into(),
                value: None,
                suppressed: Vec::new(),
            });
        };
        self.logger.fault_handler_invoked(handler, &node.name, &fault);
        let preset = Some(Self::handler_preset(activity, &fault));
        match self.run_activity(handler, activity, token, preset).await {
            StepOutcome::Completed => ChildSettle::Completed,
            StepOutcome::Cancelled => ChildSettle::Cancelled,
            StepOutcome::Faulted(handler_fault) => ChildSettle::HandlerFailed(handler_fault),
        }
    }

    // ── block scopes ───────────────────────────────────────────────────

    fn enter_block(&self, scope: ScopeId) {
        for (var, decl) in self.flow.variables_in_scope(scope) {
            self.state.enter_variable(var, decl.initial.clone());
        }
    }

    fn exit_block(&self, scope: ScopeId) {
        for (var, _) in self.flow.variables_in_scope(scope) {
            self.state.exit_variable(var);
        }
    }
}
