//! Fluent flow construction API
//!
//! [`FlowBuilder`] is the only way to create a [`Flow`]. It hands out typed
//! handles for every node and variable it creates; edges, bindings, and
//! variable updates are wired through builder methods taking those handles.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  FlowBuilder (write-only)                                │
//! │                                                          │
//! │  activity::<A>() ──► ActivityHandle<A>                   │
//! │  condition(..)   ──► ConditionHandle                     │
//! │  switch::<K>(..) ──► SwitchHandle<K>                     │
//! │  fork_join(..)   ──► ForkJoinHandle ─ fork::<A>(..)      │
//! │  block(..)       ──► BlockHandle  (nested scope)         │
//! │  variable::<T>() ──► VariableHandle<T>                   │
//! │                                                          │
//! │  connect / connect_fault / connect_true / connect_case   │
//! │  bind(h, "Prop").to_constant | to_result_of | to_expr    │
//! │  after_completion_of(h).assign | assign_result | update  │
//! └────────────────────────┬─────────────────────────────────┘
//!                          │ build()
//!                          ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  Flow (immutable)                                        │
//! │  validate() ─► ValidationReport                          │
//! │  run()      ─► executor                                  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! let mut b = FlowBuilder::new("sum");
//! let first = b.activity::<ReadNumber>("first");
//! let second = b.activity::<ReadNumber>("second");
//! let add = b.activity::<Add>("add");
//! let handler = b.fault_handler::<LogFault>("on-fault");
//!
//! b.connect(&first, &second);
//! b.connect(&second, &add);
//! b.bind(&add, "Augend").to_result_of(&first);
//! b.bind(&add, "Addend").to_result_of(&second);
//! b.with_initial_node(&first);
//! b.with_default_fault_handler(&handler);
//! b.with_default_cancellation_handler(&handler);
//!
//! let flow = b.build();
//! assert!(flow.validate().is_ok());
//! ```
//!
//! # Build-time misuse
//!
//! The builder is write-only and rejects programmer errors immediately by
//! panicking: connecting the same edge twice, adding a duplicate switch
//! case, giving a fork child a `next` successor, wiring a `next` edge
//! across scopes, or binding an expression to a variable that is not
//! visible from the owner's scope. Everything that depends on the whole
//! graph (handler coverage, required inputs, liveness, ...) is deferred to
//! [`Flow::validate`] and reported as data.

use crate::activity::{Activity, ActivityToken, FaultHandlerActivity};
use crate::binding::{Binding, Dependency, Expression};
use crate::error::ActivityError;
use crate::flow::{Flow, FlowCore};
use crate::node::{
    ActivityNode, BindingDecl, BlockNode, ConditionNode, ForkJoinNode, HandlerSpec, NodeData,
    NodeId, NodeKind, ScopeDecl, ScopeId, SwitchNode, UpdateAction, UpdateOp, VarId, VariableDecl,
};
use crate::state::ResultRef;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Anything that names a node: all node handles implement this.
pub trait NodeRef {
    /// Id of the referenced node.
    fn node_id(&self) -> NodeId;
}

/// Anything whose result thunk can back a `to_result_of` binding.
pub trait ResultSource {
    /// Node whose result is read.
    fn result_node(&self) -> NodeId;
}

/// Handle to an activity node (including fault handlers).
pub struct ActivityHandle<A> {
    id: NodeId,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Clone for ActivityHandle<A> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<A> Copy for ActivityHandle<A> {}

impl<A> NodeRef for ActivityHandle<A> {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl<A: Activity> ActivityHandle<A> {
    /// Typed accessor for this activity's result thunk.
    pub fn result(&self) -> ResultRef<A::Output> {
        ResultRef::new(self.id)
    }
}

impl<A: Activity> ResultSource for ActivityHandle<A> {
    fn result_node(&self) -> NodeId {
        self.id
    }
}

/// Handle to a condition node.
#[derive(Debug, Clone, Copy)]
pub struct ConditionHandle {
    id: NodeId,
}

impl NodeRef for ConditionHandle {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

/// Handle to a switch node dispatching on keys of type `K`.
pub struct SwitchHandle<K> {
    id: NodeId,
    _marker: PhantomData<fn() -> K>,
}

impl<K> Clone for SwitchHandle<K> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<K> Copy for SwitchHandle<K> {}

impl<K> NodeRef for SwitchHandle<K> {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

/// Handle to a fork-join node.
#[derive(Debug, Clone, Copy)]
pub struct ForkJoinHandle {
    id: NodeId,
}

impl NodeRef for ForkJoinHandle {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

/// Handle to one fork child of a fork-join.
pub struct ForkHandle<A> {
    id: NodeId,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Clone for ForkHandle<A> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<A> Copy for ForkHandle<A> {}

impl<A> NodeRef for ForkHandle<A> {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl<A: Activity> ForkHandle<A> {
    /// Typed accessor for this fork child's result thunk. Readable after
    /// the join barrier.
    pub fn result(&self) -> ResultRef<A::Output> {
        ResultRef::new(self.id)
    }
}

impl<A: Activity> ResultSource for ForkHandle<A> {
    fn result_node(&self) -> NodeId {
        self.id
    }
}

impl<T> ResultSource for ResultRef<T> {
    fn result_node(&self) -> NodeId {
        self.source()
    }
}

/// Handle to a block node.
#[derive(Debug, Clone, Copy)]
pub struct BlockHandle {
    id: NodeId,
}

impl NodeRef for BlockHandle {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

/// Handle to a flow or block variable of type `T`.
pub struct VariableHandle<T> {
    id: VarId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for VariableHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for VariableHandle<T> {}

impl<T> VariableHandle<T> {
    pub(crate) fn id(&self) -> VarId {
        self.id
    }
}

/// Write-only builder producing an immutable [`Flow`].
///
/// See the [module docs](self) for the full surface and an example.
pub struct FlowBuilder {
    name: String,
    nodes: Vec<NodeData>,
    scopes: Vec<ScopeDecl>,
    variables: Vec<VariableDecl>,
    bindings: Vec<BindingDecl>,
    updates: Vec<UpdateAction>,
    initial: Option<NodeId>,
    default_fault: Option<NodeId>,
    default_cancel: Option<NodeId>,
    current_scope: ScopeId,
}

impl FlowBuilder {
    /// Start building a flow with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            scopes: vec![ScopeDecl {
                parent: None,
                block: None,
            }],
            variables: Vec::new(),
            bindings: Vec::new(),
            updates: Vec::new(),
            initial: None,
            default_fault: None,
            default_cancel: None,
            current_scope: ScopeId::FLOW,
        }
    }

    // ── node creation ──────────────────────────────────────────────────

    /// Add an activity node of type `A` in the current scope.
    pub fn activity<A: Activity>(&mut self, name: &str) -> ActivityHandle<A> {
        let id = self.push_activity::<A>(name, None, None);
        ActivityHandle {
            id,
            _marker: PhantomData,
        }
    }

    /// Add a fault-handler node of type `H` in the current scope.
    ///
    /// Only types implementing [`FaultHandlerActivity`] can be created this
    /// way; the node is marked handler-capable and records the property that
    /// receives the captured fault.
    pub fn fault_handler<H: FaultHandlerActivity>(&mut self, name: &str) -> ActivityHandle<H> {
        let spec = HandlerSpec {
            fault_property: H::fault_input(),
        };
        let id = self.push_activity::<H>(name, Some(spec), None);
        ActivityHandle {
            id,
            _marker: PhantomData,
        }
    }

    /// Add a condition node with a boolean-valued predicate expression.
    ///
    /// # Panics
    ///
    /// Panics if the predicate reads a variable that is not visible from the
    /// current scope.
    pub fn condition(&mut self, name: &str, predicate: Expression) -> ConditionHandle {
        self.check_expression_scope(&predicate, self.current_scope, name);
        let id = self.push_node(NodeData {
            name: name.to_string(),
            scope: self.current_scope,
            kind: NodeKind::Condition(ConditionNode {
                predicate,
                on_true: None,
                on_false: None,
            }),
        });
        ConditionHandle { id }
    }

    /// Add a switch node dispatching on keys of type `K` produced by the
    /// chooser expression.
    ///
    /// # Panics
    ///
    /// Panics if the chooser reads a variable that is not visible from the
    /// current scope.
    pub fn switch<K: Serialize>(&mut self, name: &str, chooser: Expression) -> SwitchHandle<K> {
        self.check_expression_scope(&chooser, self.current_scope, name);
        let id = self.push_node(NodeData {
            name: name.to_string(),
            scope: self.current_scope,
            kind: NodeKind::Switch(SwitchNode {
                chooser,
                cases: Vec::new(),
                default: None,
                allow_partial: false,
            }),
        });
        SwitchHandle {
            id,
            _marker: PhantomData,
        }
    }

    /// Add a fork-join node. Children are appended with [`fork`](Self::fork)
    /// in call order.
    pub fn fork_join(&mut self, name: &str) -> ForkJoinHandle {
        let id = self.push_node(NodeData {
            name: name.to_string(),
            scope: self.current_scope,
            kind: NodeKind::ForkJoin(ForkJoinNode {
                children: Vec::new(),
                next: None,
                fault: None,
                cancel: None,
            }),
        });
        ForkJoinHandle { id }
    }

    /// Append a fork child of type `A` to a fork-join. Children run in
    /// parallel between the fork and the join barrier.
    pub fn fork<A: Activity>(&mut self, fork_join: &ForkJoinHandle, name: &str) -> ForkHandle<A> {
        let fj_id = fork_join.node_id();
        match &self.node(fj_id).kind {
            NodeKind::ForkJoin(_) => {}
            _ => panic!("fork target '{}' is not a fork-join node", self.node(fj_id).name),
        }
        let child = self.push_activity::<A>(name, None, Some(fj_id));
        match &mut self.node_mut(fj_id).kind {
            NodeKind::ForkJoin(fj) => fj.children.push(child),
            _ => unreachable!("kind checked above"),
        }
        ForkHandle {
            id: child,
            _marker: PhantomData,
        }
    }

    /// Add a block: a named sub-scope with its own nodes and variables.
    ///
    /// The closure receives this builder switched into the block's private
    /// scope and returns the handle of the block's initial node. Nodes and
    /// variables created inside the closure belong to the block; block-local
    /// variables are created on block entry and destroyed on block exit.
    ///
    /// # Panics
    ///
    /// Panics if the returned initial node was not created inside the block.
    pub fn block<H: NodeRef>(
        &mut self,
        name: &str,
        build: impl FnOnce(&mut FlowBuilder) -> H,
    ) -> BlockHandle {
        let inner_scope = ScopeId(self.scopes.len());
        self.scopes.push(ScopeDecl {
            parent: Some(self.current_scope),
            block: None,
        });
        let block_id = self.push_node(NodeData {
            name: name.to_string(),
            scope: self.current_scope,
            kind: NodeKind::Block(BlockNode {
                scope: inner_scope,
                initial: None,
                next: None,
            }),
        });
        self.scopes[inner_scope.0].block = Some(block_id);

        let outer_scope = self.current_scope;
        self.current_scope = inner_scope;
        let initial = build(&mut *self);
        self.current_scope = outer_scope;

        let initial_id = initial.node_id();
        assert!(
            self.node(initial_id).scope == inner_scope,
            "initial node '{}' of block '{}' was not created inside the block",
            self.node(initial_id).name,
            name,
        );
        match &mut self.node_mut(block_id).kind {
            NodeKind::Block(b) => b.initial = Some(initial_id),
            _ => unreachable!("block node created above"),
        }
        BlockHandle { id: block_id }
    }

    // ── flow-level wiring ──────────────────────────────────────────────

    /// Designate the flow's initial node.
    ///
    /// # Panics
    ///
    /// Panics if an initial node is already set or the node is not declared
    /// at flow scope.
    pub fn with_initial_node(&mut self, node: &impl NodeRef) {
        let id = node.node_id();
        if let Some(existing) = self.initial {
            panic!("initial node is already set to '{}'", self.node(existing).name);
        }
        assert!(
            self.node(id).scope == ScopeId::FLOW,
            "initial node '{}' must be declared at flow scope",
            self.node(id).name
        );
        self.initial = Some(id);
    }

    /// Designate the flow-wide default fault handler.
    ///
    /// # Panics
    ///
    /// Panics if a default fault handler is already set.
    pub fn with_default_fault_handler(&mut self, handler: &impl NodeRef) {
        assert!(
            self.default_fault.is_none(),
            "default fault handler is already set"
        );
        let id = handler.node_id();
        self.node(id); // existence check
        self.default_fault = Some(id);
    }

    /// Designate the flow-wide default cancellation handler.
    ///
    /// # Panics
    ///
    /// Panics if a default cancellation handler is already set.
    pub fn with_default_cancellation_handler(&mut self, handler: &impl NodeRef) {
        assert!(
            self.default_cancel.is_none(),
            "default cancellation handler is already set"
        );
        let id = handler.node_id();
        self.node(id);
        self.default_cancel = Some(id);
    }

    // ── edge wiring ────────────────────────────────────────────────────

    /// Connect a node to its unconditional successor (`next` for activities
    /// and blocks, the post-join continuation for fork-joins).
    ///
    /// # Panics
    ///
    /// Panics when the edge is already set, when `from` is a condition or
    /// switch (use the branch-specific methods), when `from` is a fork child
    /// (children settle at the join barrier), or when the edge would cross a
    /// scope boundary.
    pub fn connect(&mut self, from: &impl NodeRef, to: &impl NodeRef) {
        let (from_id, to_id) = (from.node_id(), to.node_id());
        self.assert_same_scope(from_id, to_id);
        let from_name = self.node(from_id).name.clone();
        match &mut self.node_mut(from_id).kind {
            NodeKind::Activity(a) => {
                assert!(
                    a.fork_child_of.is_none(),
                    "fork child '{from_name}' cannot have a next successor; it settles at the join barrier"
                );
                Self::set_edge(&mut a.next, to_id, "next", &from_name);
            }
            NodeKind::ForkJoin(fj) => Self::set_edge(&mut fj.next, to_id, "join", &from_name),
            NodeKind::Block(b) => Self::set_edge(&mut b.next, to_id, "next", &from_name),
            NodeKind::Condition(_) => {
                panic!("condition '{from_name}' uses connect_true/connect_false")
            }
            NodeKind::Switch(_) => {
                panic!("switch '{from_name}' uses connect_case/connect_default")
            }
        }
    }

    /// Connect a node to its fault handler. Valid for activities (including
    /// fork children) and fork-joins.
    ///
    /// # Panics
    ///
    /// Panics when the edge is already set, when `from` cannot carry a fault
    /// edge, or when the handler is not in the same scope or an enclosing
    /// scope of `from`.
    pub fn connect_fault(&mut self, from: &impl NodeRef, handler: &impl NodeRef) {
        let (from_id, handler_id) = (from.node_id(), handler.node_id());
        self.assert_handler_scope(from_id, handler_id);
        let from_name = self.node(from_id).name.clone();
        match &mut self.node_mut(from_id).kind {
            NodeKind::Activity(a) => Self::set_edge(&mut a.fault, handler_id, "fault", &from_name),
            NodeKind::ForkJoin(fj) => {
                Self::set_edge(&mut fj.fault, handler_id, "fault", &from_name)
            }
            _ => panic!("node '{from_name}' cannot have a fault handler edge"),
        }
    }

    /// Connect a node to its cancellation handler. Valid for activities
    /// (including fork children) and fork-joins.
    ///
    /// # Panics
    ///
    /// Same conditions as [`connect_fault`](Self::connect_fault).
    pub fn connect_cancellation(&mut self, from: &impl NodeRef, handler: &impl NodeRef) {
        let (from_id, handler_id) = (from.node_id(), handler.node_id());
        self.assert_handler_scope(from_id, handler_id);
        let from_name = self.node(from_id).name.clone();
        match &mut self.node_mut(from_id).kind {
            NodeKind::Activity(a) => {
                Self::set_edge(&mut a.cancel, handler_id, "cancel", &from_name)
            }
            NodeKind::ForkJoin(fj) => {
                Self::set_edge(&mut fj.cancel, handler_id, "cancel", &from_name)
            }
            _ => panic!("node '{from_name}' cannot have a cancellation handler edge"),
        }
    }

    /// Connect a condition's true branch.
    ///
    /// # Panics
    ///
    /// Panics when the branch is already set or the edge crosses scopes.
    pub fn connect_true(&mut self, condition: &ConditionHandle, to: &impl NodeRef) {
        let (from_id, to_id) = (condition.node_id(), to.node_id());
        self.assert_same_scope(from_id, to_id);
        let from_name = self.node(from_id).name.clone();
        match &mut self.node_mut(from_id).kind {
            NodeKind::Condition(c) => Self::set_edge(&mut c.on_true, to_id, "true", &from_name),
            _ => unreachable!("ConditionHandle always names a condition"),
        }
    }

    /// Connect a condition's false branch.
    ///
    /// # Panics
    ///
    /// Panics when the branch is already set or the edge crosses scopes.
    pub fn connect_false(&mut self, condition: &ConditionHandle, to: &impl NodeRef) {
        let (from_id, to_id) = (condition.node_id(), to.node_id());
        self.assert_same_scope(from_id, to_id);
        let from_name = self.node(from_id).name.clone();
        match &mut self.node_mut(from_id).kind {
            NodeKind::Condition(c) => Self::set_edge(&mut c.on_false, to_id, "false", &from_name),
            _ => unreachable!("ConditionHandle always names a condition"),
        }
    }

    /// Map a switch case value to a successor.
    ///
    /// # Panics
    ///
    /// Panics when the key collides with an existing case, the key fails to
    /// serialize, or the edge crosses scopes.
    pub fn connect_case<K: Serialize>(
        &mut self,
        switch: &SwitchHandle<K>,
        key: K,
        to: &impl NodeRef,
    ) {
        let (from_id, to_id) = (switch.node_id(), to.node_id());
        self.assert_same_scope(from_id, to_id);
        let from_name = self.node(from_id).name.clone();
        let key = match serde_json::to_value(key) {
            Ok(k) => k,
            Err(err) => panic!("switch '{from_name}' case key failed to serialize: {err}"),
        };
        match &mut self.node_mut(from_id).kind {
            NodeKind::Switch(s) => {
                assert!(
                    s.cases.iter().all(|(existing, _)| *existing != key),
                    "switch '{}' already has a case for key {}",
                    from_name,
                    crate::node::key_display(&key)
                );
                s.cases.push((key, to_id));
            }
            _ => unreachable!("SwitchHandle always names a switch"),
        }
    }

    /// Connect a switch's default branch.
    ///
    /// # Panics
    ///
    /// Panics when the default is already set or the edge crosses scopes.
    pub fn connect_default<K>(&mut self, switch: &SwitchHandle<K>, to: &impl NodeRef) {
        let (from_id, to_id) = (switch.node_id(), to.node_id());
        self.assert_same_scope(from_id, to_id);
        let from_name = self.node(from_id).name.clone();
        match &mut self.node_mut(from_id).kind {
            NodeKind::Switch(s) => Self::set_edge(&mut s.default, to_id, "default", &from_name),
            _ => unreachable!("SwitchHandle always names a switch"),
        }
    }

    /// Mark a switch as intentionally partial: validation will accept it
    /// without a default branch. An unmapped key then faults at runtime.
    pub fn allow_partial_coverage<K>(&mut self, switch: &SwitchHandle<K>) {
        let from_id = switch.node_id();
        match &mut self.node_mut(from_id).kind {
            NodeKind::Switch(s) => s.allow_partial = true,
            _ => unreachable!("SwitchHandle always names a switch"),
        }
    }

    // ── bindings ───────────────────────────────────────────────────────

    /// Start binding an input property of an activity (or fork child).
    ///
    /// # Panics
    ///
    /// Panics when the owner is not an activity node.
    pub fn bind<'a>(&'a mut self, owner: &impl NodeRef, property: &str) -> BindingBuilder<'a> {
        let owner_id = owner.node_id();
        assert!(
            self.node(owner_id).as_activity().is_some(),
            "bindings target activity nodes; '{}' is not one",
            self.node(owner_id).name
        );
        BindingBuilder {
            builder: self,
            owner: owner_id,
            property: property.to_string(),
        }
    }

    // ── variables ──────────────────────────────────────────────────────

    /// Declare an uninitialized variable in the current scope.
    pub fn variable<T>(&mut self, name: &str) -> VariableHandle<T> {
        self.push_variable(name, None)
    }

    /// Declare a variable in the current scope with an initial value.
    ///
    /// # Panics
    ///
    /// Panics when the initial value fails to serialize.
    pub fn variable_with_initial<T: Serialize>(
        &mut self,
        name: &str,
        initial: T,
    ) -> VariableHandle<T> {
        let value = match serde_json::to_value(initial) {
            Ok(v) => v,
            Err(err) => panic!("initial value of variable '{name}' failed to serialize: {err}"),
        };
        self.push_variable(name, Some(value))
    }

    /// Shorthand: assign the source's result to the variable whenever the
    /// source completes. Equivalent to
    /// `after_completion_of(source).assign_result(var)`.
    pub fn bind_variable_to_result_of<T>(
        &mut self,
        var: &VariableHandle<T>,
        source: &(impl ResultSource + NodeRef),
    ) {
        self.after_completion_of(source).assign_result(var);
    }

    /// Schedule variable updates to run after an activity completes
    /// successfully. Updates for one trigger run in declaration order,
    /// after the result thunk is populated and before the successor starts.
    ///
    /// # Panics
    ///
    /// Panics when the trigger is not an activity node.
    pub fn after_completion_of<'a>(&'a mut self, trigger: &impl NodeRef) -> UpdateActions<'a> {
        let trigger_id = trigger.node_id();
        assert!(
            self.node(trigger_id).as_activity().is_some(),
            "variable updates are triggered by activities; '{}' is not one",
            self.node(trigger_id).name
        );
        UpdateActions {
            builder: self,
            trigger: trigger_id,
        }
    }

    // ── finish ─────────────────────────────────────────────────────────

    /// Freeze the graph into an immutable [`Flow`].
    ///
    /// The flow is not yet checked: call [`Flow::validate`] to obtain the
    /// diagnostics, or [`Flow::run`] which validates first.
    pub fn build(self) -> Flow {
        Flow::from_core(FlowCore {
            name: self.name,
            nodes: self.nodes,
            scopes: self.scopes,
            variables: self.variables,
            bindings: self.bindings,
            updates: self.updates,
            initial: self.initial,
            default_fault: self.default_fault,
            default_cancel: self.default_cancel,
        })
    }

    // ── internals ──────────────────────────────────────────────────────

    fn push_activity<A: Activity>(
        &mut self,
        name: &str,
        handler: Option<HandlerSpec>,
        fork_child_of: Option<NodeId>,
    ) -> NodeId {
        self.push_node(NodeData {
            name: name.to_string(),
            scope: self.current_scope,
            kind: NodeKind::Activity(ActivityNode {
                token: ActivityToken::of::<A>(),
                required_inputs: A::required_inputs(),
                handler,
                fork_child_of,
                next: None,
                fault: None,
                cancel: None,
            }),
        })
    }

    fn push_node(&mut self, node: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    fn push_variable<T>(&mut self, name: &str, initial: Option<Value>) -> VariableHandle<T> {
        let id = VarId(self.variables.len());
        self.variables.push(VariableDecl {
            name: name.to_string(),
            scope: self.current_scope,
            initial,
        });
        VariableHandle {
            id,
            _marker: PhantomData,
        }
    }

    fn node(&self, id: NodeId) -> &NodeData {
        self.nodes
            .get(id.0)
            .unwrap_or_else(|| panic!("unknown node {id}; was the handle created by this builder?"))
    }

    fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        self.nodes
            .get_mut(id.0)
            .unwrap_or_else(|| panic!("unknown node {id}; was the handle created by this builder?"))
    }

    fn set_edge(slot: &mut Option<NodeId>, to: NodeId, label: &str, from_name: &str) {
        assert!(
            slot.is_none(),
            "'{label}' edge of '{from_name}' is already connected"
        );
        *slot = Some(to);
    }

    fn assert_same_scope(&self, from: NodeId, to: NodeId) {
        let (fs, ts) = (self.node(from).scope, self.node(to).scope);
        assert!(
            fs == ts,
            "edge from '{}' to '{}' crosses a scope boundary; control enters and leaves blocks only through the block node",
            self.node(from).name,
            self.node(to).name,
        );
    }

    /// Handlers may live in the node's own scope or any enclosing scope.
    fn assert_handler_scope(&self, from: NodeId, handler: NodeId) {
        let handler_scope = self.node(handler).scope;
        assert!(
            self.scope_visible(handler_scope, self.node(from).scope),
            "handler '{}' is not visible from '{}'",
            self.node(handler).name,
            self.node(from).name,
        );
    }

    /// Whether `target` is `from` itself or one of its ancestors.
    fn scope_visible(&self, target: ScopeId, from: ScopeId) -> bool {
        let mut cursor = Some(from);
        while let Some(scope) = cursor {
            if scope == target {
                return true;
            }
            cursor = self.scopes[scope.0].parent;
        }
        false
    }

    fn check_expression_scope(&self, expr: &Expression, owner_scope: ScopeId, context: &str) {
        for dep in &expr.reads {
            if let Dependency::Variable(var) = dep {
                let var_scope = self.variables[var.0].scope;
                assert!(
                    self.scope_visible(var_scope, owner_scope),
                    "expression of '{}' reads variable '{}' outside its scope",
                    context,
                    self.variables[var.0].name,
                );
            }
        }
    }
}

/// Second half of `bind(owner, property)`: selects the binding source.
pub struct BindingBuilder<'a> {
    builder: &'a mut FlowBuilder,
    owner: NodeId,
    property: String,
}

impl BindingBuilder<'_> {
    /// Bind the property to an eagerly-known constant.
    ///
    /// # Panics
    ///
    /// Panics when the value fails to serialize.
    pub fn to_constant(self, value: impl Serialize) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(err) => panic!(
                "constant for property '{}' failed to serialize: {err}",
                self.property
            ),
        };
        self.push(Binding::Constant(value));
    }

    /// Bind the property to another activity's result.
    pub fn to_result_of(self, source: &impl ResultSource) {
        let src = source.result_node();
        self.push(Binding::ResultOf(src));
    }

    /// Bind the property to a late-bound expression.
    ///
    /// # Panics
    ///
    /// Panics when the expression reads a variable that is not visible from
    /// the owner's scope.
    pub fn to_expression(self, expression: Expression) {
        let owner_scope = self.builder.node(self.owner).scope;
        let owner_name = self.builder.node(self.owner).name.clone();
        self.builder
            .check_expression_scope(&expression, owner_scope, &owner_name);
        self.push(Binding::Expression(expression));
    }

    fn push(self, binding: Binding) {
        self.builder.bindings.push(BindingDecl {
            owner: self.owner,
            property: self.property,
            binding,
        });
    }
}

/// Chainable variable-update scheduler returned by
/// [`FlowBuilder::after_completion_of`].
pub struct UpdateActions<'a> {
    builder: &'a mut FlowBuilder,
    trigger: NodeId,
}

impl UpdateActions<'_> {
    /// Assign an eagerly-known value when the trigger completes.
    ///
    /// # Panics
    ///
    /// Panics when the value fails to serialize.
    pub fn assign<T: Serialize>(self, var: &VariableHandle<T>, value: T) -> Self {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(err) => panic!("assigned value failed to serialize: {err}"),
        };
        self.push(var, UpdateOp::Assign(value))
    }

    /// Assign the trigger activity's result when it completes.
    pub fn assign_result<T>(self, var: &VariableHandle<T>) -> Self {
        self.push(var, UpdateOp::AssignResult)
    }

    /// Transform the variable with a function of its current value
    /// (`None` while uninitialized).
    pub fn update<T, F>(self, var: &VariableHandle<T>, f: F) -> Self
    where
        T: Serialize + DeserializeOwned,
        F: Fn(Option<T>) -> T + Send + Sync + 'static,
    {
        let wrapped: crate::node::UpdateFn = Arc::new(move |current| {
            let current = current
                .map(serde_json::from_value::<T>)
                .transpose()
                .map_err(ActivityError::from)?;
            serde_json::to_value(f(current)).map_err(ActivityError::from)
        });
        self.push(var, UpdateOp::Update(wrapped))
    }

    fn push<T>(self, var: &VariableHandle<T>, op: UpdateOp) -> Self {
        self.builder.updates.push(UpdateAction {
            trigger: self.trigger,
            var: var.id(),
            op,
        });
        self
    }
}
