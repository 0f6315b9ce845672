//! Flow graph data model
//!
//! Nodes are stored in a flat `Vec` owned by the flow; every edge is a
//! [`NodeId`] index into that store rather than a pointer. This keeps the
//! in-memory representation acyclic even when the flow graph contains loops,
//! and it lets the validator and the export module walk edges without
//! touching executor state.
//!
//! Variables and scopes follow the same scheme: [`VarId`] and [`ScopeId`]
//! index flat declaration tables. Scope 0 is always the flow-wide scope;
//! every block introduces one child scope.

use crate::activity::ActivityToken;
use crate::binding::{Binding, Expression};
use crate::error::ActivityError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Identifier of a node in the flow graph.
///
/// Ids are dense indices assigned by the builder in creation order. They are
/// only meaningful within the flow that created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub(crate) usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identifier of a variable declared on a flow or block scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarId(pub(crate) usize);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Identifier of a scope. Scope 0 is the flow-wide scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(pub(crate) usize);

impl ScopeId {
    /// The flow-wide scope that global variables live in.
    pub const FLOW: ScopeId = ScopeId(0);
}

/// Label attached to an outgoing edge, used by validation, traversal, and
/// graph export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeLabel {
    /// Unconditional successor of an activity, or a block's initial child.
    Next,
    /// Transition to a fault handler.
    Fault,
    /// Transition to a cancellation handler.
    Cancel,
    /// Condition's successor when the predicate holds.
    True,
    /// Condition's successor when the predicate does not hold.
    False,
    /// Switch case keyed by the rendered key value.
    Case(String),
    /// Switch default branch.
    Default,
    /// The i-th fork child of a fork-join.
    Fork(usize),
    /// Continuation after a fork-join's barrier or a block's exit.
    Join,
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeLabel::Next => write!(f, "next"),
            EdgeLabel::Fault => write!(f, "fault"),
            EdgeLabel::Cancel => write!(f, "cancel"),
            EdgeLabel::True => write!(f, "true"),
            EdgeLabel::False => write!(f, "false"),
            EdgeLabel::Case(key) => write!(f, "case({key})"),
            EdgeLabel::Default => write!(f, "default"),
            EdgeLabel::Fork(i) => write!(f, "fork_{i}"),
            EdgeLabel::Join => write!(f, "join"),
        }
    }
}

/// Renders a switch key for edge labels and diagnostics.
pub(crate) fn key_display(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A node in the flow graph: shared attributes plus a variant payload.
#[derive(Debug, Clone)]
pub(crate) struct NodeData {
    pub name: String,
    pub scope: ScopeId,
    pub kind: NodeKind,
}

/// Variant payload of a node.
#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Activity(ActivityNode),
    Condition(ConditionNode),
    Switch(SwitchNode),
    ForkJoin(ForkJoinNode),
    Block(BlockNode),
}

/// Marks a node as fault-handler capable and names the input property that
/// receives the captured fault.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HandlerSpec {
    pub fault_property: &'static str,
}

/// An activity node. Fault handlers and fork children are activity nodes
/// with extra attributes (`handler`, `fork_child_of`).
#[derive(Debug, Clone)]
pub(crate) struct ActivityNode {
    pub token: ActivityToken,
    pub required_inputs: &'static [&'static str],
    pub handler: Option<HandlerSpec>,
    pub fork_child_of: Option<NodeId>,
    pub next: Option<NodeId>,
    pub fault: Option<NodeId>,
    pub cancel: Option<NodeId>,
}

/// A condition node: nullary boolean predicate with two successors.
#[derive(Debug, Clone)]
pub(crate) struct ConditionNode {
    pub predicate: Expression,
    pub on_true: Option<NodeId>,
    pub on_false: Option<NodeId>,
}

/// A switch node: a choice expression dispatched over case values.
#[derive(Debug, Clone)]
pub(crate) struct SwitchNode {
    pub chooser: Expression,
    pub cases: Vec<(Value, NodeId)>,
    pub default: Option<NodeId>,
    pub allow_partial: bool,
}

/// A fork-join node: an ordered list of fork children run in parallel.
#[derive(Debug, Clone)]
pub(crate) struct ForkJoinNode {
    pub children: Vec<NodeId>,
    pub next: Option<NodeId>,
    pub fault: Option<NodeId>,
    pub cancel: Option<NodeId>,
}

/// A block node: a named sub-scope with its own nodes and variables.
#[derive(Debug, Clone)]
pub(crate) struct BlockNode {
    pub scope: ScopeId,
    pub initial: Option<NodeId>,
    pub next: Option<NodeId>,
}

impl NodeData {
    /// All outgoing edges of this node with their labels, in a stable order.
    pub(crate) fn edges(&self) -> Vec<(EdgeLabel, NodeId)> {
        let mut edges = Vec::new();
        match &self.kind {
            NodeKind::Activity(a) => {
                if let Some(n) = a.next {
                    edges.push((EdgeLabel::Next, n));
                }
                if let Some(h) = a.fault {
                    edges.push((EdgeLabel::Fault, h));
                }
                if let Some(h) = a.cancel {
                    edges.push((EdgeLabel::Cancel, h));
                }
            }
            NodeKind::Condition(c) => {
                if let Some(t) = c.on_true {
                    edges.push((EdgeLabel::True, t));
                }
                if let Some(f) = c.on_false {
                    edges.push((EdgeLabel::False, f));
                }
            }
            NodeKind::Switch(s) => {
                for (key, target) in &s.cases {
                    edges.push((EdgeLabel::Case(key_display(key)), *target));
                }
                if let Some(d) = s.default {
                    edges.push((EdgeLabel::Default, d));
                }
            }
            NodeKind::ForkJoin(fj) => {
                for (i, child) in fj.children.iter().enumerate() {
                    edges.push((EdgeLabel::Fork(i), *child));
                }
                if let Some(n) = fj.next {
                    edges.push((EdgeLabel::Join, n));
                }
                if let Some(h) = fj.fault {
                    edges.push((EdgeLabel::Fault, h));
                }
                if let Some(h) = fj.cancel {
                    edges.push((EdgeLabel::Cancel, h));
                }
            }
            NodeKind::Block(b) => {
                if let Some(init) = b.initial {
                    edges.push((EdgeLabel::Next, init));
                }
                if let Some(n) = b.next {
                    edges.push((EdgeLabel::Join, n));
                }
            }
        }
        edges
    }

    pub(crate) fn as_activity(&self) -> Option<&ActivityNode> {
        match &self.kind {
            NodeKind::Activity(a) => Some(a),
            _ => None,
        }
    }
}

/// Declaration of a scope. `block` points at the block node owning the
/// scope; the flow scope has neither parent nor block.
#[derive(Debug, Clone)]
pub(crate) struct ScopeDecl {
    pub parent: Option<ScopeId>,
    pub block: Option<NodeId>,
}

/// Declaration of a variable: name, scope, and optional initial value.
#[derive(Debug, Clone)]
pub(crate) struct VariableDecl {
    pub name: String,
    pub scope: ScopeId,
    pub initial: Option<Value>,
}

/// A binding declared against an activity's input property.
#[derive(Debug, Clone)]
pub(crate) struct BindingDecl {
    pub owner: NodeId,
    pub property: String,
    pub binding: Binding,
}

/// Function applied by an [`UpdateOp::Update`] action. Receives the current
/// value (`None` when uninitialized) and produces the new value.
pub(crate) type UpdateFn = Arc<dyn Fn(Option<Value>) -> Result<Value, ActivityError> + Send + Sync>;

/// One post-completion variable update: when `trigger` completes
/// successfully, apply `op` to `var`.
#[derive(Clone)]
pub(crate) struct UpdateAction {
    pub trigger: NodeId,
    pub var: VarId,
    pub op: UpdateOp,
}

/// Update operation of an [`UpdateAction`].
#[derive(Clone)]
pub(crate) enum UpdateOp {
    /// Assign an eagerly-known value.
    Assign(Value),
    /// Assign the trigger activity's result.
    AssignResult,
    /// Transform the current value with a function.
    Update(UpdateFn),
}

impl fmt::Debug for UpdateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOp::Assign(v) => f.debug_tuple("Assign").field(v).finish(),
            UpdateOp::AssignResult => write!(f, "AssignResult"),
            UpdateOp::Update(_) => f.debug_tuple("Update").field(&"<function>").finish(),
        }
    }
}

impl fmt::Debug for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateAction")
            .field("trigger", &self.trigger)
            .field("var", &self.var)
            .field("op", &self.op)
            .finish()
    }
}
