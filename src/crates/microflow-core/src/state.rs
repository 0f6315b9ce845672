//! Run-scoped state: result thunks and variables
//!
//! [`RunState`] is the only shared mutable state of a run. It holds:
//!
//! - **Result thunks** — one lazy cell per activity node, `Pending` until
//!   the producing activity completes successfully, then `Ready` with the
//!   serialized result. Reads of a `Pending` thunk fail; the validator
//!   proves this cannot happen in a compliant flow, so the failure path is a
//!   defensive check only.
//! - **Variables** — scoped mutable cells. A variable exists in the store
//!   only while its declaring scope is live: flow-scope variables for the
//!   whole run, block-locals between block entry and exit.
//!
//! All access is through short, synchronous critical sections
//! (`parking_lot` locks); no lock is ever held across a suspension point.
//! Fork-join siblings are constrained by the validator to disjoint variable
//! write sets, so the locks only arbitrate store structure, not values.

use crate::binding::Dependency;
use crate::error::ActivityError;
use crate::node::{NodeId, UpdateFn, VarId};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;

/// Typed accessor for an activity's result thunk.
///
/// Obtained from [`ActivityHandle::result`](crate::ActivityHandle::result);
/// used to declare expression read sets and to read the value inside an
/// expression via [`EvalScope::result`].
pub struct ResultRef<T> {
    source: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ResultRef<T> {
    pub(crate) fn new(source: NodeId) -> Self {
        Self {
            source,
            _marker: PhantomData,
        }
    }

    /// Node whose result this accessor reads.
    pub fn source(&self) -> NodeId {
        self.source
    }
}

impl<T> Clone for ResultRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ResultRef<T> {}

/// Shared state of one flow run.
#[derive(Default)]
pub(crate) struct RunState {
    results: RwLock<HashMap<NodeId, Value>>,
    variables: RwLock<HashMap<VarId, Option<Value>>>,
}

impl RunState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Populate a result thunk. Called by the executor exactly once per
    /// successful completion of the producer; a looped-back producer
    /// repopulates its thunk on each completion.
    pub(crate) fn complete(&self, node: NodeId, value: Value) {
        self.results.write().insert(node, value);
    }

    /// Read a result thunk. Fails while the producer has not completed.
    pub(crate) fn result(&self, node: NodeId) -> Result<Value, ActivityError> {
        self.results.read().get(&node).cloned().ok_or_else(|| {
            ActivityError::new(format!("result of node {node} is not ready"))
        })
    }

    /// Bring a variable into scope with its declared initial value.
    pub(crate) fn enter_variable(&self, var: VarId, initial: Option<Value>) {
        self.variables.write().insert(var, initial);
    }

    /// Drop a variable when its scope exits.
    pub(crate) fn exit_variable(&self, var: VarId) {
        self.variables.write().remove(&var);
    }

    /// Read a variable. Fails when the variable is out of scope or
    /// uninitialized.
    pub(crate) fn read_variable(&self, var: VarId) -> Result<Value, ActivityError> {
        match self.variables.read().get(&var) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(ActivityError::new(format!(
                "variable {var} has not been initialized"
            ))),
            None => Err(ActivityError::new(format!("variable {var} is not in scope"))),
        }
    }

    /// Assign a variable. Fails when the variable is out of scope.
    pub(crate) fn write_variable(&self, var: VarId, value: Value) -> Result<(), ActivityError> {
        match self.variables.write().get_mut(&var) {
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
            None => Err(ActivityError::new(format!("variable {var} is not in scope"))),
        }
    }

    /// Transform a variable with an update function. The function sees
    /// `None` while the variable is uninitialized.
    pub(crate) fn update_variable(&self, var: VarId, f: &UpdateFn) -> Result<Value, ActivityError> {
        let current = match self.variables.read().get(&var) {
            Some(slot) => slot.clone(),
            None => {
                return Err(ActivityError::new(format!("variable {var} is not in scope")))
            }
        };
        let next = f(current)?;
        self.write_variable(var, next.clone())?;
        Ok(next)
    }
}

/// Read view handed to expressions during evaluation.
///
/// The scope enforces the expression's declared read set: accessing a result
/// or variable that was not declared with
/// [`Expression::reading_result`](crate::Expression::reading_result) /
/// [`reading_variable`](crate::Expression::reading_variable) fails, which
/// keeps the validator's liveness analysis sound.
pub struct EvalScope<'a> {
    state: &'a RunState,
    allowed: &'a [Dependency],
}

impl<'a> EvalScope<'a> {
    pub(crate) fn new(state: &'a RunState, allowed: &'a [Dependency]) -> Self {
        Self { state, allowed }
    }

    /// Read an activity result, deserialized into `T`.
    pub fn result<T: DeserializeOwned>(&self, source: &ResultRef<T>) -> Result<T, ActivityError> {
        let id = source.source();
        if !self.allowed.contains(&Dependency::Result(id)) {
            return Err(ActivityError::new(format!(
                "expression reads result of {id} without declaring it"
            )));
        }
        let value = self.state.result(id)?;
        serde_json::from_value(value).map_err(ActivityError::from)
    }

    /// Read a variable, deserialized into `T`.
    pub fn variable<T: DeserializeOwned>(
        &self,
        var: &crate::builder::VariableHandle<T>,
    ) -> Result<T, ActivityError> {
        let id = var.id();
        if !self.allowed.contains(&Dependency::Variable(id)) {
            return Err(ActivityError::new(format!(
                "expression reads variable {id} without declaring it"
            )));
        }
        let value = self.state.read_variable(id)?;
        serde_json::from_value(value).map_err(ActivityError::from)
    }
}
