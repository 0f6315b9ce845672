//! Bindings and late-bound expressions
//!
//! A **binding** maps one input property of an activity to a source resolved
//! just before the activity runs:
//!
//! - a constant, copied as-is;
//! - the result of another activity, read from its thunk (which must be
//!   populated — the validator proves this ahead of time);
//! - an expression, evaluated against the live run state.
//!
//! Expressions declare their read set up front. Each result or variable an
//! expression touches is registered when the expression is built, via the
//! typed accessors handed out by the builder
//! ([`ActivityHandle::result`](crate::ActivityHandle::result) and
//! [`VariableHandle`](crate::VariableHandle)). The validator uses the
//! declared set for its liveness pass, and the evaluation scope enforces it
//! at runtime: reading something undeclared fails.
//!
//! ```rust,ignore
//! let total = adder.result();
//! let expr = Expression::new(move |scope| {
//!     Ok(serde_json::json!(scope.result(&total)? * 2))
//! })
//! .reading_result(&total);
//! ```

use crate::error::ActivityError;
use crate::node::{NodeId, VarId};
use crate::state::{EvalScope, ResultRef};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// One entry of an expression's declared read set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// The result thunk of an activity node.
    Result(NodeId),
    /// A flow or block variable.
    Variable(VarId),
}

pub(crate) type EvalFn =
    Arc<dyn for<'a> Fn(&EvalScope<'a>) -> Result<Value, ActivityError> + Send + Sync>;

/// A late-bound expression with a declared read set.
///
/// Expressions back three constructs: expression bindings, condition
/// predicates (boolean-valued), and switch choosers (key-valued). They are
/// nullary — everything they consume comes from the [`EvalScope`].
#[derive(Clone)]
pub struct Expression {
    pub(crate) reads: Vec<Dependency>,
    pub(crate) eval: EvalFn,
}

impl Expression {
    /// Create an expression from an evaluation function. Chain
    /// [`reading_result`](Self::reading_result) and
    /// [`reading_variable`](Self::reading_variable) to declare what it reads.
    pub fn new(
        eval: impl for<'a> Fn(&EvalScope<'a>) -> Result<Value, ActivityError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            reads: Vec::new(),
            eval: Arc::new(eval),
        }
    }

    /// Declare that the expression reads the given activity result.
    pub fn reading_result<T>(mut self, source: &ResultRef<T>) -> Self {
        self.reads.push(Dependency::Result(source.source()));
        self
    }

    /// Declare that the expression reads the given variable.
    pub fn reading_variable<T>(mut self, var: &crate::builder::VariableHandle<T>) -> Self {
        self.reads.push(Dependency::Variable(var.id()));
        self
    }

    pub(crate) fn evaluate(&self, scope: &EvalScope<'_>) -> Result<Value, ActivityError> {
        (self.eval)(scope)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("reads", &self.reads)
            .field("eval", &"<function>")
            .finish()
    }
}

/// A binding targeting one named input property of an activity.
#[derive(Clone)]
pub(crate) enum Binding {
    /// Eagerly-known value, copied at resolution time.
    Constant(Value),
    /// The result of another activity, read from its thunk.
    ResultOf(NodeId),
    /// A late-bound expression evaluated at resolution time.
    Expression(Expression),
}

impl Binding {
    /// Result dependencies this binding introduces, for the liveness pass.
    pub(crate) fn result_dependencies(&self) -> Vec<NodeId> {
        match self {
            Binding::Constant(_) => Vec::new(),
            Binding::ResultOf(src) => vec![*src],
            Binding::Expression(expr) => expr
                .reads
                .iter()
                .filter_map(|dep| match dep {
                    Dependency::Result(id) => Some(*id),
                    Dependency::Variable(_) => None,
                })
                .collect(),
        }
    }

    /// Variable dependencies this binding introduces, for the scope pass.
    pub(crate) fn variable_dependencies(&self) -> Vec<VarId> {
        match self {
            Binding::Expression(expr) => expr
                .reads
                .iter()
                .filter_map(|dep| match dep {
                    Dependency::Variable(id) => Some(*id),
                    Dependency::Result(_) => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Binding::ResultOf(id) => f.debug_tuple("ResultOf").field(id).finish(),
            Binding::Expression(e) => f.debug_tuple("Expression").field(e).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_result_dependencies() {
        let binding = Binding::ResultOf(NodeId(2));
        assert_eq!(binding.result_dependencies(), vec![NodeId(2)]);
        assert!(binding.variable_dependencies().is_empty());
    }

    #[test]
    fn test_expression_declares_reads() {
        let source: ResultRef<i64> = ResultRef::new(NodeId(1));
        let expr = Expression::new(|_scope| Ok(Value::Null)).reading_result(&source);
        assert_eq!(expr.reads, vec![Dependency::Result(NodeId(1))]);

        let binding = Binding::Expression(expr);
        assert_eq!(binding.result_dependencies(), vec![NodeId(1)]);
    }
}
