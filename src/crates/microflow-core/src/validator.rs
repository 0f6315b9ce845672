//! Pre-execution graph validation
//!
//! [`validate`] runs a sequence of passes over a built flow and returns a
//! [`ValidationReport`]: structured diagnostics, never exceptions. Execution
//! is refused while any error is present.
//!
//! Passes, in order:
//!
//! 1. **Reference integrity** — every id points at an existing node
//!    ([`DiagnosticCode::DanglingEdge`]); exactly one initial node exists
//!    ([`DiagnosticCode::MissingInitialNode`]). Later passes run only on a
//!    referentially sound graph.
//! 2. **Reachability** — nodes unreachable from the initial node (or the
//!    flow-wide default handlers) are warnings; later passes consider only
//!    reachable nodes.
//! 3. **Handler coverage** — every reachable activity and fork-join has an
//!    effective fault and cancellation handler (own edge or flow default).
//!    Nodes reachable *only* through handler edges are exempt: handler
//!    faults terminate the run by rule and are never re-dispatched. A
//!    handler that also sits on an ordinary control path is checked like
//!    any other node.
//! 4. **Handler types** — fault-handler targets implement the fault-handler
//!    capability; cancellation targets are activities.
//! 5. **Required inputs** — each required property has exactly one binding.
//! 6. **Binding liveness** — every result read (direct `to_result_of`, or
//!    declared inside an expression) names a producer that has completed on
//!    *every* path reaching the reader. Computed as a forward intersection
//!    dataflow where only an activity's success edge marks it completed;
//!    fault and cancellation edges do not. Fork children inherit the facts
//!    of the fork-join entry and nothing from siblings; the join edge makes
//!    all children available downstream.
//! 7. **Switch coverage** — a default branch, or an explicit
//!    partial-coverage marker.
//! 8. **Fork-joins** — at least one child; no path from a child back into
//!    its own fork-join.
//! 9. **Variable scope** — expression reads and update actions touch only
//!    in-scope variables; parallel fork children have disjoint variable
//!    write sets.
//!
//! Diagnostics are produced in node-id order, so validating an unmodified
//! flow twice yields identical reports.

use crate::flow::FlowCore;
use crate::node::{EdgeLabel, NodeId, NodeKind, ScopeId, VarId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Stable, closed set of diagnostic codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    MissingInitialNode,
    DanglingEdge,
    UnreachableNode,
    MissingFaultHandler,
    MissingCancellationHandler,
    InvalidFaultHandlerType,
    MissingRequiredInput,
    DuplicateBinding,
    ResultReadBeforeProducer,
    NonDefaultedPartialSwitch,
    ForkJoinCycle,
    ForkJoinEmpty,
    VariableOutOfScope,
    ParallelVariableWriteConflict,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub message: String,
    /// Node the finding is anchored to, when one exists.
    pub node: Option<NodeId>,
}

/// Result of validating a flow: errors refuse execution, warnings do not.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl ValidationReport {
    /// Whether the flow may execute.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether any error with the given code is present.
    pub fn has_error(&self, code: DiagnosticCode) -> bool {
        self.errors.iter().any(|d| d.code == code)
    }

    fn error(&mut self, code: DiagnosticCode, node: Option<NodeId>, message: impl Into<String>) {
        self.errors.push(Diagnostic {
            code,
            message: message.into(),
            node,
        });
    }

    fn warning(&mut self, code: DiagnosticCode, node: Option<NodeId>, message: impl Into<String>) {
        self.warnings.push(Diagnostic {
            code,
            message: message.into(),
            node,
        });
    }
}

pub(crate) fn validate(flow: &FlowCore) -> ValidationReport {
    let mut v = Validator {
        flow,
        report: ValidationReport::default(),
    };
    let Some(initial) = v.check_references() else {
        return v.report;
    };
    let reachable = v.compute_reachability(initial);
    v.check_handler_coverage(initial, &reachable);
    v.check_handler_types(&reachable);
    v.check_required_inputs(&reachable);
    v.check_binding_liveness(initial, &reachable);
    v.check_switch_coverage(&reachable);
    v.check_fork_joins(&reachable);
    v.check_variable_scopes(&reachable);
    v.check_parallel_writes(&reachable);
    v.report
}

struct Validator<'f> {
    flow: &'f FlowCore,
    report: ValidationReport,
}

/// One edge of the liveness graph. Traversing it makes the activities in
/// `completes` guaranteed-completed at the target.
struct LiveEdge {
    to: NodeId,
    completes: Vec<NodeId>,
}

impl Validator<'_> {
    fn name(&self, id: NodeId) -> &str {
        &self.flow.node(id).name
    }

    fn in_bounds(&self, id: NodeId) -> bool {
        self.flow.try_node(id).is_some()
    }

    // ── pass 1: reference integrity ────────────────────────────────────

    fn check_references(&mut self) -> Option<NodeId> {
        let initial = match self.flow.initial {
            None => {
                self.report.error(
                    DiagnosticCode::MissingInitialNode,
                    None,
                    "flow has no initial node",
                );
                return None;
            }
            Some(id) if !self.in_bounds(id) => {
                self.report.error(
                    DiagnosticCode::DanglingEdge,
                    None,
                    format!("initial node {id} does not exist"),
                );
                return None;
            }
            Some(id) => id,
        };

        let before = self.report.errors.len();
        for (slot, what) in [
            (self.flow.default_fault, "default fault handler"),
            (self.flow.default_cancel, "default cancellation handler"),
        ] {
            if let Some(id) = slot {
                if !self.in_bounds(id) {
                    self.report.error(
                        DiagnosticCode::DanglingEdge,
                        None,
                        format!("{what} {id} does not exist"),
                    );
                }
            }
        }
        for id in self.flow.node_ids() {
            for (label, target) in self.flow.node(id).edges() {
                if !self.in_bounds(target) {
                    self.report.error(
                        DiagnosticCode::DanglingEdge,
                        Some(id),
                        format!("'{label}' edge of '{}' points at missing node {target}", self.name(id)),
                    );
                }
            }
        }
        for binding in &self.flow.bindings {
            if !self.in_bounds(binding.owner) {
                self.report.error(
                    DiagnosticCode::DanglingEdge,
                    None,
                    format!("binding of '{}' targets missing node {}", binding.property, binding.owner),
                );
                continue;
            }
            for src in binding.binding.result_dependencies() {
                if !self.in_bounds(src) {
                    self.report.error(
                        DiagnosticCode::DanglingEdge,
                        Some(binding.owner),
                        format!(
                            "binding of '{}' on '{}' reads missing node {src}",
                            binding.property,
                            self.name(binding.owner)
                        ),
                    );
                }
            }
        }
        for update in &self.flow.updates {
            if !self.in_bounds(update.trigger) {
                self.report.error(
                    DiagnosticCode::DanglingEdge,
                    None,
                    format!("variable update triggered by missing node {}", update.trigger),
                );
            }
        }
        (self.report.errors.len() == before).then_some(initial)
    }

    // ── pass 2: reachability ───────────────────────────────────────────

    fn compute_reachability(&mut self, initial: NodeId) -> Vec<bool> {
        let mut reachable = vec![false; self.flow.nodes.len()];
        let mut queue = VecDeque::new();
        // Default handlers are dispatch targets of every covered node, so
        // they count as implicitly reachable roots.
        for root in [Some(initial), self.flow.default_fault, self.flow.default_cancel]
            .into_iter()
            .flatten()
        {
            if !reachable[root.0] {
                reachable[root.0] = true;
                queue.push_back(root);
            }
        }
        while let Some(id) = queue.pop_front() {
            for (_, target) in self.flow.node(id).edges() {
                if !reachable[target.0] {
                    reachable[target.0] = true;
                    queue.push_back(target);
                }
            }
        }
        for id in self.flow.node_ids() {
            if !reachable[id.0] {
                self.report.warning(
                    DiagnosticCode::UnreachableNode,
                    Some(id),
                    format!("node '{}' is unreachable from the initial node", self.name(id)),
                );
            }
        }
        reachable
    }

    // ── pass 3: handler coverage ───────────────────────────────────────

    /// Nodes referenced as fault or cancellation handler targets.
    fn handler_targets(&self) -> HashSet<NodeId> {
        let mut targets = HashSet::new();
        for id in self.flow.node_ids() {
            match &self.flow.node(id).kind {
                NodeKind::Activity(a) => {
                    targets.extend(a.fault);
                    targets.extend(a.cancel);
                }
                NodeKind::ForkJoin(fj) => {
                    targets.extend(fj.fault);
                    targets.extend(fj.cancel);
                }
                _ => {}
            }
        }
        targets.extend(self.flow.default_fault);
        targets.extend(self.flow.default_cancel);
        targets
    }

    /// Nodes reachable from the initial node through ordinary control edges
    /// only; fault and cancellation edges do not count.
    fn ordinary_reachable(&self, initial: NodeId) -> Vec<bool> {
        let mut reachable = vec![false; self.flow.nodes.len()];
        reachable[initial.0] = true;
        let mut queue = VecDeque::from([initial]);
        while let Some(id) = queue.pop_front() {
            for (label, target) in self.flow.node(id).edges() {
                if matches!(label, EdgeLabel::Fault | EdgeLabel::Cancel) {
                    continue;
                }
                if !reachable[target.0] {
                    reachable[target.0] = true;
                    queue.push_back(target);
                }
            }
        }
        reachable
    }

    fn check_handler_coverage(&mut self, initial: NodeId, reachable: &[bool]) {
        let handler_targets = self.handler_targets();
        let ordinary = self.ordinary_reachable(initial);
        for id in self.flow.node_ids() {
            if !reachable[id.0] {
                continue;
            }
            // A node reached only through handler edges needs no coverage:
            // its faults end the run and are never re-dispatched. A handler
            // that also sits on an ordinary path is checked like any other
            // node.
            if handler_targets.contains(&id) && !ordinary[id.0] {
                continue;
            }
            let needs_coverage = matches!(
                self.flow.node(id).kind,
                NodeKind::Activity(_) | NodeKind::ForkJoin(_)
            );
            if !needs_coverage {
                continue;
            }
            if self.flow.effective_fault(id).is_none() {
                self.report.error(
                    DiagnosticCode::MissingFaultHandler,
                    Some(id),
                    format!(
                        "'{}' has no fault handler and the flow has no default",
                        self.name(id)
                    ),
                );
            }
            if self.flow.effective_cancel(id).is_none() {
                self.report.error(
                    DiagnosticCode::MissingCancellationHandler,
                    Some(id),
                    format!(
                        "'{}' has no cancellation handler and the flow has no default",
                        self.name(id)
                    ),
                );
            }
        }
    }

    // ── pass 4: handler types ──────────────────────────────────────────

    fn check_handler_types(&mut self, reachable: &[bool]) {
        let mut fault_targets: Vec<NodeId> = Vec::new();
        let mut cancel_targets: Vec<NodeId> = Vec::new();
        for id in self.flow.node_ids() {
            if !reachable[id.0] {
                continue;
            }
            match &self.flow.node(id).kind {
                NodeKind::Activity(a) => {
                    fault_targets.extend(a.fault);
                    cancel_targets.extend(a.cancel);
                }
                NodeKind::ForkJoin(fj) => {
                    fault_targets.extend(fj.fault);
                    cancel_targets.extend(fj.cancel);
                }
                _ => {}
            }
        }
        fault_targets.extend(self.flow.default_fault);
        cancel_targets.extend(self.flow.default_cancel);
        fault_targets.sort();
        fault_targets.dedup();
        cancel_targets.sort();
        cancel_targets.dedup();

        for id in fault_targets {
            let capable = self
                .flow
                .node(id)
                .as_activity()
                .is_some_and(|a| a.handler.is_some());
            if !capable {
                self.report.error(
                    DiagnosticCode::InvalidFaultHandlerType,
                    Some(id),
                    format!(
                        "'{}' is wired as a fault handler but its type lacks the fault-handler capability",
                        self.name(id)
                    ),
                );
            }
        }
        for id in cancel_targets {
            if self.flow.node(id).as_activity().is_none() {
                self.report.error(
                    DiagnosticCode::InvalidFaultHandlerType,
                    Some(id),
                    format!(
                        "'{}' is wired as a cancellation handler but is not an activity",
                        self.name(id)
                    ),
                );
            }
        }
    }

    // ── pass 5: required inputs ────────────────────────────────────────

    fn check_required_inputs(&mut self, reachable: &[bool]) {
        for id in self.flow.node_ids() {
            if !reachable[id.0] {
                continue;
            }
            let Some(activity) = self.flow.node(id).as_activity() else {
                continue;
            };
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for binding in self.flow.bindings_of(id) {
                *counts.entry(binding.property.as_str()).or_default() += 1;
            }
            // The fault property of a handler is assigned by the engine at
            // dispatch time; it does not need a user binding.
            let engine_bound = activity.handler.map(|h| h.fault_property);
            for required in activity.required_inputs {
                if Some(*required) == engine_bound {
                    continue;
                }
                if counts.get(required).copied().unwrap_or(0) == 0 {
                    self.report.error(
                        DiagnosticCode::MissingRequiredInput,
                        Some(id),
                        format!(
                            "required input '{required}' of '{}' has no binding",
                            self.name(id)
                        ),
                    );
                }
            }
            let mut duplicated: Vec<&str> = counts
                .iter()
                .filter(|(_, &n)| n > 1)
                .map(|(&p, _)| p)
                .collect();
            duplicated.sort_unstable();
            for property in duplicated {
                self.report.error(
                    DiagnosticCode::DuplicateBinding,
                    Some(id),
                    format!(
                        "input '{property}' of '{}' has more than one binding",
                        self.name(id)
                    ),
                );
            }
        }
    }

    // ── pass 6: binding liveness ───────────────────────────────────────

    /// Target reached when execution falls off the end of a block's scope
    /// chain: the nearest enclosing block with a `next` successor.
    fn block_exit(&self, mut scope: ScopeId) -> Option<NodeId> {
        loop {
            let block_id = self.flow.block_of_scope(scope)?;
            let node = self.flow.node(block_id);
            let NodeKind::Block(block) = &node.kind else {
                return None;
            };
            if let Some(next) = block.next {
                return Some(next);
            }
            scope = node.scope;
        }
    }

    fn liveness_edges(&self, reachable: &[bool]) -> HashMap<NodeId, Vec<LiveEdge>> {
        let mut edges: HashMap<NodeId, Vec<LiveEdge>> = HashMap::new();
        let push = |edges: &mut HashMap<NodeId, Vec<LiveEdge>>, from: NodeId, to: NodeId, completes: Vec<NodeId>| {
            edges.entry(from).or_default().push(LiveEdge { to, completes });
        };
        for id in self.flow.node_ids() {
            if !reachable[id.0] {
                continue;
            }
            let node = self.flow.node(id);
            match &node.kind {
                NodeKind::Activity(a) => {
                    if a.fork_child_of.is_some() {
                        // Fork children settle at the join barrier; only a
                        // per-child handler sees control from here.
                        if let Some(h) = a.fault {
                            push(&mut edges, id, h, vec![]);
                        }
                        if let Some(h) = a.cancel {
                            push(&mut edges, id, h, vec![]);
                        }
                        continue;
                    }
                    if let Some(next) = a.next {
                        push(&mut edges, id, next, vec![id]);
                    } else if let Some(exit) = self.block_exit(node.scope) {
                        push(&mut edges, id, exit, vec![id]);
                    }
                    if let Some(h) = self.flow.effective_fault(id) {
                        push(&mut edges, id, h, vec![]);
                    }
                    if let Some(h) = self.flow.effective_cancel(id) {
                        push(&mut edges, id, h, vec![]);
                    }
                }
                NodeKind::Condition(c) => {
                    for target in [c.on_true, c.on_false].into_iter().flatten() {
                        push(&mut edges, id, target, vec![]);
                    }
                    if c.on_true.is_none() || c.on_false.is_none() {
                        if let Some(exit) = self.block_exit(node.scope) {
                            push(&mut edges, id, exit, vec![]);
                        }
                    }
                    if let Some(h) = self.flow.effective_fault(id) {
                        push(&mut edges, id, h, vec![]);
                    }
                    if let Some(h) = self.flow.effective_cancel(id) {
                        push(&mut edges, id, h, vec![]);
                    }
                }
                NodeKind::Switch(s) => {
                    for (_, target) in &s.cases {
                        push(&mut edges, id, *target, vec![]);
                    }
                    if let Some(d) = s.default {
                        push(&mut edges, id, d, vec![]);
                    }
                    if let Some(h) = self.flow.effective_fault(id) {
                        push(&mut edges, id, h, vec![]);
                    }
                    if let Some(h) = self.flow.effective_cancel(id) {
                        push(&mut edges, id, h, vec![]);
                    }
                }
                NodeKind::ForkJoin(fj) => {
                    for child in &fj.children {
                        push(&mut edges, id, *child, vec![]);
                    }
                    if let Some(next) = fj.next {
                        push(&mut edges, id, next, fj.children.clone());
                    } else if let Some(exit) = self.block_exit(node.scope) {
                        push(&mut edges, id, exit, fj.children.clone());
                    }
                    if let Some(h) = self.flow.effective_fault(id) {
                        push(&mut edges, id, h, vec![]);
                    }
                    if let Some(h) = self.flow.effective_cancel(id) {
                        push(&mut edges, id, h, vec![]);
                    }
                }
                NodeKind::Block(b) => {
                    if let Some(init) = b.initial {
                        push(&mut edges, id, init, vec![]);
                    } else if let Some(next) = b.next {
                        push(&mut edges, id, next, vec![]);
                    } else if let Some(exit) = self.block_exit(node.scope) {
                        push(&mut edges, id, exit, vec![]);
                    }
                }
            }
        }
        edges
    }

    /// Result reads a node performs when it runs: direct bindings, declared
    /// expression reads, and condition/switch expressions.
    fn result_reads(&self, id: NodeId) -> Vec<(NodeId, String)> {
        let mut reads = Vec::new();
        for binding in self.flow.bindings_of(id) {
            for src in binding.binding.result_dependencies() {
                reads.push((src, format!("binding of '{}'", binding.property)));
            }
        }
        match &self.flow.node(id).kind {
            NodeKind::Condition(c) => {
                for dep in c.predicate.reads.iter() {
                    if let crate::binding::Dependency::Result(src) = dep {
                        reads.push((*src, "predicate".to_string()));
                    }
                }
            }
            NodeKind::Switch(s) => {
                for dep in s.chooser.reads.iter() {
                    if let crate::binding::Dependency::Result(src) = dep {
                        reads.push((*src, "choice expression".to_string()));
                    }
                }
            }
            _ => {}
        }
        reads
    }

    fn check_binding_liveness(&mut self, initial: NodeId, reachable: &[bool]) {
        let edges = self.liveness_edges(reachable);

        let mut avail: Vec<Option<BTreeSet<NodeId>>> = vec![None; self.flow.nodes.len()];
        let mut work = VecDeque::new();
        avail[initial.0] = Some(BTreeSet::new());
        work.push_back(initial);
        // Default handlers can be dispatched from anywhere; they start from
        // no guaranteed facts.
        for root in [self.flow.default_fault, self.flow.default_cancel]
            .into_iter()
            .flatten()
        {
            if avail[root.0].is_none() {
                avail[root.0] = Some(BTreeSet::new());
                work.push_back(root);
            }
        }

        while let Some(from) = work.pop_front() {
            let base = avail[from.0].clone().unwrap_or_default();
            let Some(outgoing) = edges.get(&from) else {
                continue;
            };
            for edge in outgoing {
                let mut incoming = base.clone();
                incoming.extend(edge.completes.iter().copied());
                let slot = &mut avail[edge.to.0];
                let changed = match slot {
                    None => {
                        *slot = Some(incoming);
                        true
                    }
                    Some(existing) => {
                        let intersection: BTreeSet<NodeId> =
                            existing.intersection(&incoming).copied().collect();
                        if intersection.len() != existing.len() {
                            *existing = intersection;
                            true
                        } else {
                            false
                        }
                    }
                };
                if changed {
                    work.push_back(edge.to);
                }
            }
        }

        for id in self.flow.node_ids() {
            if !reachable[id.0] {
                continue;
            }
            let completed = avail[id.0].clone().unwrap_or_default();
            for (src, context) in self.result_reads(id) {
                if !completed.contains(&src) {
                    self.report.error(
                        DiagnosticCode::ResultReadBeforeProducer,
                        Some(id),
                        format!(
                            "{context} on '{}' reads the result of '{}', which has not completed on every path",
                            self.name(id),
                            self.name(src)
                        ),
                    );
                }
            }
        }
    }

    // ── pass 7: switch coverage ────────────────────────────────────────

    fn check_switch_coverage(&mut self, reachable: &[bool]) {
        for id in self.flow.node_ids() {
            if !reachable[id.0] {
                continue;
            }
            if let NodeKind::Switch(s) = &self.flow.node(id).kind {
                if s.default.is_none() && !s.allow_partial {
                    self.report.error(
                        DiagnosticCode::NonDefaultedPartialSwitch,
                        Some(id),
                        format!(
                            "switch '{}' has no default branch and is not marked partial",
                            self.name(id)
                        ),
                    );
                }
            }
        }
    }

    // ── pass 8: fork-joins ─────────────────────────────────────────────

    fn check_fork_joins(&mut self, reachable: &[bool]) {
        for id in self.flow.node_ids() {
            if !reachable[id.0] {
                continue;
            }
            let NodeKind::ForkJoin(fj) = &self.flow.node(id).kind else {
                continue;
            };
            if fj.children.is_empty() {
                self.report.error(
                    DiagnosticCode::ForkJoinEmpty,
                    Some(id),
                    format!("fork-join '{}' has no fork children", self.name(id)),
                );
                continue;
            }
            for &child in &fj.children {
                if self.reaches(child, id) {
                    self.report.error(
                        DiagnosticCode::ForkJoinCycle,
                        Some(id),
                        format!(
                            "fork child '{}' can re-enter its own fork-join '{}'",
                            self.name(child),
                            self.name(id)
                        ),
                    );
                }
            }
        }
    }

    fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            for (_, next) in self.flow.node(id).edges() {
                if next == target {
                    return true;
                }
                stack.push(next);
            }
        }
        false
    }

    // ── pass 9: variable scopes and parallel writes ────────────────────

    fn check_variable_scopes(&mut self, reachable: &[bool]) {
        for id in self.flow.node_ids() {
            if !reachable[id.0] {
                continue;
            }
            let node = self.flow.node(id);
            let mut variable_reads: Vec<VarId> = Vec::new();
            for binding in self.flow.bindings_of(id) {
                variable_reads.extend(binding.binding.variable_dependencies());
            }
            match &node.kind {
                NodeKind::Condition(c) => {
                    for dep in &c.predicate.reads {
                        if let crate::binding::Dependency::Variable(var) = dep {
                            variable_reads.push(*var);
                        }
                    }
                }
                NodeKind::Switch(s) => {
                    for dep in &s.chooser.reads {
                        if let crate::binding::Dependency::Variable(var) = dep {
                            variable_reads.push(*var);
                        }
                    }
                }
                _ => {}
            }
            for var in variable_reads {
                if !self.flow.scope_visible(self.flow.variables[var.0].scope, node.scope) {
                    self.report.error(
                        DiagnosticCode::VariableOutOfScope,
                        Some(id),
                        format!(
                            "'{}' reads variable '{}' outside its scope",
                            self.name(id),
                            self.flow.variables[var.0].name
                        ),
                    );
                }
            }
        }
        for update in &self.flow.updates {
            if !reachable[update.trigger.0] {
                continue;
            }
            let trigger_scope = self.flow.node(update.trigger).scope;
            if !self
                .flow
                .scope_visible(self.flow.variables[update.var.0].scope, trigger_scope)
            {
                self.report.error(
                    DiagnosticCode::VariableOutOfScope,
                    Some(update.trigger),
                    format!(
                        "update triggered by '{}' targets variable '{}' outside its scope",
                        self.name(update.trigger),
                        self.flow.variables[update.var.0].name
                    ),
                );
            }
        }
    }

    /// Variables a fork child writes: its own post-completion updates plus
    /// those of its per-child fault handler.
    fn child_write_set(&self, child: NodeId) -> BTreeSet<VarId> {
        let mut triggers = vec![child];
        if let Some(activity) = self.flow.node(child).as_activity() {
            triggers.extend(activity.fault);
        }
        let mut writes = BTreeSet::new();
        for trigger in triggers {
            for update in self.flow.updates_for(trigger) {
                writes.insert(update.var);
            }
        }
        writes
    }

    fn check_parallel_writes(&mut self, reachable: &[bool]) {
        for id in self.flow.node_ids() {
            if !reachable[id.0] {
                continue;
            }
            let NodeKind::ForkJoin(fj) = &self.flow.node(id).kind else {
                continue;
            };
            let write_sets: Vec<(NodeId, BTreeSet<VarId>)> = fj
                .children
                .iter()
                .map(|&child| (child, self.child_write_set(child)))
                .collect();
            for (i, (left, left_writes)) in write_sets.iter().enumerate() {
                for (right, right_writes) in write_sets.iter().skip(i + 1) {
                    for var in left_writes.intersection(right_writes) {
                        self.report.error(
                            DiagnosticCode::ParallelVariableWriteConflict,
                            Some(id),
                            format!(
                                "fork children '{}' and '{}' both write variable '{}'",
                                self.name(*left),
                                self.name(*right),
                                self.flow.variables[var.0].name
                            ),
                        );
                    }
                }
            }
        }
    }
}
