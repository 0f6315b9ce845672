//! Graph export and visualization
//!
//! A built flow is introspectable without running it:
//! [`Flow::describe`](crate::Flow::describe) produces a
//! [`GraphDescription`] — a serde-round-trippable structural view
//! of the graph (node kind, name, and labelled edges) — and this module
//! renders it in two formats:
//!
//! - **DOT/Graphviz** via [`render_dot`] — render with
//!   `dot -Tpng flow.dot -o flow.png`
//! - **Mermaid** via [`render_mermaid`] — paste into markdown for
//!   GitHub-native rendering
//!
//! Edge labels form a closed set
//! (`next | fault | cancel | true | false | case(k) | default | fork_i | join`);
//! see [`EdgeLabel`]. Compound nodes (fork-joins and blocks) exit through a
//! `join` edge; a block's entry edge to its initial child is labelled
//! `next`.
//!
//! # Example
//!
//! ```rust,ignore
//! let description = flow.describe();
//!
//! // Structural round trip through JSON
//! let json = serde_json::to_string(&description)?;
//! let parsed: GraphDescription = serde_json::from_str(&json)?;
//! assert_eq!(parsed, description);
//!
//! // Diagrams
//! std::fs::write("flow.dot", render_dot(&description))?;
//! println!("{}", render_mermaid(&description));
//! ```

use crate::flow::FlowCore;
use crate::node::{EdgeLabel, NodeId, NodeKind};
use serde::{Deserialize, Serialize};

/// Kind tag of an exported node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKindTag {
    Activity,
    FaultHandler,
    Condition,
    Switch,
    ForkJoin,
    Block,
}

/// One labelled edge of an exported node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDescription {
    pub label: EdgeLabel,
    pub target: NodeId,
}

/// One exported node: kind, name, and outgoing edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKindTag,
    pub edges: Vec<EdgeDescription>,
}

/// Structural description of a flow graph, stable under serde round trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDescription {
    pub name: String,
    pub initial: Option<NodeId>,
    pub default_fault_handler: Option<NodeId>,
    pub default_cancellation_handler: Option<NodeId>,
    pub nodes: Vec<NodeDescription>,
}

pub(crate) fn describe(flow: &FlowCore) -> GraphDescription {
    let nodes = flow
        .node_ids()
        .map(|id| {
            let node = flow.node(id);
            let kind = match &node.kind {
                NodeKind::Activity(a) if a.handler.is_some() => NodeKindTag::FaultHandler,
                NodeKind::Activity(_) => NodeKindTag::Activity,
                NodeKind::Condition(_) => NodeKindTag::Condition,
                NodeKind::Switch(_) => NodeKindTag::Switch,
                NodeKind::ForkJoin(_) => NodeKindTag::ForkJoin,
                NodeKind::Block(_) => NodeKindTag::Block,
            };
            NodeDescription {
                id,
                name: node.name.clone(),
                kind,
                edges: node
                    .edges()
                    .into_iter()
                    .map(|(label, target)| EdgeDescription { label, target })
                    .collect(),
            }
        })
        .collect();
    GraphDescription {
        name: flow.name.clone(),
        initial: flow.initial,
        default_fault_handler: flow.default_fault,
        default_cancellation_handler: flow.default_cancel,
        nodes,
    }
}

/// Render a graph description in DOT format for Graphviz.
pub fn render_dot(graph: &GraphDescription) -> String {
    let mut out = String::new();
    out.push_str("digraph G {\n");
    out.push_str("    rankdir=TB;\n");
    out.push_str("    node [shape=box, style=rounded];\n");
    out.push_str(&format!(
        "    labelloc=\"t\";\n    label=\"{}\";\n",
        escape_dot(&graph.name)
    ));

    for node in &graph.nodes {
        let attrs = match node.kind {
            NodeKindTag::Activity => String::new(),
            NodeKindTag::FaultHandler => {
                ", style=\"rounded,filled\", fillcolor=mistyrose".to_string()
            }
            NodeKindTag::Condition | NodeKindTag::Switch => ", shape=diamond".to_string(),
            NodeKindTag::ForkJoin => ", shape=trapezium".to_string(),
            NodeKindTag::Block => ", shape=box3d".to_string(),
        };
        let initial_mark = if graph.initial == Some(node.id) {
            ", peripheries=2"
        } else {
            ""
        };
        out.push_str(&format!(
            "    \"{}\" [label=\"{}\"{}{}];\n",
            node.id,
            escape_dot(&node.name),
            attrs,
            initial_mark
        ));
    }
    for node in &graph.nodes {
        for edge in &node.edges {
            let style = match edge.label {
                EdgeLabel::Fault | EdgeLabel::Cancel => ", style=dashed",
                _ => "",
            };
            out.push_str(&format!(
                "    \"{}\" -> \"{}\" [label=\"{}\"{}];\n",
                node.id,
                edge.target,
                escape_dot(&edge.label.to_string()),
                style
            ));
        }
    }
    out.push_str("}\n");
    out
}

/// Render a graph description as a Mermaid diagram.
pub fn render_mermaid(graph: &GraphDescription) -> String {
    let mut out = String::new();
    out.push_str("graph TD\n");
    for node in &graph.nodes {
        let label = escape_mermaid(&node.name);
        let shape = match node.kind {
            NodeKindTag::Activity | NodeKindTag::FaultHandler => format!("[\"{label}\"]"),
            NodeKindTag::Condition | NodeKindTag::Switch => format!("{{\"{label}\"}}"),
            NodeKindTag::ForkJoin => format!("[/\"{label}\"\\]"),
            NodeKindTag::Block => format!("[[\"{label}\"]]"),
        };
        out.push_str(&format!("    {}{}\n", node.id, shape));
    }
    for node in &graph.nodes {
        for edge in &node.edges {
            let arrow = match edge.label {
                EdgeLabel::Fault | EdgeLabel::Cancel => "-.->",
                _ => "-->",
            };
            out.push_str(&format!(
                "    {} {}|{}| {}\n",
                node.id,
                arrow,
                escape_mermaid(&edge.label.to_string()),
                edge.target
            ));
        }
    }
    out
}

fn escape_dot(text: &str) -> String {
    text.replace('"', "\\\"")
}

fn escape_mermaid(text: &str) -> String {
    text.replace('"', "#quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Activity, ActivityContext, FaultHandlerActivity};
    use crate::builder::FlowBuilder;
    use crate::error::ActivityError;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Activity for Noop {
        type Output = ();

        async fn execute(&mut self, _ctx: &ActivityContext) -> Result<(), ActivityError> {
            Ok(())
        }
    }

    impl FaultHandlerActivity for Noop {}

    fn sample() -> crate::flow::Flow {
        let mut b = FlowBuilder::new("sample");
        let first = b.activity::<Noop>("first");
        let cond = b.condition(
            "branch",
            crate::binding::Expression::new(|_| Ok(serde_json::json!(true))),
        );
        let left = b.activity::<Noop>("left");
        let right = b.activity::<Noop>("right");
        let handler = b.fault_handler::<Noop>("on-fault");
        b.connect(&first, &cond);
        b.connect_true(&cond, &left);
        b.connect_false(&cond, &right);
        b.with_initial_node(&first);
        b.with_default_fault_handler(&handler);
        b.with_default_cancellation_handler(&handler);
        b.build()
    }

    #[test]
    fn test_describe_captures_kinds_and_edges() {
        let description = sample().describe();
        assert_eq!(description.name, "sample");
        assert_eq!(description.nodes.len(), 5);

        let cond = description
            .nodes
            .iter()
            .find(|n| n.name == "branch")
            .expect("condition exported");
        assert_eq!(cond.kind, NodeKindTag::Condition);
        assert_eq!(cond.edges.len(), 2);
        assert!(cond.edges.iter().any(|e| e.label == EdgeLabel::True));

        let handler = description
            .nodes
            .iter()
            .find(|n| n.name == "on-fault")
            .expect("handler exported");
        assert_eq!(handler.kind, NodeKindTag::FaultHandler);
    }

    #[test]
    fn test_json_round_trip_is_lossless() {
        let description = sample().describe();
        let json = serde_json::to_string(&description).unwrap();
        let parsed: GraphDescription = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, description);
    }

    #[test]
    fn test_dot_rendering() {
        let dot = render_dot(&sample().describe());
        assert!(dot.starts_with("digraph G {"));
        assert!(dot.contains("shape=diamond"), "conditions are diamonds:\n{dot}");
        assert!(dot.contains("label=\"true\""), "edges carry labels:\n{dot}");
    }

    #[test]
    fn test_mermaid_rendering() {
        let mermaid = render_mermaid(&sample().describe());
        assert!(mermaid.starts_with("graph TD\n"));
        assert!(mermaid.contains("-->|true|"), "labelled edges:\n{mermaid}");
    }
}
