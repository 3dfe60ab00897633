//! Immutable adjacency index over a [`FlowGraph`]
//!
//! Convergence and chaining decisions need multi-hop lookahead, so every
//! transpile builds one index up front and runs pure queries against it
//! instead of scanning the edge list during emission. Edge vectors keep the
//! document order of the input, which keeps traversal deterministic.

use std::collections::HashMap;

use crate::model::{EdgeHandle, FlowEdge, FlowGraph, FlowNode, NodeKind};

/// Read-only adjacency view of a graph.
pub struct GraphIndex<'g> {
    graph: &'g FlowGraph,
    nodes: HashMap<&'g str, &'g FlowNode>,
    edges: HashMap<&'g str, &'g FlowEdge>,
    outgoing: HashMap<&'g str, Vec<&'g FlowEdge>>,
    incoming: HashMap<&'g str, Vec<&'g FlowEdge>>,
}

impl<'g> GraphIndex<'g> {
    pub fn new(graph: &'g FlowGraph) -> Self {
        let mut nodes = HashMap::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            nodes.insert(node.id.as_str(), node);
        }

        let mut edges = HashMap::with_capacity(graph.edges.len());
        let mut outgoing: HashMap<&str, Vec<&FlowEdge>> = HashMap::new();
        let mut incoming: HashMap<&str, Vec<&FlowEdge>> = HashMap::new();
        for edge in &graph.edges {
            edges.insert(edge.id.as_str(), edge);
            outgoing.entry(edge.source.as_str()).or_default().push(edge);
            incoming.entry(edge.target.as_str()).or_default().push(edge);
        }

        Self {
            graph,
            nodes,
            edges,
            outgoing,
            incoming,
        }
    }

    pub fn graph(&self) -> &'g FlowGraph {
        self.graph
    }

    pub fn node(&self, id: &str) -> Option<&'g FlowNode> {
        self.nodes.get(id).copied()
    }

    pub fn edge(&self, id: &str) -> Option<&'g FlowEdge> {
        self.edges.get(id).copied()
    }

    pub fn kind(&self, id: &str) -> Option<NodeKind> {
        self.node(id).map(|n| n.data.kind())
    }

    /// Node ids in document order.
    pub fn node_ids(&self) -> impl Iterator<Item = &'g str> + '_ {
        self.graph.nodes.iter().map(|n| n.id.as_str())
    }

    /// Outgoing edges of `id`, in document order.
    pub fn outgoing(&self, id: &str) -> &[&'g FlowEdge] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Incoming edges of `id`, in document order.
    pub fn incoming(&self, id: &str) -> &[&'g FlowEdge] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Outgoing edges carrying the given handle. `None` matches unlabelled
    /// edges only.
    pub fn outgoing_with_handle(
        &self,
        id: &str,
        handle: Option<EdgeHandle>,
    ) -> Vec<&'g FlowEdge> {
        self.outgoing(id)
            .iter()
            .filter(|e| e.source_handle == handle)
            .copied()
            .collect()
    }

    /// Outgoing edges a condition traversal treats as the `true` branch:
    /// edges labelled `true` plus unlabelled edges.
    pub fn truthy_outgoing(&self, id: &str) -> Vec<&'g FlowEdge> {
        self.outgoing(id)
            .iter()
            .filter(|e| e.source_handle != Some(EdgeHandle::False))
            .copied()
            .collect()
    }

    pub fn false_outgoing(&self, id: &str) -> Vec<&'g FlowEdge> {
        self.outgoing_with_handle(id, Some(EdgeHandle::False))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FlowGraphBuilder;
    use crate::model::{ActionData, ConditionData, NodeData};

    fn sample() -> FlowGraph {
        FlowGraphBuilder::new("sample")
            .node("c1", 0.0, 0.0, NodeData::Condition(ConditionData::default()))
            .node("a1", 0.0, 100.0, NodeData::Action(ActionData::default()))
            .node("a2", 100.0, 100.0, NodeData::Action(ActionData::default()))
            .edge_true("e1", "c1", "a1")
            .edge_false("e2", "c1", "a2")
            .build()
    }

    #[test]
    fn test_adjacency_keeps_document_order() {
        let graph = sample();
        let index = GraphIndex::new(&graph);
        let out: Vec<&str> = index
            .outgoing("c1")
            .iter()
            .map(|e| e.target.as_str())
            .collect();
        assert_eq!(out, vec!["a1", "a2"]);
    }

    #[test]
    fn test_handle_filters() {
        let graph = sample();
        let index = GraphIndex::new(&graph);
        assert_eq!(index.truthy_outgoing("c1")[0].target, "a1");
        assert_eq!(index.false_outgoing("c1")[0].target, "a2");
        assert!(index.outgoing("a1").is_empty());
        assert_eq!(index.incoming("a2")[0].id, "e2");
    }
}
