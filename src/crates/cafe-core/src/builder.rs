//! Fluent construction of flow graphs
//!
//! The builder assembles a [`FlowGraph`] programmatically, mainly for tests
//! and embedding editors. It performs no validation; run
//! [`validate_graph`](crate::validate::validate_graph) on the result when the
//! input is untrusted.
//!
//! # Example
//!
//! ```rust
//! use cafe_core::builder::FlowGraphBuilder;
//! use cafe_core::model::{ActionData, NodeData, TriggerData};
//!
//! let graph = FlowGraphBuilder::new("Hallway light")
//!     .node("t1", 0.0, 0.0, NodeData::Trigger(TriggerData::default()))
//!     .node("a1", 0.0, 120.0, NodeData::Action(ActionData {
//!         service: Some("light.turn_on".into()),
//!         ..ActionData::default()
//!     }))
//!     .edge("e1", "t1", "a1")
//!     .build();
//!
//! assert_eq!(graph.nodes.len(), 2);
//! assert_eq!(graph.version, 1);
//! ```

use uuid::Uuid;

use crate::model::{
    AutomationConfig, AutomationMode, EdgeHandle, FlowEdge, FlowGraph, FlowNode, NodeData,
    Position,
};

/// Builder for [`FlowGraph`] documents.
pub struct FlowGraphBuilder {
    name: String,
    description: Option<String>,
    metadata: AutomationConfig,
    nodes: Vec<FlowNode>,
    edges: Vec<FlowEdge>,
}

impl FlowGraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            metadata: AutomationConfig::default(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn mode(mut self, mode: AutomationMode) -> Self {
        self.metadata.mode = mode;
        self
    }

    pub fn node(mut self, id: impl Into<String>, x: f64, y: f64, data: NodeData) -> Self {
        self.nodes.push(FlowNode {
            id: id.into(),
            position: Position::new(x, y),
            data,
        });
        self
    }

    /// Unlabelled edge.
    pub fn edge(
        mut self,
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.edges.push(FlowEdge::new(id, source, target));
        self
    }

    /// Edge leaving a condition's `true` handle.
    pub fn edge_true(
        mut self,
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.edges
            .push(FlowEdge::new(id, source, target).with_handle(EdgeHandle::True));
        self
    }

    /// Edge leaving a condition's `false` handle.
    pub fn edge_false(
        mut self,
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.edges
            .push(FlowEdge::new(id, source, target).with_handle(EdgeHandle::False));
        self
    }

    pub fn build(self) -> FlowGraph {
        FlowGraph {
            id: Uuid::new_v4().to_string(),
            version: 1,
            name: self.name,
            description: self.description,
            metadata: self.metadata,
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeData, TriggerData};

    #[test]
    fn test_builder_assigns_uuid_and_version() {
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, NodeData::Trigger(TriggerData::default()))
            .build();
        assert_eq!(graph.version, 1);
        assert_eq!(graph.id.len(), 36);
    }
}
