//! Structural back-edge detection
//!
//! A depth-first search from every entry node (zero incoming edges), then
//! from any still-unvisited node to cover disconnected components. An edge
//! is a back-edge iff its target is on the current DFS stack. Root and edge
//! iteration follow document order, so the returned ids are deterministic.

use std::collections::HashSet;

use crate::index::GraphIndex;
use crate::model::NodeKind;

/// Ids of every structural back-edge, in DFS discovery order.
pub(crate) fn find_back_edges(index: &GraphIndex) -> Vec<String> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();
    let mut back = Vec::new();

    let entries: Vec<&str> = index
        .node_ids()
        .filter(|id| index.incoming(id).is_empty())
        .collect();
    let rest: Vec<&str> = index.node_ids().collect();

    for root in entries.into_iter().chain(rest) {
        if visited.contains(root) {
            continue;
        }
        visited.insert(root);
        on_stack.insert(root);
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];

        while let Some(frame) = stack.last_mut() {
            let (node, cursor) = (frame.0, frame.1);
            let edges = index.outgoing(node);
            if cursor < edges.len() {
                frame.1 += 1;
                let edge = edges[cursor];
                let target = edge.target.as_str();
                if on_stack.contains(target) {
                    back.push(edge.id.clone());
                } else if !visited.contains(target) && index.node(target).is_some() {
                    visited.insert(target);
                    on_stack.insert(target);
                    stack.push((target, 0));
                }
            } else {
                on_stack.remove(node);
                stack.pop();
            }
        }
    }

    back
}

/// A back-edge whose source or target is a condition node belongs to a
/// structured `repeat` loop, not a real cycle.
pub(crate) fn repeat_back_edges(index: &GraphIndex, back_edges: &[String]) -> Vec<String> {
    back_edges
        .iter()
        .filter(|id| {
            index.edge(id).is_some_and(|edge| {
                index.kind(&edge.source) == Some(NodeKind::Condition)
                    || index.kind(&edge.target) == Some(NodeKind::Condition)
            })
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FlowGraphBuilder;
    use crate::model::{ActionData, ConditionData, NodeData, TriggerData};

    #[test]
    fn test_linear_graph_has_no_back_edges() {
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, NodeData::Trigger(TriggerData::default()))
            .node("a", 0.0, 1.0, NodeData::Action(ActionData::default()))
            .edge("e1", "t", "a")
            .build();
        let index = GraphIndex::new(&graph);
        assert!(find_back_edges(&index).is_empty());
    }

    #[test]
    fn test_loop_back_edge_detected_and_classified() {
        // t -> c -(true)-> a -> c  (while-style loop)
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, NodeData::Trigger(TriggerData::default()))
            .node("c", 0.0, 1.0, NodeData::Condition(ConditionData::default()))
            .node("a", 0.0, 2.0, NodeData::Action(ActionData::default()))
            .edge("e1", "t", "c")
            .edge_true("e2", "c", "a")
            .edge("e3", "a", "c")
            .build();
        let index = GraphIndex::new(&graph);
        let back = find_back_edges(&index);
        assert_eq!(back, vec!["e3".to_string()]);
        assert_eq!(repeat_back_edges(&index, &back), vec!["e3".to_string()]);
    }

    #[test]
    fn test_action_cycle_is_not_repeat() {
        let graph = FlowGraphBuilder::new("g")
            .node("a", 0.0, 0.0, NodeData::Action(ActionData::default()))
            .node("b", 0.0, 1.0, NodeData::Action(ActionData::default()))
            .edge("e1", "a", "b")
            .edge("e2", "b", "a")
            .build();
        let index = GraphIndex::new(&graph);
        let back = find_back_edges(&index);
        assert_eq!(back.len(), 1);
        assert!(repeat_back_edges(&index, &back).is_empty());
    }

    #[test]
    fn test_fan_in_is_not_a_back_edge() {
        // Diamond: t -> a, t -> b, a -> c, b -> c.
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, NodeData::Trigger(TriggerData::default()))
            .node("a", 0.0, 1.0, NodeData::Action(ActionData::default()))
            .node("b", 1.0, 1.0, NodeData::Action(ActionData::default()))
            .node("c", 0.0, 2.0, NodeData::Action(ActionData::default()))
            .edge("e1", "t", "a")
            .edge("e2", "t", "b")
            .edge("e3", "a", "c")
            .edge("e4", "b", "c")
            .build();
        let index = GraphIndex::new(&graph);
        assert!(find_back_edges(&index).is_empty());
    }
}
