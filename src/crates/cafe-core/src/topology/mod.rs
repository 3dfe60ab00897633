//! Topology analysis and strategy recommendation
//!
//! [`analyze`] classifies a graph and recommends a lowering strategy. The
//! pipeline is: detect structural back-edges (DFS), set aside the ones that
//! belong to `repeat` loops, then run the forward analysis: cycle check and
//! topological order (Kahn), entry/exit nodes, BFS levels with cross-link
//! detection, convergence classification and divergent-trigger detection.
//!
//! The recommendation is `native` exactly when no cycles, cross-links,
//! forced convergences or divergent trigger paths remain; everything else
//! lowers through the state machine.

mod back_edges;
mod links;

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::Warning;
use crate::index::GraphIndex;
use crate::model::{FlowGraph, NodeKind};

pub(crate) use links::ForwardView;

/// Lowering strategy families known to the analyzer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Native,
    StateMachine,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Native => "native",
            StrategyKind::StateMachine => "state-machine",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the strategies need to know about a graph's shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub is_tree: bool,
    pub has_cycles: bool,
    pub has_multiple_entry_points: bool,
    pub has_cross_links: bool,
    pub has_converging_paths: bool,
    pub has_divergent_trigger_paths: bool,

    /// Nodes with zero forward predecessors, in document order.
    pub entry_nodes: Vec<String>,
    /// Nodes with zero forward successors, in document order.
    pub exit_nodes: Vec<String>,
    /// Present when the forward graph is acyclic.
    pub topological_order: Option<Vec<String>>,

    /// Every structural back-edge id (DFS order).
    pub back_edges: Vec<String>,
    /// The subset of back-edges that belong to repeat loops.
    pub repeat_back_edges: Vec<String>,

    pub recommended_strategy: StrategyKind,
    pub warnings: Vec<Warning>,
}

/// Analyze a graph's topology.
pub fn analyze(graph: &FlowGraph) -> Analysis {
    let index = GraphIndex::new(graph);
    analyze_with_index(&index)
}

/// Analyze using an existing adjacency index.
pub fn analyze_with_index(index: &GraphIndex) -> Analysis {
    let back_edges = back_edges::find_back_edges(index);
    let repeat = back_edges::repeat_back_edges(index, &back_edges);
    let view = ForwardView::new(index, &repeat);

    let (topological_order, has_cycles) = topological_sort(&view);

    let entry_nodes: Vec<String> = index
        .node_ids()
        .filter(|id| view.incoming(id).is_empty())
        .map(str::to_string)
        .collect();
    let exit_nodes: Vec<String> = index
        .node_ids()
        .filter(|id| view.outgoing(id).is_empty())
        .map(str::to_string)
        .collect();

    let levels = links::assign_levels(&view, &entry_nodes);
    let cross = links::cross_links(&view, &levels);
    let has_cross_links = !cross.is_empty();

    let has_converging_paths = links::has_forced_convergence(&view);
    let has_divergent_trigger_paths = divergent_triggers(index);

    let is_tree = !has_cycles
        && index
            .node_ids()
            .all(|id| view.incoming(id).len() <= 1);

    let recommended_strategy = if !has_cycles
        && !has_cross_links
        && !has_converging_paths
        && !has_divergent_trigger_paths
    {
        StrategyKind::Native
    } else {
        StrategyKind::StateMachine
    };

    let warnings = infinite_loop_warnings(index, &back_edges, &repeat);

    tracing::debug!(
        cycles = has_cycles,
        cross_links = has_cross_links,
        converging = has_converging_paths,
        divergent_triggers = has_divergent_trigger_paths,
        strategy = %recommended_strategy,
        "topology analysis complete"
    );

    Analysis {
        is_tree,
        has_cycles,
        has_multiple_entry_points: entry_nodes.len() > 1,
        has_cross_links,
        has_converging_paths,
        has_divergent_trigger_paths,
        entry_nodes,
        exit_nodes,
        topological_order,
        back_edges,
        repeat_back_edges: repeat,
        recommended_strategy,
        warnings,
    }
}

/// Kahn's algorithm over the forward graph. Returns the order when acyclic.
fn topological_sort(view: &ForwardView) -> (Option<Vec<String>>, bool) {
    let index = view.index();
    let mut indegree: HashMap<&str, usize> = index.node_ids().map(|id| (id, 0)).collect();
    for id in index.node_ids() {
        for edge in view.outgoing(id) {
            if let Some(entry) = indegree.get_mut(edge.target.as_str()) {
                *entry += 1;
            }
        }
    }

    let mut queue: VecDeque<&str> = index
        .node_ids()
        .filter(|id| indegree[id] == 0)
        .collect();
    let mut order = Vec::new();
    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        for edge in view.outgoing(id) {
            if let Some(entry) = indegree.get_mut(edge.target.as_str()) {
                *entry -= 1;
                if *entry == 0 {
                    queue.push_back(edge.target.as_str());
                }
            }
        }
    }

    if order.len() == index.graph().nodes.len() {
        (Some(order), false)
    } else {
        (None, true)
    }
}

/// With two or more triggers, differing immediate-successor sets mean the
/// triggers lead to different actions and need state-machine routing.
fn divergent_triggers(index: &GraphIndex) -> bool {
    let triggers: Vec<&str> = index
        .node_ids()
        .filter(|id| index.kind(id) == Some(NodeKind::Trigger))
        .collect();
    if triggers.len() < 2 {
        return false;
    }

    let successor_set = |id: &str| -> BTreeSet<&str> {
        index
            .outgoing(id)
            .iter()
            .map(|e| e.target.as_str())
            .collect()
    };

    let first = successor_set(triggers[0]);
    triggers[1..].iter().any(|t| successor_set(t) != first)
}

/// Warn about true cycles that contain no condition node at all.
fn infinite_loop_warnings(
    index: &GraphIndex,
    back_edges: &[String],
    repeat: &[String],
) -> Vec<Warning> {
    let mut warnings = Vec::new();
    for edge_id in back_edges {
        if repeat.contains(edge_id) {
            continue;
        }
        let Some(edge) = index.edge(edge_id) else {
            continue;
        };
        let forward = reachable(index, &edge.target, false);
        let backward = reachable(index, &edge.source, true);
        let on_cycle: HashSet<&str> = forward.intersection(&backward).copied().collect();
        let has_condition = on_cycle
            .iter()
            .any(|id| index.kind(id) == Some(NodeKind::Condition));
        if !has_condition {
            warnings.push(Warning::PotentialInfiniteLoop {
                node: edge.target.clone(),
            });
        }
    }
    warnings
}

fn reachable<'g>(index: &GraphIndex<'g>, start: &str, reverse: bool) -> HashSet<&'g str> {
    let mut seen = HashSet::new();
    let Some(start) = index.node(start) else {
        return seen;
    };
    let mut queue = VecDeque::from([start.id.as_str()]);
    seen.insert(start.id.as_str());
    while let Some(id) = queue.pop_front() {
        let edges = if reverse {
            index.incoming(id)
        } else {
            index.outgoing(id)
        };
        for edge in edges {
            let next = if reverse {
                edge.source.as_str()
            } else {
                edge.target.as_str()
            };
            if index.node(next).is_some() && seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FlowGraphBuilder;
    use crate::model::{ActionData, ConditionData, NodeData, TriggerData};

    fn trigger() -> NodeData {
        NodeData::Trigger(TriggerData::default())
    }

    fn action() -> NodeData {
        NodeData::Action(ActionData {
            service: Some("light.turn_on".into()),
            ..ActionData::default()
        })
    }

    fn condition() -> NodeData {
        NodeData::Condition(ConditionData::default())
    }

    #[test]
    fn test_linear_chain_is_native() {
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node("a", 0.0, 1.0, action())
            .node("b", 0.0, 2.0, action())
            .edge("e1", "t", "a")
            .edge("e2", "a", "b")
            .build();
        let analysis = analyze(&graph);
        assert!(analysis.is_tree);
        assert!(!analysis.has_cycles);
        assert_eq!(analysis.recommended_strategy, StrategyKind::Native);
        assert_eq!(
            analysis.topological_order,
            Some(vec!["t".into(), "a".into(), "b".into()])
        );
        assert_eq!(analysis.entry_nodes, vec!["t".to_string()]);
        assert_eq!(analysis.exit_nodes, vec!["b".to_string()]);
    }

    #[test]
    fn test_repeat_back_edge_is_not_a_cycle() {
        // while loop: t -> c -(true)-> a -> c
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node("c", 0.0, 1.0, condition())
            .node("a", 0.0, 2.0, action())
            .edge("e1", "t", "c")
            .edge_true("e2", "c", "a")
            .edge("e3", "a", "c")
            .build();
        let analysis = analyze(&graph);
        assert!(!analysis.has_cycles);
        assert_eq!(analysis.repeat_back_edges, vec!["e3".to_string()]);
        assert_eq!(analysis.recommended_strategy, StrategyKind::Native);
        assert!(analysis.warnings.is_empty());
    }

    #[test]
    fn test_condition_free_cycle_warns() {
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node("a", 0.0, 1.0, action())
            .node("b", 0.0, 2.0, action())
            .edge("e1", "t", "a")
            .edge("e2", "a", "b")
            .edge("e3", "b", "a")
            .build();
        let analysis = analyze(&graph);
        assert!(analysis.has_cycles);
        assert_eq!(analysis.recommended_strategy, StrategyKind::StateMachine);
        assert!(matches!(
            analysis.warnings.first(),
            Some(Warning::PotentialInfiniteLoop { .. })
        ));
    }

    #[test]
    fn test_parallel_fan_out_and_convergence_stays_native() {
        // t -> split -> {a, b} -> join
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node("split", 0.0, 1.0, action())
            .node("a", 0.0, 2.0, action())
            .node("b", 1.0, 2.0, action())
            .node("join", 0.0, 3.0, action())
            .edge("e1", "t", "split")
            .edge("e2", "split", "a")
            .edge("e3", "split", "b")
            .edge("e4", "a", "join")
            .edge("e5", "b", "join")
            .build();
        let analysis = analyze(&graph);
        assert!(!analysis.has_converging_paths);
        assert!(!analysis.has_cross_links);
        assert_eq!(analysis.recommended_strategy, StrategyKind::Native);
    }

    #[test]
    fn test_uneven_parallel_branches_are_not_cross_links() {
        // t -> split -> {a -> b -> join, join}
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node("split", 0.0, 1.0, action())
            .node("a", 0.0, 2.0, action())
            .node("b", 0.0, 3.0, action())
            .node("join", 1.0, 2.0, action())
            .edge("e1", "t", "split")
            .edge("e2", "split", "a")
            .edge("e3", "split", "join")
            .edge("e4", "a", "b")
            .edge("e5", "b", "join")
            .build();
        let analysis = analyze(&graph);
        assert!(!analysis.has_cross_links, "uneven branch lengths are valid");
        assert_eq!(analysis.recommended_strategy, StrategyKind::Native);
    }

    #[test]
    fn test_or_convergence_stays_native() {
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node("c1", 0.0, 1.0, condition())
            .node("c2", 1.0, 1.0, condition())
            .node("a", 0.0, 2.0, action())
            .edge("e1", "t", "c1")
            .edge("e2", "t", "c2")
            .edge_true("e3", "c1", "a")
            .edge_true("e4", "c2", "a")
            .build();
        let analysis = analyze(&graph);
        assert!(!analysis.has_converging_paths);
        assert_eq!(analysis.recommended_strategy, StrategyKind::Native);
    }

    #[test]
    fn test_mixed_handle_convergence_forces_state_machine() {
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node("c1", 0.0, 1.0, condition())
            .node("c2", 1.0, 1.0, condition())
            .node("a", 0.0, 2.0, action())
            .edge("e1", "t", "c1")
            .edge("e2", "t", "c2")
            .edge_true("e3", "c1", "a")
            .edge_false("e4", "c2", "a")
            .build();
        let analysis = analyze(&graph);
        assert!(analysis.has_converging_paths);
        assert_eq!(analysis.recommended_strategy, StrategyKind::StateMachine);
    }

    #[test]
    fn test_trigger_fan_in_stays_native() {
        let graph = FlowGraphBuilder::new("g")
            .node("t1", 0.0, 0.0, trigger())
            .node("t2", 1.0, 0.0, trigger())
            .node("a", 0.0, 1.0, action())
            .edge("e1", "t1", "a")
            .edge("e2", "t2", "a")
            .build();
        let analysis = analyze(&graph);
        assert!(!analysis.has_converging_paths);
        assert!(!analysis.has_divergent_trigger_paths);
        assert!(analysis.has_multiple_entry_points);
        assert_eq!(analysis.recommended_strategy, StrategyKind::Native);
    }

    #[test]
    fn test_divergent_triggers_force_state_machine() {
        let graph = FlowGraphBuilder::new("g")
            .node("t1", 0.0, 0.0, trigger())
            .node("t2", 1.0, 0.0, trigger())
            .node("a1", 0.0, 1.0, action())
            .node("a2", 1.0, 1.0, action())
            .edge("e1", "t1", "a1")
            .edge("e2", "t2", "a2")
            .build();
        let analysis = analyze(&graph);
        assert!(analysis.has_divergent_trigger_paths);
        assert_eq!(analysis.recommended_strategy, StrategyKind::StateMachine);
    }

    #[test]
    fn test_backward_link_across_condition_branches() {
        // c1's true branch runs a1 -> a3 and then jumps into the false
        // branch's a2. The jump source traces back through a condition, so
        // the parallel-convergence exception does not apply.
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node("c1", 0.0, 1.0, condition())
            .node("a1", 0.0, 2.0, action())
            .node("a2", 1.0, 2.0, action())
            .node("a3", 0.0, 3.0, action())
            .edge("e1", "t", "c1")
            .edge_true("e2", "c1", "a1")
            .edge_false("e3", "c1", "a2")
            .edge("e4", "a1", "a3")
            .edge("e5", "a3", "a2")
            .build();
        let analysis = analyze(&graph);
        assert!(analysis.has_cross_links);
        assert_eq!(analysis.recommended_strategy, StrategyKind::StateMachine);
    }
}
