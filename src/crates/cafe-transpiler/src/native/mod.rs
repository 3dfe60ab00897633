//! Native lowering
//!
//! Pattern-matches tree- and DAG-shaped graphs into Home Assistant's nested
//! constructs: root `conditions:`, `if`/`then`/`else`, `parallel`, and
//! `repeat`. The analyzer guarantees the shapes this strategy receives;
//! anything with true cycles, cross-links, forced convergence or divergent
//! triggers is routed to the state machine instead.

mod repeat;
mod sequence;

use std::collections::{HashMap, HashSet};

use serde_yaml::{Mapping, Value as Yaml};

use cafe_core::model::{EdgeHandle, FlowGraph, NodeKind};
use cafe_core::{Analysis, GraphIndex, Warning};

use crate::emit::{self, ystr};
use crate::strategy::{assemble_document, LoweringStrategy, StrategyOutcome};

use repeat::{detect_repeat_patterns, RepeatPattern};

pub struct NativeStrategy;

impl LoweringStrategy for NativeStrategy {
    fn name(&self) -> &'static str {
        "native"
    }

    fn can_handle(&self, analysis: &Analysis) -> bool {
        !analysis.has_cycles
            && !analysis.has_cross_links
            && !analysis.has_converging_paths
            && !analysis.has_divergent_trigger_paths
    }

    fn generate(&self, graph: &FlowGraph, analysis: &Analysis) -> StrategyOutcome {
        let mut generator = NativeGenerator::new(graph, analysis);
        let document = generator.build_document();
        StrategyOutcome {
            document,
            warnings: generator.warnings,
        }
    }
}

/// Per-invocation scratch for one native lowering. Dropped at the end of
/// `generate`, so strategy values stay reusable.
pub(crate) struct NativeGenerator<'g> {
    pub(crate) graph: &'g FlowGraph,
    pub(crate) index: GraphIndex<'g>,
    pub(crate) back_edges: HashSet<String>,
    pub(crate) patterns: HashMap<String, RepeatPattern>,
    pub(crate) warnings: Vec<Warning>,
}

impl<'g> NativeGenerator<'g> {
    pub(crate) fn new(graph: &'g FlowGraph, analysis: &Analysis) -> Self {
        let index = GraphIndex::new(graph);
        let back_edges: HashSet<String> = analysis.back_edges.iter().cloned().collect();
        let patterns = detect_repeat_patterns(&index, &analysis.repeat_back_edges, &back_edges);
        Self {
            graph,
            index,
            back_edges,
            patterns,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn build_document(&mut self) -> Yaml {
        let triggers = emit::triggers_list(self.graph);
        let starts = self.trigger_successors();

        let mut conditions = Vec::new();
        let actions = match starts.len() {
            0 => Vec::new(),
            1 => match self.promote_leading_conditions(&starts[0], &mut conditions) {
                Some(start) => self.build_sequence(&start, HashSet::new(), &HashSet::new()),
                None => Vec::new(),
            },
            _ => {
                let (mut blocks, continuation) =
                    self.build_fanout(&starts, &HashSet::new(), &HashSet::new());
                if let Some(next) = continuation {
                    blocks.extend(self.build_sequence(&next, HashSet::new(), &HashSet::new()));
                }
                blocks
            }
        };

        assemble_document(self.graph, triggers, conditions, actions)
    }

    /// Distinct first nodes reached from the triggers, in edge order.
    fn trigger_successors(&self) -> Vec<String> {
        let mut starts: Vec<String> = Vec::new();
        for trigger in self.graph.triggers() {
            for edge in self.index.outgoing(&trigger.id) {
                if !starts.contains(&edge.target) {
                    starts.push(edge.target.clone());
                }
            }
        }
        starts
    }

    /// Lift a leading chain of single-path conditions into the automation's
    /// root `conditions:` block. A condition reached only through its `false`
    /// handle is inverted with `condition: not`. Promotion stops at the first
    /// condition that branches (or starts a repeat pattern); the continuation
    /// becomes the start of the action sequence.
    fn promote_leading_conditions(
        &mut self,
        start: &str,
        conditions: &mut Vec<Yaml>,
    ) -> Option<String> {
        let mut current = start.to_string();
        loop {
            let Some(node) = self.index.node(&current) else {
                self.warnings.push(Warning::UnknownNode { id: current });
                return None;
            };
            let Some(cond) = node.data.as_condition() else {
                return Some(current);
            };
            if self.patterns.contains_key(&current) {
                return Some(current);
            }
            let outs = self.forward_outgoing(&current);
            if outs.len() != 1 {
                return Some(current);
            }
            let edge = outs[0];
            let payload = emit::condition_entry(cond);
            match edge.source_handle {
                Some(EdgeHandle::False) => conditions.push(not_wrap(vec![payload])),
                _ => conditions.push(payload),
            }
            current = edge.target.clone();
        }
    }

    // -- forward-edge views -------------------------------------------------

    pub(crate) fn forward_outgoing(&self, id: &str) -> Vec<&'g cafe_core::FlowEdge> {
        self.index
            .outgoing(id)
            .iter()
            .filter(|e| !self.back_edges.contains(&e.id))
            .copied()
            .collect()
    }

    pub(crate) fn truthy_forward_targets(&self, id: &str) -> Vec<String> {
        self.index
            .truthy_outgoing(id)
            .into_iter()
            .filter(|e| !self.back_edges.contains(&e.id))
            .map(|e| e.target.clone())
            .collect()
    }

    pub(crate) fn false_forward_targets(&self, id: &str) -> Vec<String> {
        self.index
            .false_outgoing(id)
            .into_iter()
            .filter(|e| !self.back_edges.contains(&e.id))
            .map(|e| e.target.clone())
            .collect()
    }

    pub(crate) fn condition_payload(&self, id: &str) -> Option<Yaml> {
        self.index
            .node(id)
            .and_then(|n| n.data.as_condition())
            .map(emit::condition_entry)
    }

    pub(crate) fn is_condition(&self, id: &str) -> bool {
        self.index.kind(id) == Some(NodeKind::Condition)
    }
}

pub(crate) fn not_wrap(conditions: Vec<Yaml>) -> Yaml {
    let mut map = Mapping::new();
    map.insert(ystr("condition"), ystr("not"));
    map.insert(ystr("conditions"), Yaml::Sequence(conditions));
    Yaml::Mapping(map)
}

pub(crate) fn or_wrap(conditions: Vec<Yaml>) -> Yaml {
    let mut map = Mapping::new();
    map.insert(ystr("condition"), ystr("or"));
    map.insert(ystr("conditions"), Yaml::Sequence(conditions));
    Yaml::Mapping(map)
}

/// HA implicitly ANDs the entries of a multi-condition `if:` list.
pub(crate) fn if_block(conditions: Vec<Yaml>, then: Vec<Yaml>, otherwise: Vec<Yaml>) -> Yaml {
    let mut map = Mapping::new();
    map.insert(ystr("if"), Yaml::Sequence(conditions));
    map.insert(ystr("then"), Yaml::Sequence(then));
    map.insert(ystr("else"), Yaml::Sequence(otherwise));
    Yaml::Mapping(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cafe_core::model::{
        ActionData, ConditionData, ConditionKind, DelayData, DelayValue, NodeData, TriggerData,
    };
    use cafe_core::{analyze, FlowGraphBuilder};
    use serde_json::json;

    fn trigger() -> NodeData {
        NodeData::Trigger(TriggerData {
            entity_id: Some(json!("binary_sensor.motion")),
            ..TriggerData::default()
        })
    }

    fn service(name: &str) -> NodeData {
        NodeData::Action(ActionData {
            service: Some(name.to_string()),
            ..ActionData::default()
        })
    }

    fn state_condition(entity: &str) -> NodeData {
        NodeData::Condition(ConditionData {
            kind: ConditionKind::State,
            entity_id: Some(json!(entity)),
            state: Some(json!("on")),
            ..ConditionData::default()
        })
    }

    fn lower(graph: &cafe_core::FlowGraph) -> String {
        let analysis = analyze(graph);
        assert!(
            NativeStrategy.can_handle(&analysis),
            "graph should be native-compatible: {analysis:?}"
        );
        let outcome = NativeStrategy.generate(graph, &analysis);
        serde_yaml::to_string(&outcome.document).unwrap()
    }

    #[test]
    fn test_leading_condition_chain_is_promoted() {
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node("c1", 0.0, 1.0, state_condition("light.x"))
            .node("c2", 0.0, 2.0, state_condition("light.y"))
            .node("a", 0.0, 3.0, service("light.turn_on"))
            .edge("e1", "t", "c1")
            .edge_true("e2", "c1", "c2")
            .edge_true("e3", "c2", "a")
            .build();
        let yaml = lower(&graph);
        assert!(yaml.contains("conditions:"));
        assert!(!yaml.contains("if:"));
        assert!(yaml.contains("light.turn_on"));
    }

    #[test]
    fn test_false_only_condition_promotes_inverted() {
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node("c1", 0.0, 1.0, state_condition("light.x"))
            .node("a", 0.0, 2.0, service("light.turn_on"))
            .edge("e1", "t", "c1")
            .edge_false("e2", "c1", "a")
            .build();
        let yaml = lower(&graph);
        assert!(yaml.contains("condition: not"));
        assert!(!yaml.contains("if:"));
    }

    #[test]
    fn test_branching_condition_emits_if_else() {
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node("c1", 0.0, 1.0, state_condition("light.x"))
            .node("a_then", 0.0, 2.0, service("light.turn_on"))
            .node("a_else", 1.0, 2.0, service("light.turn_off"))
            .edge("e1", "t", "c1")
            .edge_true("e2", "c1", "a_then")
            .edge_false("e3", "c1", "a_else")
            .build();
        let yaml = lower(&graph);
        assert_eq!(yaml.matches("if:").count(), 1);
        assert!(yaml.contains("then:"));
        assert!(yaml.contains("else:"));
        assert!(yaml.contains("light.turn_on"));
        assert!(yaml.contains("light.turn_off"));
        // The branching condition is not promoted.
        assert!(!yaml.contains("\nconditions:"));
    }

    #[test]
    fn test_or_convergence_on_true() {
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node("c1", 0.0, 1.0, state_condition("light.x"))
            .node("c2", 1.0, 1.0, state_condition("light.y"))
            .node("a", 0.0, 2.0, service("light.turn_on"))
            .edge("e1", "t", "c1")
            .edge("e2", "t", "c2")
            .edge_true("e3", "c1", "a")
            .edge_true("e4", "c2", "a")
            .build();
        let yaml = lower(&graph);
        assert!(yaml.contains("condition: or"));
        assert_eq!(yaml.matches("light.turn_on").count(), 1);
    }

    #[test]
    fn test_parallel_fan_out() {
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node("a1", 0.0, 1.0, service("light.turn_on"))
            .node("a2", 1.0, 1.0, service("switch.turn_on"))
            .edge("e1", "t", "a1")
            .edge("e2", "t", "a2")
            .build();
        let yaml = lower(&graph);
        assert!(yaml.contains("parallel:"));
        assert!(yaml.contains("light.turn_on"));
        assert!(yaml.contains("switch.turn_on"));
    }

    #[test]
    fn test_parallel_convergence_deduplicates_postlude() {
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node("split", 0.0, 1.0, service("scene.turn_on"))
            .node("a1", 0.0, 2.0, service("light.turn_on"))
            .node("a2", 1.0, 2.0, service("switch.turn_on"))
            .node("join", 0.0, 3.0, service("notify.done"))
            .edge("e1", "t", "split")
            .edge("e2", "split", "a1")
            .edge("e3", "split", "a2")
            .edge("e4", "a1", "join")
            .edge("e5", "a2", "join")
            .build();
        let yaml = lower(&graph);
        assert!(yaml.contains("parallel:"));
        // The shared postlude appears once, after the parallel block.
        assert_eq!(yaml.matches("notify.done").count(), 1);
    }

    #[test]
    fn test_while_loop_emission() {
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node("c", 0.0, 1.0, state_condition("binary_sensor.motion"))
            .node("a", 0.0, 2.0, service("light.turn_on"))
            .node(
                "d",
                0.0,
                3.0,
                NodeData::Delay(DelayData {
                    duration: DelayValue::Text("00:00:05".into()),
                    alias: None,
                    id: None,
                    enabled: None,
                    extra: Default::default(),
                }),
            )
            .edge("e1", "t", "c")
            .edge_true("e2", "c", "a")
            .edge("e3", "a", "d")
            .edge("e4", "d", "c")
            .build();
        let analysis = analyze(&graph);
        assert!(!analysis.has_cycles);
        let yaml = lower(&graph);
        assert!(yaml.contains("repeat:"));
        assert!(yaml.contains("while:"));
        assert!(yaml.contains("00:00:05"));
    }

    #[test]
    fn test_count_loop_hides_counter() {
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, trigger())
            .node(
                "init",
                0.0,
                1.0,
                NodeData::SetVariables(cafe_core::SetVariablesData {
                    variables: serde_json::from_value(json!({"_repeat_counter_1": 0})).unwrap(),
                    ..cafe_core::SetVariablesData::default()
                }),
            )
            .node(
                "inc",
                0.0,
                2.0,
                NodeData::SetVariables(cafe_core::SetVariablesData {
                    variables: serde_json::from_value(
                        json!({"_repeat_counter_1": "{{ _repeat_counter_1 + 1 }}"}),
                    )
                    .unwrap(),
                    ..cafe_core::SetVariablesData::default()
                }),
            )
            .node("body", 0.0, 3.0, service("light.toggle"))
            .node(
                "check",
                0.0,
                4.0,
                NodeData::Condition(ConditionData {
                    kind: ConditionKind::Template,
                    value_template: Some("{{ _repeat_counter_1 < 3 }}".into()),
                    ..ConditionData::default()
                }),
            )
            .edge("e1", "t", "init")
            .edge("e2", "init", "inc")
            .edge("e3", "inc", "body")
            .edge("e4", "body", "check")
            .edge_true("e5", "check", "inc")
            .build();
        let yaml = lower(&graph);
        assert!(yaml.contains("count: 3"));
        assert!(yaml.contains("light.toggle"));
        assert!(!yaml.contains("_repeat_counter_"));
    }
}

