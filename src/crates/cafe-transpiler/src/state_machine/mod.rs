//! State-machine lowering
//!
//! Compiles arbitrary-topology graphs into a flat dispatcher: a `variables:`
//! action seeds the `current_node` program counter, then a `repeat.until`
//! loop drives a `choose:` block with one branch per non-trigger node. Each
//! branch performs the node's effect and advances `current_node`; terminal
//! edges advance to the literal `"END"`.
//!
//! This strategy handles every valid graph and is the fallback whenever the
//! native patterns do not apply.

mod jinja;

use serde_yaml::{Mapping, Value as Yaml};

use cafe_core::model::{FlowGraph, NodeData, NodeKind};
use cafe_core::{Analysis, GraphIndex, Warning};

use crate::emit::{self, ystr};
use crate::native::if_block;
use crate::strategy::{assemble_document, LoweringStrategy, StrategyOutcome};

/// Program-counter value that terminates the dispatcher loop.
const END_NODE: &str = "END";

pub struct StateMachineStrategy;

impl LoweringStrategy for StateMachineStrategy {
    fn name(&self) -> &'static str {
        "state-machine"
    }

    fn can_handle(&self, _analysis: &Analysis) -> bool {
        true
    }

    fn generate(&self, graph: &FlowGraph, _analysis: &Analysis) -> StrategyOutcome {
        let mut generator = StateMachineGenerator {
            graph,
            index: GraphIndex::new(graph),
            warnings: Vec::new(),
        };
        let document = generator.build_document();
        StrategyOutcome {
            document,
            warnings: generator.warnings,
        }
    }
}

struct StateMachineGenerator<'g> {
    graph: &'g FlowGraph,
    index: GraphIndex<'g>,
    warnings: Vec<Warning>,
}

impl<'g> StateMachineGenerator<'g> {
    fn build_document(&mut self) -> Yaml {
        let graph = self.graph;
        let triggers = emit::triggers_list(graph);

        let mut branches = Vec::new();
        for node in &graph.nodes {
            if node.data.kind() == NodeKind::Trigger {
                continue;
            }
            branches.push(self.dispatch_branch(node));
        }

        let mut choose = Mapping::new();
        choose.insert(ystr("choose"), Yaml::Sequence(branches));
        choose.insert(ystr("default"), Yaml::Sequence(self.default_branch()));

        let mut repeat = Mapping::new();
        repeat.insert(
            ystr("sequence"),
            Yaml::Sequence(vec![Yaml::Mapping(choose)]),
        );
        repeat.insert(
            ystr("until"),
            ystr(format!("{{{{ current_node == \"{END_NODE}\" }}}}")),
        );
        let mut repeat_block = Mapping::new();
        repeat_block.insert(ystr("repeat"), Yaml::Mapping(repeat));

        let actions = vec![self.init_action(), Yaml::Mapping(repeat_block)];
        assemble_document(graph, triggers, Vec::new(), actions)
    }

    /// The `variables:` action that seeds the program counter. When triggers
    /// route to different first nodes the seed dispatches on `trigger.idx`.
    fn init_action(&mut self) -> Yaml {
        let graph = self.graph;
        let firsts: Vec<String> = graph
            .triggers()
            .map(|t| self.first_target(&t.id))
            .collect();

        let initial = if firsts.is_empty() {
            // Script form: enter at the first non-trigger entry node.
            self.index
                .node_ids()
                .find(|id| self.index.incoming(id).is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| END_NODE.to_string())
        } else if firsts.iter().all(|f| f == &firsts[0]) {
            firsts[0].clone()
        } else {
            let mut template = String::new();
            for (idx, first) in firsts.iter().enumerate() {
                if idx == 0 {
                    template.push_str(&format!("{{% if trigger.idx == \"{idx}\" %}}{first}"));
                } else if idx + 1 < firsts.len() {
                    template.push_str(&format!("{{% elif trigger.idx == \"{idx}\" %}}{first}"));
                } else {
                    template.push_str(&format!("{{% else %}}{first}"));
                }
            }
            template.push_str("{% endif %}");
            template
        };

        let mut bindings = Mapping::new();
        bindings.insert(ystr("current_node"), ystr(initial));
        bindings.insert(ystr("flow_context"), Yaml::Mapping(Mapping::new()));
        let mut map = Mapping::new();
        map.insert(ystr("variables"), Yaml::Mapping(bindings));
        Yaml::Mapping(map)
    }

    /// One `choose:` branch for a non-trigger node: match on the program
    /// counter, perform the node's effect, advance.
    fn dispatch_branch(&mut self, node: &cafe_core::FlowNode) -> Yaml {
        let matcher = {
            let mut cond = Mapping::new();
            cond.insert(ystr("condition"), ystr("template"));
            cond.insert(
                ystr("value_template"),
                ystr(format!("{{{{ current_node == \"{}\" }}}}", node.id)),
            );
            Yaml::Mapping(cond)
        };

        let sequence = match &node.data {
            NodeData::Condition(cond) => self.condition_sequence(&node.id, cond),
            _ => {
                let mut items = Vec::new();
                if let Some(effect) = emit::node_action(node) {
                    items.push(effect);
                }
                items.push(set_node(&self.next_target(&node.id)));
                items
            }
        };

        let mut branch = Mapping::new();
        branch.insert(ystr("conditions"), Yaml::Sequence(vec![matcher]));
        branch.insert(ystr("sequence"), Yaml::Sequence(sequence));
        Yaml::Mapping(branch)
    }

    /// Conditions advance through an inline Jinja if/else when the condition
    /// compiles to an expression; otherwise through a native `if:` action.
    fn condition_sequence(
        &mut self,
        id: &str,
        cond: &cafe_core::ConditionData,
    ) -> Vec<Yaml> {
        let truthy = self.handle_targets(id, true);
        let falsy = self.handle_targets(id, false);
        let then_node = truthy.first().cloned().unwrap_or_else(|| END_NODE.to_string());
        let else_node = falsy.first().cloned().unwrap_or_else(|| END_NODE.to_string());

        if let Some(expr) = jinja::condition_expr(cond) {
            let advance = format!(
                "{{% if {expr} %}}\"{then_node}\"{{% else %}}\"{else_node}\"{{% endif %}}"
            );
            vec![set_node(&advance)]
        } else {
            vec![if_block(
                vec![emit::condition_entry(cond)],
                vec![set_node(&then_node)],
                vec![set_node(&else_node)],
            )]
        }
    }

    fn handle_targets(&mut self, id: &str, truthy: bool) -> Vec<String> {
        let edges = if truthy {
            self.index.truthy_outgoing(id)
        } else {
            self.index.false_outgoing(id)
        };
        if edges.len() > 1 {
            self.warnings.push(Warning::UnsupportedFanOut {
                id: id.to_string(),
                count: edges.len(),
            });
        }
        edges.into_iter().map(|e| e.target.clone()).collect()
    }

    fn first_target(&mut self, id: &str) -> String {
        self.next_target(id)
    }

    /// First outgoing edge's target; terminal nodes advance to END. Fan-out
    /// is linearized with a warning.
    fn next_target(&mut self, id: &str) -> String {
        let outgoing = self.index.outgoing(id);
        if outgoing.len() > 1 {
            self.warnings.push(Warning::UnsupportedFanOut {
                id: id.to_string(),
                count: outgoing.len(),
            });
        }
        outgoing
            .first()
            .map(|e| e.target.clone())
            .unwrap_or_else(|| END_NODE.to_string())
    }

    fn default_branch(&self) -> Vec<Yaml> {
        let mut data = Mapping::new();
        data.insert(
            ystr("message"),
            ystr("Flow state machine reached unknown node {{ current_node }}"),
        );
        data.insert(ystr("level"), ystr("warning"));
        let mut log = Mapping::new();
        log.insert(ystr("service"), ystr("system_log.write"));
        log.insert(ystr("data"), Yaml::Mapping(data));
        vec![Yaml::Mapping(log), set_node(END_NODE)]
    }
}

/// `{variables: {current_node: <value>}}`
fn set_node(value: &str) -> Yaml {
    let mut bindings = Mapping::new();
    bindings.insert(ystr("current_node"), ystr(value));
    let mut map = Mapping::new();
    map.insert(ystr("variables"), Yaml::Mapping(bindings));
    Yaml::Mapping(map)
}
