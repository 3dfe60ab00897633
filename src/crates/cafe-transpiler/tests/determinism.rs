//! Property tests for output determinism
//!
//! Generated linear automations must lower identically across runs, and the
//! parser must reproduce the node count of whatever the lowering emitted.

use proptest::prelude::*;

use cafe_core::model::{ActionData, DelayData, DelayValue, NodeData, TriggerData};
use cafe_core::{FlowGraph, FlowGraphBuilder};
use cafe_transpiler::{parse, TranspileOptions, Transpiler};

#[derive(Debug, Clone)]
enum Step {
    Service(String),
    Delay(u8),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        "[a-z]{2,8}\\.[a-z]{2,8}".prop_map(Step::Service),
        (1u8..60).prop_map(Step::Delay),
    ]
}

fn chain_graph(steps: &[Step]) -> FlowGraph {
    let mut builder = FlowGraphBuilder::new("Generated chain").node(
        "t",
        0.0,
        0.0,
        NodeData::Trigger(TriggerData {
            entity_id: Some(serde_json::json!("sensor.start")),
            ..TriggerData::default()
        }),
    );

    let mut previous = "t".to_string();
    for (i, step) in steps.iter().enumerate() {
        let id = format!("n{i}");
        let data = match step {
            Step::Service(name) => NodeData::Action(ActionData {
                service: Some(name.clone()),
                ..ActionData::default()
            }),
            Step::Delay(seconds) => NodeData::Delay(DelayData {
                duration: DelayValue::Text(format!("00:00:{seconds:02}")),
                alias: None,
                id: None,
                enabled: None,
                extra: Default::default(),
            }),
        };
        builder = builder
            .node(id.clone(), 0.0, (i + 1) as f64 * 100.0, data)
            .edge(format!("e{i}"), previous.clone(), id.clone());
        previous = id;
    }
    builder.build()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn transpile_is_deterministic(steps in prop::collection::vec(step_strategy(), 1..12)) {
        let graph = chain_graph(&steps);
        let transpiler = Transpiler::new();

        let first = transpiler.transpile_graph(&graph, &TranspileOptions::default());
        let second = transpiler.transpile_graph(&graph, &TranspileOptions::default());

        prop_assert!(first.success);
        prop_assert_eq!(first.strategy.as_deref(), Some("native"));
        prop_assert_eq!(first.yaml, second.yaml);
    }

    #[test]
    fn parse_preserves_chain_length(steps in prop::collection::vec(step_strategy(), 1..12)) {
        let graph = chain_graph(&steps);
        let outcome = Transpiler::new().transpile_graph(&graph, &TranspileOptions::default());
        prop_assert!(outcome.success);

        let parsed = parse(outcome.yaml.as_deref().unwrap());
        prop_assert!(parsed.success());
        let round = parsed.graph.unwrap();
        prop_assert_eq!(round.nodes.len(), graph.nodes.len());
        prop_assert_eq!(round.edges.len(), graph.edges.len());
    }
}
