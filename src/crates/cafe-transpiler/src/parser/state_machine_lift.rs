//! State-machine decompilation
//!
//! The state-machine lowering has a rigid shape: a `variables:` seed for
//! `current_node` followed by a `repeat.until` loop around one `choose:`
//! dispatcher. When a parsed document matches it, the dispatcher branches
//! are lifted back into their source nodes (the program-counter values are
//! the original node ids) and the advance templates become edges.
//!
//! Anything that deviates from the generated shape aborts the lift and the
//! document goes through the ordinary action walker instead.

use std::sync::OnceLock;

use regex::Regex;
use serde_yaml::Value as Yaml;

use cafe_core::model::{
    ActionData, ConditionData, ConditionKind, EdgeHandle, NodeData, SetVariablesData, WaitData,
};

use super::actions::{from_yaml, to_json};
use super::{items_of, ParserCtx};

const END_NODE: &str = "END";

struct PlannedNode {
    id: String,
    data: NodeData,
    edges: Vec<(String, Option<EdgeHandle>)>,
}

fn matcher_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"current_node\s*==\s*"([^"]+)""#).expect("valid regex"))
}

fn advance_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\{%\s*if\s+(.+?)\s*%\}"([^"]+)"\{%\s*else\s*%\}"([^"]+)"\{%\s*endif\s*%\}$"#)
            .expect("valid regex")
    })
}

fn seed_pair_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"trigger\.idx\s*==\s*"(\d+)"\s*%\}\s*([A-Za-z0-9_./\-]+)"#)
            .expect("valid regex")
    })
}

fn seed_else_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{%\s*else\s*%\}\s*([A-Za-z0-9_./\-]+)\s*\{%\s*endif").expect("valid regex")
    })
}

/// Attempt the lift; returns false (with `ctx` untouched) when the actions
/// are not a generated state machine.
pub(crate) fn try_lift(ctx: &mut ParserCtx, actions: &[Yaml], trigger_ids: &[String]) -> bool {
    let Some(plan) = plan_lift(actions, trigger_ids) else {
        return false;
    };

    let known: std::collections::HashSet<String> =
        plan.nodes.iter().map(|n| n.id.clone()).collect();

    for node in &plan.nodes {
        ctx.add_node_with_id(&node.id, node.data.clone());
    }
    for (trigger, target) in &plan.seed_edges {
        if known.contains(target) {
            ctx.add_edge(trigger, target, None);
        } else {
            ctx.warn(cafe_core::Warning::UnknownNode {
                id: target.clone(),
            });
        }
    }
    for node in &plan.nodes {
        for (target, handle) in &node.edges {
            if known.contains(target) {
                ctx.add_edge(&node.id, target, *handle);
            } else {
                ctx.warn(cafe_core::Warning::UnknownNode {
                    id: target.clone(),
                });
            }
        }
    }
    true
}

struct LiftPlan {
    nodes: Vec<PlannedNode>,
    /// (trigger node id, first dispatched node id)
    seed_edges: Vec<(String, String)>,
}

fn plan_lift(actions: &[Yaml], trigger_ids: &[String]) -> Option<LiftPlan> {
    if actions.len() != 2 {
        return None;
    }

    let seed = actions[0]
        .get("variables")?
        .get("current_node")?
        .as_str()?
        .to_string();

    let repeat = actions[1].get("repeat")?;
    let until_ok = match repeat.get("until") {
        Some(Yaml::String(s)) => s.contains("current_node") && s.contains(END_NODE),
        Some(Yaml::Sequence(items)) => items.iter().any(|c| {
            c.get("value_template")
                .and_then(Yaml::as_str)
                .is_some_and(|s| s.contains("current_node") && s.contains(END_NODE))
        }),
        _ => false,
    };
    if !until_ok {
        return None;
    }

    let dispatcher = items_of(repeat, &["sequence"])
        .into_iter()
        .find(|item| item.get("choose").is_some())?;

    let mut nodes = Vec::new();
    for branch in items_of(&dispatcher, &["choose"]) {
        nodes.push(plan_branch(&branch)?);
    }

    let seed_edges = plan_seed_edges(&seed, trigger_ids);

    Some(LiftPlan { nodes, seed_edges })
}

fn plan_seed_edges(seed: &str, trigger_ids: &[String]) -> Vec<(String, String)> {
    let mut edges = Vec::new();
    if !seed.contains("{%") {
        // Literal seed: every trigger routes to the same first node.
        for trigger in trigger_ids {
            edges.push((trigger.clone(), seed.to_string()));
        }
        return edges;
    }

    let mut by_index: std::collections::HashMap<usize, String> = std::collections::HashMap::new();
    for captures in seed_pair_regex().captures_iter(seed) {
        if let Ok(idx) = captures[1].parse::<usize>() {
            by_index.insert(idx, captures[2].to_string());
        }
    }
    let fallback = seed_else_regex()
        .captures(seed)
        .map(|c| c[1].to_string());

    for (idx, trigger) in trigger_ids.iter().enumerate() {
        let target = by_index.get(&idx).cloned().or_else(|| fallback.clone());
        if let Some(target) = target {
            edges.push((trigger.clone(), target));
        }
    }
    edges
}

fn plan_branch(branch: &Yaml) -> Option<PlannedNode> {
    let matcher = items_of(branch, &["conditions"])
        .first()?
        .get("value_template")?
        .as_str()?
        .to_string();
    let id = matcher_regex().captures(&matcher)?[1].to_string();

    let sequence = items_of(branch, &["sequence"]);

    // Fallback condition form: one native if that only moves the counter.
    if sequence.len() == 1 && sequence[0].get("if").is_some() {
        let item = &sequence[0];
        let condition = items_of(item, &["if"]).into_iter().next()?;
        let data: ConditionData = from_yaml(&condition).ok()?;
        let then_target = advance_target(items_of(item, &["then"]).first()?)?;
        let else_target = advance_target(items_of(item, &["else"]).first()?)?;
        let mut edges = Vec::new();
        if then_target != END_NODE {
            edges.push((then_target, Some(EdgeHandle::True)));
        }
        if else_target != END_NODE {
            edges.push((else_target, Some(EdgeHandle::False)));
        }
        return Some(PlannedNode {
            id,
            data: NodeData::Condition(data),
            edges,
        });
    }

    let advance = advance_target(sequence.last()?)?;
    let effects = &sequence[..sequence.len() - 1];

    // Inline condition: the advance template itself carries the branch.
    if let Some(captures) = advance_regex().captures(&advance) {
        let expr = captures[1].to_string();
        let then_target = captures[2].to_string();
        let else_target = captures[3].to_string();
        let data = ConditionData {
            kind: ConditionKind::Template,
            value_template: Some(format!("{{{{ {expr} }}}}")),
            ..ConditionData::default()
        };
        let mut edges = Vec::new();
        if then_target != END_NODE {
            edges.push((then_target, Some(EdgeHandle::True)));
        }
        if else_target != END_NODE {
            edges.push((else_target, Some(EdgeHandle::False)));
        }
        return Some(PlannedNode {
            id,
            data: NodeData::Condition(data),
            edges,
        });
    }

    let data = effect_data(effects);
    let mut edges = Vec::new();
    if advance != END_NODE {
        edges.push((advance, None));
    }
    Some(PlannedNode { id, data, edges })
}

/// The trailing `{variables: {current_node: X}}` advance value.
fn advance_target(item: &Yaml) -> Option<String> {
    item.get("variables")?
        .get("current_node")?
        .as_str()
        .map(str::to_string)
}

fn effect_data(effects: &[Yaml]) -> NodeData {
    let [effect] = effects else {
        // Zero or multiple effects: keep the payload verbatim.
        return NodeData::Action(ActionData {
            service: Some("unknown.unknown".to_string()),
            data: (!effects.is_empty()).then(|| to_json(&Yaml::Sequence(effects.to_vec()))),
            ..ActionData::default()
        });
    };

    if effect.get("delay").is_some() {
        let mut map = effect.as_mapping().cloned().unwrap_or_default();
        if let Some(duration) = map.remove("delay") {
            map.insert(Yaml::from("duration"), duration);
        }
        if let Ok(data) = from_yaml(&Yaml::Mapping(map)) {
            return NodeData::Delay(data);
        }
    }
    if effect.get("wait_template").is_some() || effect.get("wait_for_trigger").is_some() {
        if let Ok(data) = from_yaml::<WaitData>(effect) {
            return NodeData::Wait(data);
        }
    }
    if effect.get("variables").is_some() {
        if let Ok(data) = from_yaml::<SetVariablesData>(effect) {
            return NodeData::SetVariables(data);
        }
    }
    if effect.get("service").is_some()
        || effect.get("action").is_some()
        || effect.get("device_id").is_some()
    {
        let mut map = effect.as_mapping().cloned().unwrap_or_default();
        if let Some(service) = map.remove("action") {
            map.entry(Yaml::from("service")).or_insert(service);
        }
        if let Ok(data) = from_yaml::<ActionData>(&Yaml::Mapping(map)) {
            return NodeData::Action(data);
        }
    }

    NodeData::Action(ActionData {
        service: Some("unknown.unknown".to_string()),
        data: Some(to_json(effect)),
        ..ActionData::default()
    })
}
