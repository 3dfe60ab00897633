//! Action-list lifting
//!
//! A linear walk over a YAML action sequence with a frontier of "most recent
//! node(s)"; every lifted node is linked from the whole frontier. Nested
//! blocks (`if`, `choose`, `repeat`, `parallel`) recurse with their own
//! frontiers and return the branch tails.

use serde_json::Value as Json;
use serde_yaml::Value as Yaml;

use cafe_core::model::{
    ActionData, ConditionData, ConditionKind, DelayData, DelayValue, EdgeHandle, NodeData,
    SetVariablesData, WaitData,
};
use cafe_core::Warning;

use super::{items_of, ParserCtx};

/// One frontier entry: the node to link from, and the handle the outgoing
/// edge must carry (set when the node is a condition).
#[derive(Debug, Clone)]
pub(crate) struct FrontierLink {
    pub node: String,
    pub handle: Option<EdgeHandle>,
}

impl FrontierLink {
    fn plain(node: String) -> Self {
        Self { node, handle: None }
    }

    fn truthy(node: String) -> Self {
        Self {
            node,
            handle: Some(EdgeHandle::True),
        }
    }

    fn falsy(node: String) -> Self {
        Self {
            node,
            handle: Some(EdgeHandle::False),
        }
    }
}

pub(crate) type Frontier = Vec<FrontierLink>;

/// Walk an action list, returning the frontier after its last item.
pub(crate) fn walk(ctx: &mut ParserCtx, items: &[Yaml], frontier: Frontier, path: &str) -> Frontier {
    let mut frontier = frontier;
    for (i, item) in items.iter().enumerate() {
        let item_path = format!("{path}/{i}");
        frontier = lift_item(ctx, item, frontier, &item_path);
    }
    frontier
}

fn lift_item(ctx: &mut ParserCtx, item: &Yaml, frontier: Frontier, path: &str) -> Frontier {
    // Template shorthand conditions appear as bare strings.
    if let Some(template) = item.as_str() {
        let data = ConditionData {
            kind: ConditionKind::Template,
            value_template: Some(template.to_string()),
            ..ConditionData::default()
        };
        let id = ctx.add_node("condition", NodeData::Condition(data));
        ctx.link_all(&frontier, &id);
        return vec![FrontierLink::truthy(id)];
    }

    let Some(map) = item.as_mapping() else {
        return unknown_item(ctx, item, frontier, path);
    };

    if map.contains_key("repeat") {
        return lift_repeat(ctx, item, frontier, path);
    }
    if map.contains_key("choose") {
        return lift_choose(ctx, item, frontier, path);
    }
    if map.contains_key("if") {
        return lift_if(ctx, item, frontier, path);
    }
    if map.contains_key("parallel") {
        return lift_parallel(ctx, item, frontier, path);
    }
    if map.contains_key("delay") {
        return lift_delay(ctx, item, frontier);
    }
    if map.contains_key("wait_template") || map.contains_key("wait_for_trigger") {
        let data: WaitData = from_yaml(item).unwrap_or_default();
        let id = ctx.add_node("wait", NodeData::Wait(data));
        ctx.link_all(&frontier, &id);
        return vec![FrontierLink::plain(id)];
    }
    if map.contains_key("variables") {
        let data: SetVariablesData = from_yaml(item).unwrap_or_default();
        let id = ctx.add_node("set_variables", NodeData::SetVariables(data));
        ctx.link_all(&frontier, &id);
        return vec![FrontierLink::plain(id)];
    }
    if map.contains_key("condition") {
        let (data, _) = parse_condition(ctx, item, path);
        let id = ctx.add_node("condition", NodeData::Condition(data));
        ctx.link_all(&frontier, &id);
        return vec![FrontierLink::truthy(id)];
    }
    if map.contains_key("service") || map.contains_key("action") || map.contains_key("device_id")
    {
        return lift_service(ctx, item, frontier);
    }

    unknown_item(ctx, item, frontier, path)
}

fn lift_service(ctx: &mut ParserCtx, item: &Yaml, frontier: Frontier) -> Frontier {
    let mut map = item.as_mapping().cloned().unwrap_or_default();
    // Modern HA spells the service key `action`.
    if let Some(service) = map.remove("action") {
        map.entry(Yaml::from("service")).or_insert(service);
    }
    let data: ActionData = from_yaml(&Yaml::Mapping(map)).unwrap_or_default();
    let id = ctx.add_node("action", NodeData::Action(data));
    ctx.link_all(&frontier, &id);
    vec![FrontierLink::plain(id)]
}

fn lift_delay(ctx: &mut ParserCtx, item: &Yaml, frontier: Frontier) -> Frontier {
    let mut map = item.as_mapping().cloned().unwrap_or_default();
    let duration = map.remove("delay").unwrap_or(Yaml::Null);
    map.insert(Yaml::from("duration"), duration);
    let data: DelayData = from_yaml(&Yaml::Mapping(map)).unwrap_or(DelayData {
        duration: DelayValue::Text("00:00:00".to_string()),
        alias: None,
        id: None,
        enabled: None,
        extra: Default::default(),
    });
    let id = ctx.add_node("delay", NodeData::Delay(data));
    ctx.link_all(&frontier, &id);
    vec![FrontierLink::plain(id)]
}

/// `if:` lifting: conditions chain through `true` handles; `then:` hangs off the
/// chain tail, `else:` off the chain head's `false` handle (the inverse of
/// condition chaining, which shares the head's else).
fn lift_if(ctx: &mut ParserCtx, item: &Yaml, frontier: Frontier, path: &str) -> Frontier {
    let conditions = items_of(item, &["if"]);
    if conditions.is_empty() {
        return unknown_item(ctx, item, frontier, path);
    }

    let mut chain: Vec<String> = Vec::new();
    let mut incoming = frontier;
    for (i, cond) in conditions.iter().enumerate() {
        let (data, _) = parse_condition(ctx, cond, &format!("{path}/if/{i}"));
        let id = ctx.add_node("condition", NodeData::Condition(data));
        ctx.link_all(&incoming, &id);
        incoming = vec![FrontierLink::truthy(id.clone())];
        chain.push(id);
    }
    let head = chain.first().unwrap().clone();
    let tail = chain.last().unwrap().clone();

    let then_items = items_of(item, &["then"]);
    let then_frontier = walk(
        ctx,
        &then_items,
        vec![FrontierLink::truthy(tail)],
        &format!("{path}/then"),
    );

    let mut frontier = then_frontier;
    match item.get("else") {
        Some(_) => {
            let else_items = items_of(item, &["else"]);
            let else_frontier = walk(
                ctx,
                &else_items,
                vec![FrontierLink::falsy(head)],
                &format!("{path}/else"),
            );
            frontier.extend(else_frontier);
        }
        None => frontier.push(FrontierLink::falsy(head)),
    }
    frontier
}

/// `choose:` lifting: one condition node per choice, sequences hang off the `true`
/// handles, and the `default:` sequence continues from the pre-choose
/// frontier.
fn lift_choose(ctx: &mut ParserCtx, item: &Yaml, frontier: Frontier, path: &str) -> Frontier {
    let choices = items_of(item, &["choose"]);
    if choices.is_empty() && item.get("default").is_none() {
        return unknown_item(ctx, item, frontier, path);
    }

    let mut result: Frontier = Vec::new();

    for (i, choice) in choices.iter().enumerate() {
        let choice_path = format!("{path}/choose/{i}");
        let conditions = items_of(choice, &["conditions", "condition"]);
        let data = match conditions.len() {
            0 => ConditionData::default(),
            1 => parse_condition(ctx, &conditions[0], &choice_path).0,
            _ => ConditionData {
                kind: ConditionKind::And,
                conditions: Some(
                    conditions
                        .iter()
                        .map(|c| to_json(c))
                        .collect(),
                ),
                ..ConditionData::default()
            },
        };
        let id = ctx.add_node("condition", NodeData::Condition(data));
        ctx.link_all(&frontier, &id);

        let sequence = items_of(choice, &["sequence"]);
        let tail = walk(
            ctx,
            &sequence,
            vec![FrontierLink::truthy(id)],
            &format!("{choice_path}/sequence"),
        );
        result.extend(tail);
    }

    if item.get("default").is_some() {
        let default_items = items_of(item, &["default"]);
        let tail = walk(ctx, &default_items, frontier, &format!("{path}/default"));
        result.extend(tail);
    }

    result
}

/// `parallel:` lifting: every branch starts from the same frontier; the tails of
/// all branches carry on together.
fn lift_parallel(ctx: &mut ParserCtx, item: &Yaml, frontier: Frontier, path: &str) -> Frontier {
    let mut result: Frontier = Vec::new();
    for (i, branch) in items_of(item, &["parallel"]).iter().enumerate() {
        let branch_path = format!("{path}/parallel/{i}");
        let items: Vec<Yaml> = match branch {
            Yaml::Sequence(items) => items.clone(),
            other if other.get("sequence").is_some() => items_of(other, &["sequence"]),
            other => vec![other.clone()],
        };
        let tail = walk(ctx, &items, frontier.clone(), &branch_path);
        result.extend(tail);
    }
    if result.is_empty() {
        frontier
    } else {
        result
    }
}

/// `repeat:` lifting: reconstruct the loop structure with a back-edge so the
/// analyzer sees a structured repeat, not a cycle.
fn lift_repeat(ctx: &mut ParserCtx, item: &Yaml, frontier: Frontier, path: &str) -> Frontier {
    let Some(repeat) = item.get("repeat") else {
        return unknown_item(ctx, item, frontier, path);
    };
    let sequence = items_of(repeat, &["sequence"]);

    if let Some(count) = repeat.get("count") {
        return lift_count(ctx, count, &sequence, frontier, path);
    }

    if repeat.get("while").is_some() {
        let conditions = items_of(repeat, &["while"]);
        return lift_while(ctx, &conditions, &sequence, frontier, path);
    }

    if repeat.get("until").is_some() {
        let conditions = items_of(repeat, &["until"]);
        return lift_until(ctx, &conditions, &sequence, frontier, path);
    }

    unknown_item(ctx, item, frontier, path)
}

fn lift_while(
    ctx: &mut ParserCtx,
    conditions: &[Yaml],
    sequence: &[Yaml],
    frontier: Frontier,
    path: &str,
) -> Frontier {
    let mut chain: Vec<String> = Vec::new();
    let mut incoming = frontier;
    for (i, cond) in conditions.iter().enumerate() {
        let (data, _) = parse_condition(ctx, cond, &format!("{path}/while/{i}"));
        let id = ctx.add_node("condition", NodeData::Condition(data));
        ctx.link_all(&incoming, &id);
        incoming = vec![FrontierLink::truthy(id.clone())];
        chain.push(id);
    }
    let Some(head) = chain.first().cloned() else {
        return walk(ctx, sequence, incoming, &format!("{path}/sequence"));
    };
    let tail_cond = chain.last().unwrap().clone();

    let body_tail = walk(
        ctx,
        sequence,
        vec![FrontierLink::truthy(tail_cond)],
        &format!("{path}/sequence"),
    );
    // Loop back into the condition chain head.
    ctx.link_all(&body_tail, &head);

    vec![FrontierLink::falsy(head)]
}

fn lift_until(
    ctx: &mut ParserCtx,
    conditions: &[Yaml],
    sequence: &[Yaml],
    frontier: Frontier,
    path: &str,
) -> Frontier {
    let body_start_index = ctx.nodes.len();
    let body_tail = walk(ctx, sequence, frontier, &format!("{path}/sequence"));
    let body_head = ctx
        .nodes
        .get(body_start_index)
        .map(|n| n.id.clone());

    let mut chain: Vec<String> = Vec::new();
    let mut incoming = body_tail;
    for (i, cond) in conditions.iter().enumerate() {
        let (data, _) = parse_condition(ctx, cond, &format!("{path}/until/{i}"));
        let id = ctx.add_node("condition", NodeData::Condition(data));
        ctx.link_all(&incoming, &id);
        incoming = vec![FrontierLink::truthy(id.clone())];
        chain.push(id);
    }
    let Some(exit_cond) = chain.last().cloned() else {
        return incoming;
    };

    // Check-after loop: false repeats the body.
    if let Some(body_head) = body_head {
        ctx.add_edge(&exit_cond, &body_head, Some(EdgeHandle::False));
    }

    vec![FrontierLink::truthy(exit_cond)]
}

/// `repeat.count` expands into the counter scaffold the lowering folds away:
/// init, leading increment, body, and the counter check whose `true` handle
/// loops back.
fn lift_count(
    ctx: &mut ParserCtx,
    count: &Yaml,
    sequence: &[Yaml],
    frontier: Frontier,
    path: &str,
) -> Frontier {
    let count = count
        .as_u64()
        .or_else(|| count.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(1);
    let counter = ctx.next_repeat_counter();

    let init = SetVariablesData {
        variables: [(counter.clone(), Json::from(0))].into_iter().collect(),
        ..SetVariablesData::default()
    };
    let init_id = ctx.add_node("set_variables", NodeData::SetVariables(init));
    ctx.link_all(&frontier, &init_id);

    let increment = SetVariablesData {
        variables: [(
            counter.clone(),
            Json::from(format!("{{{{ {counter} + 1 }}}}")),
        )]
        .into_iter()
        .collect(),
        ..SetVariablesData::default()
    };
    let inc_id = ctx.add_node("set_variables", NodeData::SetVariables(increment));
    ctx.add_edge(&init_id, &inc_id, None);

    let body_tail = walk(
        ctx,
        sequence,
        vec![FrontierLink::plain(inc_id.clone())],
        &format!("{path}/sequence"),
    );

    let check = ConditionData {
        kind: ConditionKind::Template,
        value_template: Some(format!("{{{{ {counter} < {count} }}}}")),
        ..ConditionData::default()
    };
    let check_id = ctx.add_node("condition", NodeData::Condition(check));
    ctx.link_all(&body_tail, &check_id);
    ctx.add_edge(&check_id, &inc_id, Some(EdgeHandle::True));

    vec![FrontierLink::falsy(check_id)]
}

fn unknown_item(ctx: &mut ParserCtx, item: &Yaml, frontier: Frontier, path: &str) -> Frontier {
    ctx.warn(Warning::UnparseableItem {
        path: path.to_string(),
    });
    let data = ActionData {
        service: Some("unknown.unknown".to_string()),
        data: Some(to_json(item)),
        ..ActionData::default()
    };
    let id = ctx.add_node("action", NodeData::Action(data));
    ctx.link_all(&frontier, &id);
    vec![FrontierLink::plain(id)]
}

// ---------------------------------------------------------------------------
// Condition payloads
// ---------------------------------------------------------------------------

/// Decode a condition payload. Unknown condition types collapse to a
/// template condition that preserves the original payload.
pub(crate) fn parse_condition(
    ctx: &mut ParserCtx,
    raw: &Yaml,
    path: &str,
) -> (ConditionData, bool) {
    if let Some(template) = raw.as_str() {
        return (
            ConditionData {
                kind: ConditionKind::Template,
                value_template: Some(template.to_string()),
                ..ConditionData::default()
            },
            false,
        );
    }

    let kind_name = raw
        .get("condition")
        .or_else(|| raw.get("condition_type"))
        .and_then(Yaml::as_str)
        .unwrap_or("template");

    if ConditionKind::from_name(kind_name).is_none() {
        ctx.warn(Warning::UnknownConditionType {
            found: kind_name.to_string(),
            path: path.to_string(),
        });
        let body = serde_json::to_string(&to_json(raw)).unwrap_or_default();
        return (
            ConditionData {
                kind: ConditionKind::Template,
                value_template: Some(body),
                ..ConditionData::default()
            },
            false,
        );
    }

    match from_yaml::<ConditionData>(raw) {
        Ok(data) => (data, false),
        Err(_) => (
            ConditionData {
                kind: ConditionKind::Template,
                value_template: Some(serde_json::to_string(&to_json(raw)).unwrap_or_default()),
                ..ConditionData::default()
            },
            false,
        ),
    }
}

/// Root conditions additionally unwrap the promotion rewrite
/// `{condition: not, conditions: [single]}` back to the inner condition on
/// an inverted handle.
pub(crate) fn root_condition(
    ctx: &mut ParserCtx,
    raw: &Yaml,
    path: &str,
) -> (ConditionData, bool) {
    let is_not = raw
        .get("condition")
        .and_then(Yaml::as_str)
        .is_some_and(|k| k == "not");
    if is_not {
        if let Some(children) = raw.get("conditions").and_then(Yaml::as_sequence) {
            if children.len() == 1 {
                let (data, _) = parse_condition(ctx, &children[0], path);
                return (data, true);
            }
        }
    }
    parse_condition(ctx, raw, path)
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

pub(crate) fn from_yaml<T: serde::de::DeserializeOwned>(value: &Yaml) -> Result<T, serde_yaml::Error> {
    serde_yaml::from_value(value.clone())
}

pub(crate) fn to_json(value: &Yaml) -> Json {
    serde_yaml::from_value(value.clone()).unwrap_or(Json::Null)
}
