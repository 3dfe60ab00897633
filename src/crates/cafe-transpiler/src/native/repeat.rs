//! Repeat-pattern detection
//!
//! Structural back-edges that touch a condition node encode Home Assistant's
//! `repeat` construct. This pre-pass classifies each one:
//!
//! - back-edge from an ordinary node *into* a condition chain → `while`
//! - back-edge out of a condition's `false` handle → `until`
//! - back-edge out of a condition's `true` handle → `count`, with the literal
//!   extracted from the counter template `{{ _repeat_counter_* < N }}`
//!
//! Every node consumed by a pattern is marked internal so the other rewrites
//! leave it alone. A `true`-handle back-edge whose template does not match
//! the counter shape degrades to an `until` over the negated condition.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::OnceLock;

use regex::Regex;

use cafe_core::model::{EdgeHandle, NodeKind};
use cafe_core::GraphIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RepeatKind {
    While,
    Until { negate: bool },
    Count(u64),
}

/// One detected loop. `entry` is the node at which the sequence builder
/// replaces traversal with a `repeat:` block.
#[derive(Debug, Clone)]
pub(crate) struct RepeatPattern {
    pub kind: RepeatKind,
    pub entry: String,
    /// Condition-chain node ids, loop-header first.
    pub conditions: Vec<String>,
    /// First node of the emitted body sequence.
    pub body_start: Option<String>,
    /// Continuation after the loop, when present.
    pub exit: Option<String>,
    /// Every node consumed by the pattern.
    pub internal: HashSet<String>,
    /// Nodes at which body emission stops.
    pub boundary: HashSet<String>,
}

fn counter_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\{\{\s*_repeat_counter_\w*\s*<\s*(\d+)\s*\}\}\s*$")
            .expect("counter pattern is valid")
    })
}

/// Extract the count literal from a counter condition template.
pub(crate) fn count_from_template(template: &str) -> Option<u64> {
    counter_regex()
        .captures(template)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Classify every repeat back-edge. Patterns are keyed by their entry node;
/// when loops overlap the first classified pattern wins.
pub(crate) fn detect_repeat_patterns(
    index: &GraphIndex,
    repeat_edge_ids: &[String],
    back_edge_ids: &HashSet<String>,
) -> HashMap<String, RepeatPattern> {
    let mut patterns: HashMap<String, RepeatPattern> = HashMap::new();

    for edge_id in repeat_edge_ids {
        let Some(edge) = index.edge(edge_id) else {
            continue;
        };
        let source_kind = index.kind(&edge.source);
        let target_kind = index.kind(&edge.target);

        let pattern = match (source_kind, target_kind, edge.source_handle) {
            (Some(src), Some(NodeKind::Condition), _) if src != NodeKind::Condition => {
                detect_while(index, &edge.target, back_edge_ids)
            }
            (Some(NodeKind::Condition), Some(_), Some(EdgeHandle::False)) => {
                detect_until(index, &edge.source, &edge.target, back_edge_ids)
            }
            (Some(NodeKind::Condition), Some(_), Some(EdgeHandle::True)) => {
                detect_count(index, &edge.source, &edge.target, back_edge_ids)
            }
            _ => None,
        };

        if let Some(pattern) = pattern {
            let overlaps = patterns
                .values()
                .any(|p| !p.internal.is_disjoint(&pattern.internal));
            if !overlaps {
                patterns.insert(pattern.entry.clone(), pattern);
            }
        }
    }

    patterns
}

/// Single forward (non-back-edge) outgoing edge on the given handle set.
fn single_truthy_target<'g>(
    index: &GraphIndex<'g>,
    id: &str,
    back_edges: &HashSet<String>,
) -> Option<&'g str> {
    let targets: Vec<&str> = index
        .truthy_outgoing(id)
        .into_iter()
        .filter(|e| !back_edges.contains(&e.id))
        .map(|e| e.target.as_str())
        .collect();
    match targets.as_slice() {
        [one] => Some(one),
        _ => None,
    }
}

fn first_false_target<'g>(
    index: &GraphIndex<'g>,
    ids: &[String],
    back_edges: &HashSet<String>,
) -> Option<&'g str> {
    ids.iter().find_map(|id| {
        index
            .false_outgoing(id)
            .into_iter()
            .find(|e| !back_edges.contains(&e.id))
            .map(|e| e.target.as_str())
    })
}

fn detect_while(
    index: &GraphIndex,
    loop_header: &str,
    back_edges: &HashSet<String>,
) -> Option<RepeatPattern> {
    // Condition chain along true edges, starting at the back-edge target.
    let mut chain = vec![loop_header.to_string()];
    loop {
        let last = chain.last().unwrap();
        match single_truthy_target(index, last, back_edges) {
            Some(next)
                if index.kind(next) == Some(NodeKind::Condition)
                    && !chain.iter().any(|c| c == next) =>
            {
                chain.push(next.to_string())
            }
            _ => break,
        }
    }

    let body_start = single_truthy_target(index, chain.last().unwrap(), back_edges)?;
    if index.kind(body_start) == Some(NodeKind::Condition) {
        return None;
    }

    let exit = first_false_target(index, &chain, back_edges).map(str::to_string);

    let mut boundary: HashSet<String> = chain.iter().cloned().collect();
    if let Some(exit) = &exit {
        boundary.insert(exit.clone());
    }
    let body = collect_body(index, body_start, &boundary, back_edges);

    let mut internal: HashSet<String> = chain.iter().cloned().collect();
    internal.extend(body);

    Some(RepeatPattern {
        kind: RepeatKind::While,
        entry: chain[0].clone(),
        conditions: chain,
        body_start: Some(body_start.to_string()),
        exit,
        internal,
        boundary,
    })
}

fn detect_until(
    index: &GraphIndex,
    exit_condition: &str,
    body_head: &str,
    back_edges: &HashSet<String>,
) -> Option<RepeatPattern> {
    // Conditions chained via true edges in front of the exiting one all
    // belong to the until list.
    let mut chain = vec![exit_condition.to_string()];
    loop {
        let head = chain[0].clone();
        let preds: Vec<&str> = index
            .incoming(&head)
            .iter()
            .filter(|e| !back_edges.contains(&e.id))
            .map(|e| e.source.as_str())
            .collect();
        match preds.as_slice() {
            [single]
                if index.kind(single) == Some(NodeKind::Condition)
                    && single_truthy_target(index, single, back_edges) == Some(head.as_str())
                    && !chain.iter().any(|c| c == single)
                    && *single != body_head =>
            {
                chain.insert(0, single.to_string());
            }
            _ => break,
        }
    }

    let exit = index
        .truthy_outgoing(exit_condition)
        .into_iter()
        .find(|e| !back_edges.contains(&e.id))
        .map(|e| e.target.clone());

    let mut boundary: HashSet<String> = chain.iter().cloned().collect();
    if let Some(exit) = &exit {
        boundary.insert(exit.clone());
    }
    let body = collect_body(index, body_head, &boundary, back_edges);

    let mut internal: HashSet<String> = chain.iter().cloned().collect();
    internal.extend(body);
    internal.insert(body_head.to_string());

    Some(RepeatPattern {
        kind: RepeatKind::Until { negate: false },
        entry: body_head.to_string(),
        conditions: chain,
        body_start: Some(body_head.to_string()),
        exit,
        internal,
        boundary,
    })
}

fn detect_count(
    index: &GraphIndex,
    counter_condition: &str,
    body_head: &str,
    back_edges: &HashSet<String>,
) -> Option<RepeatPattern> {
    let node = index.node(counter_condition)?;
    let template = node
        .data
        .as_condition()
        .and_then(|c| c.value_template.as_deref())
        .unwrap_or_default();

    let Some(count) = count_from_template(template) else {
        // Not the generated counter shape; treat as a check-after loop over
        // the negated condition.
        let mut pattern =
            detect_until(index, counter_condition, body_head, back_edges)?;
        pattern.kind = RepeatKind::Until { negate: true };
        return Some(pattern);
    };

    let exit = index
        .false_outgoing(counter_condition)
        .into_iter()
        .find(|e| !back_edges.contains(&e.id))
        .map(|e| e.target.clone());

    // The body head is the increment set_variables; the counter init sits
    // just outside the loop as its forward predecessor.
    let increment = (index.kind(body_head) == Some(NodeKind::SetVariables))
        .then(|| body_head.to_string());
    let init = index
        .incoming(body_head)
        .iter()
        .filter(|e| !back_edges.contains(&e.id))
        .map(|e| e.source.as_str())
        .find(|id| index.kind(id) == Some(NodeKind::SetVariables))
        .map(str::to_string);

    let mut boundary: HashSet<String> = HashSet::from([counter_condition.to_string()]);
    if let Some(exit) = &exit {
        boundary.insert(exit.clone());
    }

    let body_start = match &increment {
        Some(inc) => single_truthy_target(index, inc, back_edges).map(str::to_string),
        None => Some(body_head.to_string()),
    };

    let body = collect_body(index, body_head, &boundary, back_edges);

    let mut internal: HashSet<String> = body;
    internal.insert(counter_condition.to_string());
    internal.insert(body_head.to_string());
    if let Some(init) = &init {
        internal.insert(init.clone());
    }
    if let Some(inc) = &increment {
        boundary.insert(inc.clone());
        internal.insert(inc.clone());
    }

    let entry = init.unwrap_or_else(|| body_head.to_string());

    Some(RepeatPattern {
        kind: RepeatKind::Count(count),
        entry,
        conditions: vec![counter_condition.to_string()],
        body_start,
        exit,
        internal,
        boundary,
    })
}

/// Forward-reachable nodes from `start`, not expanding into the boundary.
fn collect_body(
    index: &GraphIndex,
    start: &str,
    boundary: &HashSet<String>,
    back_edges: &HashSet<String>,
) -> HashSet<String> {
    let mut seen: HashSet<String> = HashSet::new();
    if boundary.contains(start) || index.node(start).is_none() {
        return seen;
    }
    seen.insert(start.to_string());
    let mut queue = VecDeque::from([start.to_string()]);
    while let Some(id) = queue.pop_front() {
        for edge in index.outgoing(&id) {
            if back_edges.contains(&edge.id) {
                continue;
            }
            let target = edge.target.as_str();
            if index.node(target).is_none()
                || boundary.contains(target)
                || seen.contains(target)
            {
                continue;
            }
            seen.insert(target.to_string());
            queue.push_back(target.to_string());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use cafe_core::model::{
        ActionData, ConditionData, ConditionKind, NodeData, SetVariablesData, TriggerData,
    };
    use cafe_core::{analyze, FlowGraphBuilder};

    #[test]
    fn test_count_template_matcher() {
        assert_eq!(count_from_template("{{ _repeat_counter_ab12 < 3 }}"), Some(3));
        assert_eq!(count_from_template("{{ _repeat_counter_ < 10 }}"), Some(10));
        assert_eq!(count_from_template("{{ counter < 3 }}"), None);
        assert_eq!(count_from_template("{{ _repeat_counter_x > 3 }}"), None);
    }

    #[test]
    fn test_while_pattern() {
        // t -> c -(true)-> a -> d -> c ; c -(false)-> done
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, NodeData::Trigger(TriggerData::default()))
            .node(
                "c",
                0.0,
                1.0,
                NodeData::Condition(ConditionData {
                    kind: ConditionKind::State,
                    ..ConditionData::default()
                }),
            )
            .node("a", 0.0, 2.0, NodeData::Action(ActionData::default()))
            .node("d", 0.0, 3.0, NodeData::Action(ActionData::default()))
            .node("done", 1.0, 1.0, NodeData::Action(ActionData::default()))
            .edge("e1", "t", "c")
            .edge_true("e2", "c", "a")
            .edge("e3", "a", "d")
            .edge("e4", "d", "c")
            .edge_false("e5", "c", "done")
            .build();
        let index = GraphIndex::new(&graph);
        let analysis = analyze(&graph);
        let back: HashSet<String> = analysis.back_edges.iter().cloned().collect();
        let patterns = detect_repeat_patterns(&index, &analysis.repeat_back_edges, &back);

        let pattern = patterns.get("c").expect("while pattern at c");
        assert_eq!(pattern.kind, RepeatKind::While);
        assert_eq!(pattern.conditions, vec!["c".to_string()]);
        assert_eq!(pattern.body_start.as_deref(), Some("a"));
        assert_eq!(pattern.exit.as_deref(), Some("done"));
        assert!(pattern.internal.contains("d"));
        assert!(!pattern.internal.contains("done"));
    }

    #[test]
    fn test_until_pattern() {
        // t -> a -> c ; c -(false)-> a ; c -(true)-> done
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, NodeData::Trigger(TriggerData::default()))
            .node("a", 0.0, 1.0, NodeData::Action(ActionData::default()))
            .node("c", 0.0, 2.0, NodeData::Condition(ConditionData::default()))
            .node("done", 0.0, 3.0, NodeData::Action(ActionData::default()))
            .edge("e1", "t", "a")
            .edge("e2", "a", "c")
            .edge_false("e3", "c", "a")
            .edge_true("e4", "c", "done")
            .build();
        let index = GraphIndex::new(&graph);
        let analysis = analyze(&graph);
        let back: HashSet<String> = analysis.back_edges.iter().cloned().collect();
        let patterns = detect_repeat_patterns(&index, &analysis.repeat_back_edges, &back);

        let pattern = patterns.get("a").expect("until pattern entered at body");
        assert_eq!(pattern.kind, RepeatKind::Until { negate: false });
        assert_eq!(pattern.conditions, vec!["c".to_string()]);
        assert_eq!(pattern.exit.as_deref(), Some("done"));
    }

    #[test]
    fn test_count_pattern() {
        // init -> inc -> body -> check ; check -(true)-> inc ; check -(false)-> done
        let graph = FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, NodeData::Trigger(TriggerData::default()))
            .node(
                "init",
                0.0,
                1.0,
                NodeData::SetVariables(SetVariablesData::default()),
            )
            .node(
                "inc",
                0.0,
                2.0,
                NodeData::SetVariables(SetVariablesData::default()),
            )
            .node("body", 0.0, 3.0, NodeData::Action(ActionData::default()))
            .node(
                "check",
                0.0,
                4.0,
                NodeData::Condition(ConditionData {
                    kind: ConditionKind::Template,
                    value_template: Some("{{ _repeat_counter_k1 < 3 }}".into()),
                    ..ConditionData::default()
                }),
            )
            .node("done", 1.0, 4.0, NodeData::Action(ActionData::default()))
            .edge("e1", "t", "init")
            .edge("e2", "init", "inc")
            .edge("e3", "inc", "body")
            .edge("e4", "body", "check")
            .edge_true("e5", "check", "inc")
            .edge_false("e6", "check", "done")
            .build();
        let index = GraphIndex::new(&graph);
        let analysis = analyze(&graph);
        let back: HashSet<String> = analysis.back_edges.iter().cloned().collect();
        let patterns = detect_repeat_patterns(&index, &analysis.repeat_back_edges, &back);

        let pattern = patterns.get("init").expect("count pattern entered at init");
        assert_eq!(pattern.kind, RepeatKind::Count(3));
        assert_eq!(pattern.body_start.as_deref(), Some("body"));
        assert_eq!(pattern.exit.as_deref(), Some("done"));
        for consumed in ["init", "inc", "body", "check"] {
            assert!(pattern.internal.contains(consumed), "{consumed} is internal");
        }
    }
}
