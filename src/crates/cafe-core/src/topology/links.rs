//! Cross-link and convergence analysis over the forward graph
//!
//! "Forward" means the graph with repeat back-edges removed: structured loops
//! are a high-level construct and must not influence level assignment or
//! convergence classification.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::index::GraphIndex;
use crate::model::{EdgeHandle, FlowEdge, NodeKind};

/// Adjacency view that hides the repeat back-edges.
pub(crate) struct ForwardView<'g, 'i> {
    index: &'i GraphIndex<'g>,
    excluded: HashSet<&'g str>,
}

impl<'g, 'i> ForwardView<'g, 'i> {
    pub(crate) fn new(index: &'i GraphIndex<'g>, excluded_edges: &[String]) -> Self {
        let excluded = index
            .graph()
            .edges
            .iter()
            .filter(|e| excluded_edges.iter().any(|x| x == &e.id))
            .map(|e| e.id.as_str())
            .collect();
        Self { index, excluded }
    }

    pub(crate) fn index(&self) -> &'i GraphIndex<'g> {
        self.index
    }

    pub(crate) fn is_forward(&self, edge_id: &str) -> bool {
        !self.excluded.contains(edge_id)
    }

    pub(crate) fn outgoing(&self, id: &str) -> Vec<&'g FlowEdge> {
        self.index
            .outgoing(id)
            .iter()
            .filter(|e| !self.excluded.contains(e.id.as_str()))
            .copied()
            .collect()
    }

    pub(crate) fn incoming(&self, id: &str) -> Vec<&'g FlowEdge> {
        self.index
            .incoming(id)
            .iter()
            .filter(|e| !self.excluded.contains(e.id.as_str()))
            .copied()
            .collect()
    }
}

/// BFS level assignment from the entry nodes. Nodes unreachable from any
/// entry seed follow-up traversals at level 0, in document order.
pub(crate) fn assign_levels<'g>(
    view: &ForwardView<'g, '_>,
    entries: &[String],
) -> HashMap<&'g str, usize> {
    let mut levels: HashMap<&str, usize> = HashMap::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    let mut seed = |id: &str, levels: &mut HashMap<&'g str, usize>, queue: &mut VecDeque<&'g str>| {
        if let Some(node) = view.index().node(id) {
            if !levels.contains_key(node.id.as_str()) {
                levels.insert(node.id.as_str(), 0);
                queue.push_back(node.id.as_str());
            }
        }
    };

    for entry in entries {
        seed(entry, &mut levels, &mut queue);
    }

    let all: Vec<&str> = view.index().node_ids().collect();
    let mut pending = all.into_iter();
    loop {
        while let Some(id) = queue.pop_front() {
            let level = levels[id];
            for edge in view.outgoing(id) {
                let target = edge.target.as_str();
                if view.index().node(target).is_some() && !levels.contains_key(target) {
                    levels.insert(target, level + 1);
                    queue.push_back(target);
                }
            }
        }
        match pending.find(|id| !levels.contains_key(*id)) {
            Some(id) => seed(id, &mut levels, &mut queue),
            None => break,
        }
    }

    levels
}

/// A non-condition node with more than one outgoing edge, none of them
/// labelled, marks the beginning of parallel branches.
pub(crate) fn is_parallel_source(view: &ForwardView, id: &str) -> bool {
    if view.index().kind(id) == Some(NodeKind::Condition) {
        return false;
    }
    let out = view.outgoing(id);
    out.len() > 1 && out.iter().all(|e| e.source_handle.is_none())
}

/// Walk single-predecessor chains upward until a parallel source is found.
pub(crate) fn trace_parallel_origin<'g>(
    view: &ForwardView<'g, '_>,
    start: &str,
) -> Option<&'g str> {
    let mut current = view.index().node(start)?.id.as_str();
    let mut hops = 0usize;
    let limit = view.index().graph().nodes.len() + 1;
    loop {
        if is_parallel_source(view, current) {
            return Some(current);
        }
        let preds = view.incoming(current);
        if preds.len() != 1 {
            return None;
        }
        current = view.index().node(&preds[0].source)?.id.as_str();
        hops += 1;
        if hops > limit {
            return None;
        }
    }
}

/// Edge ids that skip forward more than one level or point backward without
/// being a valid parallel-branch convergence.
pub(crate) fn cross_links(
    view: &ForwardView,
    levels: &HashMap<&str, usize>,
) -> Vec<String> {
    let mut cross = Vec::new();
    for edge in &view.index().graph().edges {
        if !view.is_forward(&edge.id) {
            continue;
        }
        let (Some(&lu), Some(&lv)) = (levels.get(edge.source.as_str()), levels.get(edge.target.as_str()))
        else {
            continue;
        };
        if lv > lu + 1 {
            cross.push(edge.id.clone());
        } else if lv < lu {
            let converges = view.incoming(&edge.target).len() > 1;
            let parallel = trace_parallel_origin(view, &edge.source).is_some();
            if !(converges && parallel) {
                cross.push(edge.id.clone());
            }
        }
    }
    cross
}

/// Detect convergences the native strategy cannot express.
///
/// A node with more than one incoming edge is a candidate; three shapes stay
/// native-representable: trigger fan-in, an OR pattern (all sources are
/// conditions on the same handle), and a parallel-block convergence (all
/// sources trace back to one common parallel source).
pub(crate) fn has_forced_convergence(view: &ForwardView) -> bool {
    let ids: Vec<&str> = view.index().node_ids().collect();
    for id in ids {
        let incoming = view.incoming(id);
        if incoming.len() < 2 {
            continue;
        }

        let all_triggers = incoming
            .iter()
            .all(|e| view.index().kind(&e.source) == Some(NodeKind::Trigger));
        if all_triggers {
            continue;
        }

        if or_pattern_handle(view, &incoming).is_some() {
            continue;
        }

        // Parallel-block convergence: the joining edges must be plain
        // branch ends (a labelled edge belongs to a condition, not to a
        // parallel branch) and every source must trace back to one common
        // parallel source.
        let unlabelled = incoming.iter().all(|e| e.source_handle.is_none());
        if unlabelled {
            let mut origins: Vec<Option<&str>> = Vec::new();
            for edge in &incoming {
                origins.push(trace_parallel_origin(view, &edge.source));
            }
            let common_parallel = origins
                .first()
                .and_then(|o| *o)
                .map(|first| origins.iter().all(|o| *o == Some(first)))
                .unwrap_or(false);
            if common_parallel {
                continue;
            }
        }

        return true;
    }
    false
}

/// When every incoming edge leaves a condition node on the same handle, the
/// convergence is an OR pattern; returns that handle.
pub(crate) fn or_pattern_handle(
    view: &ForwardView,
    incoming: &[&FlowEdge],
) -> Option<EdgeHandle> {
    let all_conditions = incoming
        .iter()
        .all(|e| view.index().kind(&e.source) == Some(NodeKind::Condition));
    if !all_conditions {
        return None;
    }
    let first = incoming.first()?.source_handle?;
    incoming
        .iter()
        .all(|e| e.source_handle == Some(first))
        .then_some(first)
}
