//! Recursive action-sequence construction
//!
//! The builder walks the forward graph from a start node and emits HA action
//! items. Rules, in order: OR-convergence folding, repeat-pattern entry,
//! condition chaining with a shared `else`, sibling fan-out under a handle,
//! plain sequential emission, and parallel fan-out with convergence-point
//! deduplication.
//!
//! Visited sets are passed by value and cloned on every branch descent so
//! sibling branches never shadow each other.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_yaml::{Mapping, Value as Yaml};

use cafe_core::model::{EdgeHandle, NodeData};
use cafe_core::Warning;

use crate::emit::{self, ystr};

use super::repeat::RepeatKind;
use super::{if_block, not_wrap, or_wrap, NativeGenerator};

impl<'g> NativeGenerator<'g> {
    /// Emit the action sequence starting at `start`. Traversal never crosses
    /// `stop` nodes (used for parallel convergence points and loop bodies).
    pub(crate) fn build_sequence(
        &mut self,
        start: &str,
        mut visited: HashSet<String>,
        stop: &HashSet<String>,
    ) -> Vec<Yaml> {
        let mut out = Vec::new();
        let mut current = start.to_string();

        loop {
            if stop.contains(&current) || visited.contains(&current) {
                break;
            }
            let Some(node) = self.index.node(&current) else {
                self.warnings.push(Warning::UnknownNode { id: current });
                break;
            };

            // Repeat entry check runs before the visited marking: an until
            // pattern is entered at its own body head, which the body build
            // must still be allowed to reach.
            if self.patterns.contains_key(&current) {
                match self.emit_repeat(&current, &mut out, &mut visited) {
                    Some(next) => {
                        current = next;
                        continue;
                    }
                    None => break,
                }
            }
            visited.insert(current.clone());

            match &node.data {
                // Triggers never appear mid-sequence; skip defensively.
                NodeData::Trigger(_) => match self.forward_outgoing(&current).first() {
                    Some(edge) => current = edge.target.clone(),
                    None => break,
                },
                NodeData::Condition(_) => {
                    let block = self.build_condition_block(&current, visited.clone(), stop);
                    out.push(block);
                    break;
                }
                _ => {
                    if let Some(action) = emit::node_action(node) {
                        out.push(action);
                    }
                    let targets: Vec<String> = self
                        .forward_outgoing(&current)
                        .iter()
                        .map(|e| e.target.clone())
                        .collect();
                    match targets.len() {
                        0 => break,
                        1 => current = targets[0].clone(),
                        _ => {
                            let (blocks, continuation) =
                                self.build_fanout(&targets, &visited, stop);
                            out.extend(blocks);
                            match continuation {
                                Some(next) => current = next,
                                None => break,
                            }
                        }
                    }
                }
            }
        }

        out
    }

    /// Emit a `repeat:` block for the pattern entered at `entry` and return
    /// the loop's continuation node.
    fn emit_repeat(
        &mut self,
        entry: &str,
        out: &mut Vec<Yaml>,
        visited: &mut HashSet<String>,
    ) -> Option<String> {
        let pattern = self.patterns.get(entry).cloned()?;

        let body = match &pattern.body_start {
            Some(start) => self.build_sequence(start, visited.clone(), &pattern.boundary),
            None => Vec::new(),
        };
        let conditions: Vec<Yaml> = pattern
            .conditions
            .iter()
            .filter_map(|id| self.condition_payload(id))
            .collect();

        let mut repeat = Mapping::new();
        match pattern.kind {
            RepeatKind::While => {
                repeat.insert(ystr("while"), Yaml::Sequence(conditions));
                repeat.insert(ystr("sequence"), Yaml::Sequence(body));
            }
            RepeatKind::Count(count) => {
                repeat.insert(ystr("count"), Yaml::Number(count.into()));
                repeat.insert(ystr("sequence"), Yaml::Sequence(body));
            }
            RepeatKind::Until { negate } => {
                repeat.insert(ystr("sequence"), Yaml::Sequence(body));
                let until = if negate {
                    vec![not_wrap(conditions)]
                } else {
                    conditions
                };
                repeat.insert(ystr("until"), Yaml::Sequence(until));
            }
        }

        let mut block = Mapping::new();
        block.insert(ystr("repeat"), Yaml::Mapping(repeat));
        out.push(Yaml::Mapping(block));

        visited.extend(pattern.internal.iter().cloned());
        pattern.exit
    }

    /// Emit one `if:` block for a condition, chaining successor conditions
    /// that can share its `else`. Chaining wins over sibling fan-out: the
    /// chain extends as long as each successor condition either has no false
    /// path or falls through to the same else target as the chain head.
    fn build_condition_block(
        &mut self,
        first: &str,
        mut visited: HashSet<String>,
        stop: &HashSet<String>,
    ) -> Yaml {
        let first_false = self.false_forward_targets(first);

        let mut chain = vec![first.to_string()];
        loop {
            let last = chain.last().unwrap().clone();
            let truthy = self.truthy_forward_targets(&last);
            let [next] = truthy.as_slice() else { break };
            if !self.is_condition(next)
                || visited.contains(next)
                || stop.contains(next)
                || self.patterns.contains_key(next)
                || chain.contains(next)
            {
                break;
            }
            let next_false = self.false_forward_targets(next);
            if !(next_false.is_empty() || next_false == first_false) {
                break;
            }
            chain.push(next.clone());
        }
        for id in &chain {
            visited.insert(id.clone());
        }

        let then_roots = self.truthy_forward_targets(chain.last().unwrap());

        // A terminal condition acts as a plain condition action: the
        // sequence simply stops when it fails.
        if chain.len() == 1 && then_roots.is_empty() && first_false.is_empty() {
            return self.condition_payload(first).unwrap_or(Yaml::Null);
        }

        // A lone condition with only a false branch inverts instead of
        // emitting an empty then.
        if chain.len() == 1 && then_roots.is_empty() && !first_false.is_empty() {
            let payload = self.condition_payload(first).unwrap_or(Yaml::Null);
            let branch = self.build_branch(&first_false, &visited, stop);
            return if_block(vec![not_wrap(vec![payload])], branch, Vec::new());
        }

        let then_seq = self.build_branch(&then_roots, &visited, stop);
        let else_seq = self.build_branch(&first_false, &visited, stop);
        let conditions: Vec<Yaml> = chain
            .iter()
            .filter_map(|id| self.condition_payload(id))
            .collect();
        if_block(conditions, then_seq, else_seq)
    }

    /// Emit sibling subtrees under a condition handle. Each sibling gets its
    /// own clone of the visited set and its items are concatenated.
    fn build_branch(
        &mut self,
        roots: &[String],
        visited: &HashSet<String>,
        stop: &HashSet<String>,
    ) -> Vec<Yaml> {
        let mut out = Vec::new();
        for root in roots {
            out.extend(self.build_sequence(root, visited.clone(), stop));
        }
        out
    }

    /// Fan-out from a non-condition node (or from multiple trigger
    /// successors). Recognizes the OR pattern first; otherwise emits a
    /// `parallel:` block, deduplicating a shared postlude through the
    /// convergence point. Returns the blocks plus the continuation node.
    pub(crate) fn build_fanout(
        &mut self,
        roots: &[String],
        visited: &HashSet<String>,
        stop: &HashSet<String>,
    ) -> (Vec<Yaml>, Option<String>) {
        if let Some((handle, conditions, target)) = self.or_convergence(roots) {
            let mut branch_visited = visited.clone();
            for root in roots {
                branch_visited.insert(root.clone());
            }
            let sequence = self.build_sequence(&target, branch_visited, stop);
            let block = match handle {
                EdgeHandle::True => if_block(vec![or_wrap(conditions)], sequence, Vec::new()),
                EdgeHandle::False => if_block(vec![or_wrap(conditions)], Vec::new(), sequence),
            };
            return (vec![block], None);
        }

        let convergence = self.find_convergence(roots, stop);
        let mut branch_stop = stop.clone();
        if let Some(conv) = &convergence {
            branch_stop.insert(conv.clone());
        }

        let mut branches = Vec::new();
        for root in roots {
            let items = self.build_sequence(root, visited.clone(), &branch_stop);
            if !items.is_empty() {
                branches.push(items);
            }
        }

        let blocks = match branches.len() {
            0 => Vec::new(),
            // A single surviving branch needs no parallel wrapper.
            1 => branches.pop().unwrap(),
            _ => {
                let rendered: Vec<Yaml> = branches
                    .into_iter()
                    .map(|mut items| {
                        if items.len() == 1 {
                            items.pop().unwrap()
                        } else {
                            Yaml::Sequence(items)
                        }
                    })
                    .collect();
                let mut map = Mapping::new();
                map.insert(ystr("parallel"), Yaml::Sequence(rendered));
                vec![Yaml::Mapping(map)]
            }
        };

        (blocks, convergence)
    }

    /// Recognize the OR pattern among fan-out roots: every root is a
    /// condition with exactly one forward edge, all edges carry the same
    /// handle and share one target.
    fn or_convergence(&self, roots: &[String]) -> Option<(EdgeHandle, Vec<Yaml>, String)> {
        if roots.len() < 2 {
            return None;
        }
        let mut handle: Option<EdgeHandle> = None;
        let mut target: Option<String> = None;
        let mut conditions = Vec::new();

        for root in roots {
            if !self.is_condition(root) {
                return None;
            }
            let outs = self.forward_outgoing(root);
            let [edge] = outs.as_slice() else {
                return None;
            };
            let edge_handle = edge.source_handle?;
            match handle {
                None => handle = Some(edge_handle),
                Some(h) if h == edge_handle => {}
                _ => return None,
            }
            match &target {
                None => target = Some(edge.target.clone()),
                Some(t) if *t == edge.target => {}
                _ => return None,
            }
            conditions.push(self.condition_payload(root)?);
        }

        Some((handle?, conditions, target?))
    }

    /// Common node every branch reaches, preferring the one closest to the
    /// fan-out (multi-source BFS depth, document order on ties).
    fn find_convergence(&self, roots: &[String], stop: &HashSet<String>) -> Option<String> {
        let sets: Vec<HashSet<String>> = roots
            .iter()
            .map(|root| self.reachable_forward(root, stop))
            .collect();

        let mut depth: HashMap<String, usize> = HashMap::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for root in roots {
            if depth.insert(root.clone(), 0).is_none() {
                queue.push_back(root.clone());
            }
        }
        while let Some(id) = queue.pop_front() {
            let d = depth[&id];
            for edge in self.forward_outgoing(&id) {
                if stop.contains(&edge.target) || self.index.node(&edge.target).is_none() {
                    continue;
                }
                if !depth.contains_key(&edge.target) {
                    depth.insert(edge.target.clone(), d + 1);
                    queue.push_back(edge.target.clone());
                }
            }
        }

        let mut best: Option<(usize, String)> = None;
        for id in self.index.node_ids() {
            if !sets.iter().all(|set| set.contains(id)) {
                continue;
            }
            let Some(&d) = depth.get(id) else { continue };
            if best.as_ref().map(|(bd, _)| d < *bd).unwrap_or(true) {
                best = Some((d, id.to_string()));
            }
        }
        best.map(|(_, id)| id)
    }

    fn reachable_forward(&self, start: &str, stop: &HashSet<String>) -> HashSet<String> {
        let mut seen = HashSet::new();
        if self.index.node(start).is_none() {
            return seen;
        }
        seen.insert(start.to_string());
        let mut queue = VecDeque::from([start.to_string()]);
        while let Some(id) = queue.pop_front() {
            for edge in self.forward_outgoing(&id) {
                let target = &edge.target;
                if stop.contains(target)
                    || seen.contains(target)
                    || self.index.node(target).is_none()
                {
                    continue;
                }
                seen.insert(target.clone());
                queue.push_back(target.clone());
            }
        }
        seen
    }
}
