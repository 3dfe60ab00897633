//! YAML → graph lifting
//!
//! Reconstructs a [`FlowGraph`] from Home Assistant automation (or script)
//! YAML. Triggers, root conditions and the action sequence are lifted into
//! nodes and edges; `if:`/`choose:`/`repeat:`/`parallel:` blocks become the
//! branch and loop structures the lowering produced them from, and a
//! state-machine document is decompiled back into its source graph.
//!
//! When the `_cafe_metadata` sidecar is present its node map seeds the id
//! generator (so parsed ids match the editor's) and node positions are
//! restored exactly; otherwise a deterministic fallback layout applies.

mod actions;
mod state_machine_lift;

use std::collections::{HashSet, VecDeque};

use serde_yaml::Value as Yaml;
use uuid::Uuid;

use cafe_core::model::{
    AutomationConfig, EdgeHandle, FlowEdge, FlowGraph, FlowNode, NodeData, Position,
    TriggerData,
};
use cafe_core::{validate_graph, Warning};

use crate::error::TranspileError;
use crate::layout;
use crate::metadata::{CafeMetadata, METADATA_KEY};

/// Result of [`parse`].
#[derive(Debug)]
pub struct ParseOutcome {
    pub graph: Option<FlowGraph>,
    pub errors: Vec<TranspileError>,
    pub warnings: Vec<Warning>,
    pub had_metadata: bool,
}

impl ParseOutcome {
    pub fn success(&self) -> bool {
        self.errors.is_empty() && self.graph.is_some()
    }

    fn failure(error: TranspileError) -> Self {
        Self {
            graph: None,
            errors: vec![error],
            warnings: Vec::new(),
            had_metadata: false,
        }
    }
}

/// Parse automation or script YAML into a flow graph.
pub fn parse(yaml: &str) -> ParseOutcome {
    let document: Yaml = match serde_yaml::from_str(yaml) {
        Ok(value) => value,
        Err(err) => return ParseOutcome::failure(TranspileError::Yaml(err)),
    };

    let Some((content, script_name)) = locate_content(&document) else {
        return ParseOutcome::failure(TranspileError::Yaml(serde::de::Error::custom(
            "document is neither an automation nor a script",
        )));
    };

    let metadata = extract_metadata(content);
    let had_metadata = metadata.is_some();

    let mut ctx = ParserCtx::new(metadata.as_ref());

    // Triggers first; they are entry nodes and anchor everything else.
    let trigger_ids = parse_triggers(&mut ctx, content);

    let action_items = items_of(content, &["actions", "action", "sequence"]);
    let lifted = state_machine_lift::try_lift(&mut ctx, &action_items, &trigger_ids);
    if !lifted {
        let frontier = parse_root_conditions(&mut ctx, content, &trigger_ids);
        actions::walk(&mut ctx, &action_items, frontier, "/actions");
    }

    let mut nodes = ctx.nodes;
    match &metadata {
        Some(meta) => layout::restore_positions(&mut nodes, meta),
        None => layout::assign_positions(&mut nodes),
    }

    let name = content
        .get("alias")
        .and_then(Yaml::as_str)
        .map(str::to_string)
        .or(script_name)
        .unwrap_or_else(|| "Imported automation".to_string());

    let graph = FlowGraph {
        id: metadata
            .as_ref()
            .and_then(|m| m.graph_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        version: metadata
            .as_ref()
            .and_then(|m| m.graph_version)
            .unwrap_or(1),
        name,
        description: content
            .get("description")
            .and_then(Yaml::as_str)
            .map(str::to_string),
        metadata: parse_config(content),
        nodes,
        edges: ctx.edges,
    };

    let structural = validate_graph(&graph);
    if structural.is_empty() {
        tracing::debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            had_metadata,
            "parsed automation into graph"
        );
        ParseOutcome {
            graph: Some(graph),
            errors: Vec::new(),
            warnings: ctx.warnings,
            had_metadata,
        }
    } else {
        ParseOutcome {
            graph: None,
            errors: vec![TranspileError::validation(structural)],
            warnings: ctx.warnings,
            had_metadata,
        }
    }
}

/// Accept an automation mapping (has triggers/actions), a `script:` wrapper,
/// or a bare `{name: {sequence: ...}}` script body.
fn locate_content(document: &Yaml) -> Option<(&Yaml, Option<String>)> {
    let map = document.as_mapping()?;

    if let Some(scripts) = document.get("script") {
        let scripts = scripts.as_mapping()?;
        let (name, body) = scripts.iter().next()?;
        return Some((body, name.as_str().map(str::to_string)));
    }

    let automation_keys = ["triggers", "trigger", "actions", "action", "conditions"];
    if automation_keys.iter().any(|k| document.get(k).is_some()) {
        return Some((document, None));
    }

    // Bare script body: single key whose value carries a sequence.
    if map.len() == 1 {
        let (name, body) = map.iter().next()?;
        if body.get("sequence").is_some() {
            return Some((body, name.as_str().map(str::to_string)));
        }
    }

    None
}

fn extract_metadata(content: &Yaml) -> Option<CafeMetadata> {
    let raw = content.get("variables")?.get(METADATA_KEY)?;
    serde_yaml::from_value(raw.clone()).ok()
}

fn parse_config(content: &Yaml) -> AutomationConfig {
    let mut config = AutomationConfig::default();
    if let Some(mode) = content.get("mode") {
        if let Ok(mode) = serde_yaml::from_value(mode.clone()) {
            config.mode = mode;
        }
    }
    config.max = content.get("max").and_then(Yaml::as_u64).map(|v| v as u32);
    config.max_exceeded = content
        .get("max_exceeded")
        .and_then(Yaml::as_str)
        .map(str::to_string);
    config.initial_state = content.get("initial_state").and_then(Yaml::as_bool);
    config
}

/// One trigger node per entry under `triggers:` (or legacy `trigger:`).
fn parse_triggers(ctx: &mut ParserCtx, content: &Yaml) -> Vec<String> {
    let mut ids = Vec::new();
    for item in items_of(content, &["triggers", "trigger"]) {
        let mut map = match item.as_mapping() {
            Some(m) => m.clone(),
            None => continue,
        };
        // Modern HA spells the platform key `trigger`.
        if let Some(platform) = map.remove("trigger") {
            map.entry(Yaml::from("platform")).or_insert(platform);
        }
        let data: TriggerData =
            serde_yaml::from_value(Yaml::Mapping(map)).unwrap_or_default();
        let id = ctx.add_node("trigger", NodeData::Trigger(data));
        ids.push(id);
    }
    ids
}

/// Root conditions chain: every trigger fans into the first condition, the
/// conditions link through their `true` handles, and the chain tail carries
/// the action sequence. A `{condition: not, conditions: [single]}` wrapper is
/// the promotion rewrite of a `false`-handle condition and is lifted back to
/// the inner condition with an inverted outgoing handle.
fn parse_root_conditions(
    ctx: &mut ParserCtx,
    content: &Yaml,
    trigger_ids: &[String],
) -> Vec<actions::FrontierLink> {
    let mut frontier: Vec<actions::FrontierLink> = trigger_ids
        .iter()
        .map(|id| actions::FrontierLink {
            node: id.clone(),
            handle: None,
        })
        .collect();

    for (i, item) in items_of(content, &["conditions", "condition"])
        .iter()
        .enumerate()
    {
        let path = format!("/conditions/{i}");
        let (data, inverted) = actions::root_condition(ctx, item, &path);
        let id = ctx.add_node("condition", NodeData::Condition(data));
        ctx.link_all(&frontier, &id);
        frontier = vec![actions::FrontierLink {
            node: id,
            handle: Some(if inverted {
                EdgeHandle::False
            } else {
                EdgeHandle::True
            }),
        }];
    }

    frontier
}

/// Collect a list-valued key, accepting a single mapping or scalar as a
/// one-element list.
pub(crate) fn items_of(content: &Yaml, keys: &[&str]) -> Vec<Yaml> {
    for key in keys {
        if let Some(value) = content.get(key) {
            return match value {
                Yaml::Sequence(items) => items.clone(),
                Yaml::Null => Vec::new(),
                other => vec![other.clone()],
            };
        }
    }
    Vec::new()
}

// ---------------------------------------------------------------------------
// Parser context
// ---------------------------------------------------------------------------

/// Mutable state threaded through the lifting passes.
pub(crate) struct ParserCtx {
    pub(crate) nodes: Vec<FlowNode>,
    pub(crate) edges: Vec<FlowEdge>,
    pub(crate) warnings: Vec<Warning>,
    id_gen: IdGen,
    edge_counter: usize,
    repeat_counter: usize,
}

impl ParserCtx {
    fn new(metadata: Option<&CafeMetadata>) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            warnings: Vec::new(),
            id_gen: IdGen::new(metadata),
            edge_counter: 0,
            repeat_counter: 0,
        }
    }

    /// Create a node with the next generated (or metadata-seeded) id.
    pub(crate) fn add_node(&mut self, kind: &str, data: NodeData) -> String {
        let id = self.id_gen.next(kind);
        self.push_node(id.clone(), data);
        id
    }

    /// Create a node under a caller-chosen id (state-machine decompilation
    /// reuses the original program-counter ids).
    pub(crate) fn add_node_with_id(&mut self, id: &str, data: NodeData) {
        self.id_gen.reserve(id);
        self.push_node(id.to_string(), data);
    }

    fn push_node(&mut self, id: String, data: NodeData) {
        self.nodes.push(FlowNode {
            id,
            position: Position::default(),
            data,
        });
    }

    pub(crate) fn add_edge(&mut self, source: &str, target: &str, handle: Option<EdgeHandle>) {
        let id = format!("edge_{}", self.edge_counter);
        self.edge_counter += 1;
        let mut edge = FlowEdge::new(id, source, target);
        edge.source_handle = handle;
        self.edges.push(edge);
    }

    pub(crate) fn link_all(&mut self, frontier: &[actions::FrontierLink], target: &str) {
        for link in frontier {
            self.add_edge(&link.node, target, link.handle);
        }
    }

    pub(crate) fn next_repeat_counter(&mut self) -> String {
        self.repeat_counter += 1;
        format!("_repeat_counter_{}", self.repeat_counter)
    }

    pub(crate) fn warn(&mut self, warning: Warning) {
        tracing::warn!(%warning, "parser diagnostic");
        self.warnings.push(warning);
    }
}

/// Sequential id generator, optionally seeded with the editor's node ids
/// from the metadata sidecar so round-tripped graphs keep their identity.
struct IdGen {
    seeded: VecDeque<String>,
    used: HashSet<String>,
    counters: std::collections::HashMap<&'static str, usize>,
}

impl IdGen {
    fn new(metadata: Option<&CafeMetadata>) -> Self {
        let seeded = metadata
            .map(|m| m.node_ids().map(str::to_string).collect())
            .unwrap_or_default();
        Self {
            seeded,
            used: HashSet::new(),
            counters: std::collections::HashMap::new(),
        }
    }

    fn next(&mut self, kind: &str) -> String {
        while let Some(candidate) = self.seeded.pop_front() {
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
        let key: &'static str = match kind {
            "trigger" => "trigger",
            "condition" => "condition",
            "action" => "action",
            "delay" => "delay",
            "wait" => "wait",
            "set_variables" => "set_variables",
            _ => "node",
        };
        loop {
            let counter = self.counters.entry(key).or_insert(0);
            let candidate = format!("{key}_{counter}");
            *counter += 1;
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    fn reserve(&mut self, id: &str) {
        self.used.insert(id.to_string());
        self.seeded.retain(|s| s != id);
    }
}
