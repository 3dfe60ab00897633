//! Graph validation (schema + structural invariants)
//!
//! Validation runs in two phases over untyped input: a schema pass that
//! checks the shape and type of every field, then a structural pass over the
//! decoded graph that checks the document invariants (edge endpoints exist,
//! triggers are entry nodes, handles only leave conditions, ids are unique,
//! condition groups nest one level). Both phases accumulate every violation
//! instead of stopping at the first one.

use serde_json::Value;

use crate::error::ValidationError;
use crate::model::{ConditionKind, EdgeHandle, FlowGraph, NodeKind};

const NODE_TYPES: &[&str] = &[
    "trigger",
    "condition",
    "action",
    "delay",
    "wait",
    "set_variables",
];

const AUTOMATION_MODES: &[&str] = &["single", "restart", "queued", "parallel"];

/// Result of [`validate`]: either a decoded graph or the accumulated errors.
#[derive(Debug)]
pub struct ValidationOutcome {
    pub graph: Option<FlowGraph>,
    pub errors: Vec<ValidationError>,
}

impl ValidationOutcome {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate untyped input (parsed JSON or YAML) into a [`FlowGraph`].
pub fn validate(raw: &Value) -> ValidationOutcome {
    let mut errors = check_schema(raw);
    if !errors.is_empty() {
        return ValidationOutcome {
            graph: None,
            errors,
        };
    }

    let graph: FlowGraph = match serde_json::from_value(raw.clone()) {
        Ok(graph) => graph,
        Err(err) => {
            return ValidationOutcome {
                graph: None,
                errors: vec![ValidationError::new("/", format!("decode failed: {err}"))],
            }
        }
    };

    errors = validate_graph(&graph);
    if errors.is_empty() {
        ValidationOutcome {
            graph: Some(graph),
            errors,
        }
    } else {
        ValidationOutcome {
            graph: None,
            errors,
        }
    }
}

/// Structural invariant checks on an already-decoded graph.
///
/// The parser re-runs this after reconstructing a graph from YAML.
pub fn validate_graph(graph: &FlowGraph) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // Invariant 4: unique ids within their kind-space.
    let mut seen_nodes = std::collections::HashSet::new();
    for (i, node) in graph.nodes.iter().enumerate() {
        if !seen_nodes.insert(node.id.as_str()) {
            errors.push(ValidationError::new(
                format!("/nodes/{i}/id"),
                format!("duplicate node id '{}'", node.id),
            ));
        }
    }
    let mut seen_edges = std::collections::HashSet::new();
    for (i, edge) in graph.edges.iter().enumerate() {
        if !seen_edges.insert(edge.id.as_str()) {
            errors.push(ValidationError::new(
                format!("/edges/{i}/id"),
                format!("duplicate edge id '{}'", edge.id),
            ));
        }
    }

    // Invariant 1: edge endpoints reference existing nodes.
    for (i, edge) in graph.edges.iter().enumerate() {
        if graph.node(&edge.source).is_none() {
            errors.push(ValidationError::new(
                format!("/edges/{i}/source"),
                format!("edge '{}' references unknown source '{}'", edge.id, edge.source),
            ));
        }
        if graph.node(&edge.target).is_none() {
            errors.push(ValidationError::new(
                format!("/edges/{i}/target"),
                format!("edge '{}' references unknown target '{}'", edge.id, edge.target),
            ));
        }
    }

    // Invariant 2: triggers are entry nodes.
    for (i, edge) in graph.edges.iter().enumerate() {
        if let Some(target) = graph.node(&edge.target) {
            if target.data.kind() == NodeKind::Trigger {
                errors.push(ValidationError::new(
                    format!("/edges/{i}/target"),
                    format!("trigger node '{}' cannot have incoming edges", target.id),
                ));
            }
        }
    }

    // Invariant 3: handles only on edges leaving condition nodes.
    for (i, edge) in graph.edges.iter().enumerate() {
        if edge.source_handle.is_some() {
            match graph.node(&edge.source) {
                Some(source) if source.data.kind() == NodeKind::Condition => {}
                Some(source) => errors.push(ValidationError::new(
                    format!("/edges/{i}/sourceHandle"),
                    format!(
                        "handle '{}' on edge leaving non-condition node '{}'",
                        edge.source_handle.unwrap().as_str(),
                        source.id
                    ),
                )),
                None => {}
            }
        }
    }

    // Invariant 5: condition groups nest at most one level.
    for (i, node) in graph.nodes.iter().enumerate() {
        if let Some(cond) = node.data.as_condition() {
            if let Some(children) = &cond.conditions {
                if !cond.kind.is_group() {
                    errors.push(ValidationError::new(
                        format!("/nodes/{i}/data/conditions"),
                        format!(
                            "'{}' condition carries a nested conditions array",
                            cond.kind.as_str()
                        ),
                    ));
                }
                for (j, child) in children.iter().enumerate() {
                    if child.get("conditions").is_some() {
                        errors.push(ValidationError::new(
                            format!("/nodes/{i}/data/conditions/{j}"),
                            "nested conditions exceed one level".to_string(),
                        ));
                    }
                }
            }
        }
    }

    errors
}

// ---------------------------------------------------------------------------
// Schema phase
// ---------------------------------------------------------------------------

fn check_schema(raw: &Value) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let Some(root) = raw.as_object() else {
        errors.push(ValidationError::new("/", "graph must be an object"));
        return errors;
    };

    require_string(root.get("id"), "/id", &mut errors);
    require_string(root.get("name"), "/name", &mut errors);

    if let Some(version) = root.get("version") {
        match version.as_u64() {
            Some(v) if v >= 1 => {}
            _ => errors.push(ValidationError::new(
                "/version",
                "version must be an integer >= 1",
            )),
        }
    }

    if let Some(description) = root.get("description") {
        if !description.is_string() && !description.is_null() {
            errors.push(ValidationError::new("/description", "must be a string"));
        }
    }

    if let Some(metadata) = root.get("metadata") {
        check_metadata(metadata, &mut errors);
    }

    match root.get("nodes").and_then(Value::as_array) {
        Some(nodes) => {
            for (i, node) in nodes.iter().enumerate() {
                check_node(node, i, &mut errors);
            }
        }
        None => errors.push(ValidationError::new("/nodes", "must be an array")),
    }

    match root.get("edges").and_then(Value::as_array) {
        Some(edges) => {
            for (i, edge) in edges.iter().enumerate() {
                check_edge(edge, i, &mut errors);
            }
        }
        None => errors.push(ValidationError::new("/edges", "must be an array")),
    }

    errors
}

fn check_metadata(metadata: &Value, errors: &mut Vec<ValidationError>) {
    let Some(map) = metadata.as_object() else {
        errors.push(ValidationError::new("/metadata", "must be an object"));
        return;
    };
    if let Some(mode) = map.get("mode") {
        match mode.as_str() {
            Some(m) if AUTOMATION_MODES.contains(&m) => {}
            _ => errors.push(ValidationError::new(
                "/metadata/mode",
                format!("mode must be one of {}", AUTOMATION_MODES.join(", ")),
            )),
        }
    }
    if let Some(max) = map.get("max") {
        if max.as_u64().is_none() {
            errors.push(ValidationError::new(
                "/metadata/max",
                "must be a non-negative integer",
            ));
        }
    }
}

fn check_node(node: &Value, i: usize, errors: &mut Vec<ValidationError>) {
    let path = format!("/nodes/{i}");
    let Some(map) = node.as_object() else {
        errors.push(ValidationError::new(path, "node must be an object"));
        return;
    };

    require_string(map.get("id"), &format!("{path}/id"), errors);

    let node_type = map.get("type").and_then(Value::as_str);
    match node_type {
        Some(t) if NODE_TYPES.contains(&t) => {}
        Some(t) => errors.push(ValidationError::new(
            format!("{path}/type"),
            format!("unknown node type '{t}'"),
        )),
        None => errors.push(ValidationError::new(
            format!("{path}/type"),
            "missing node type",
        )),
    }

    if let Some(position) = map.get("position") {
        match position.as_object() {
            Some(pos) => {
                for axis in ["x", "y"] {
                    if pos.get(axis).map(|v| !v.is_number()).unwrap_or(true) {
                        errors.push(ValidationError::new(
                            format!("{path}/position/{axis}"),
                            "must be a number",
                        ));
                    }
                }
            }
            None => errors.push(ValidationError::new(
                format!("{path}/position"),
                "must be an object",
            )),
        }
    }

    let Some(data) = map.get("data").and_then(Value::as_object) else {
        errors.push(ValidationError::new(
            format!("{path}/data"),
            "node data must be an object",
        ));
        return;
    };

    for field in ["alias", "id"] {
        if let Some(v) = data.get(field) {
            if !v.is_string() && !v.is_null() {
                errors.push(ValidationError::new(
                    format!("{path}/data/{field}"),
                    "must be a string",
                ));
            }
        }
    }
    if let Some(v) = data.get("enabled") {
        if !v.is_boolean() && !v.is_null() {
            errors.push(ValidationError::new(
                format!("{path}/data/enabled"),
                "must be a boolean",
            ));
        }
    }

    match node_type {
        Some("trigger") => {
            if let Some(platform) = data.get("platform") {
                if !platform.is_string() {
                    errors.push(ValidationError::new(
                        format!("{path}/data/platform"),
                        "must be a string",
                    ));
                }
            }
        }
        Some("condition") => {
            let kind = data
                .get("condition_type")
                .or_else(|| data.get("condition"))
                .and_then(Value::as_str);
            match kind {
                Some(k) if ConditionKind::from_name(k).is_some() => {}
                Some(k) => errors.push(ValidationError::new(
                    format!("{path}/data/condition_type"),
                    format!("unknown condition type '{k}'"),
                )),
                None => errors.push(ValidationError::new(
                    format!("{path}/data/condition_type"),
                    "missing condition type",
                )),
            }
        }
        Some("action") => {
            if data.get("service").is_none() && data.get("device_id").is_none() {
                errors.push(ValidationError::new(
                    format!("{path}/data"),
                    "action needs a service or a device_id",
                ));
            }
            if let Some(service) = data.get("service") {
                if !service.is_string() {
                    errors.push(ValidationError::new(
                        format!("{path}/data/service"),
                        "must be a string",
                    ));
                }
            }
        }
        Some("delay") => match data.get("duration") {
            Some(d) if d.is_string() || d.is_object() => {}
            Some(_) => errors.push(ValidationError::new(
                format!("{path}/data/duration"),
                "must be a string or an object",
            )),
            None => errors.push(ValidationError::new(
                format!("{path}/data/duration"),
                "missing delay duration",
            )),
        },
        Some("wait") => {
            if data.get("wait_template").is_none() && data.get("wait_for_trigger").is_none() {
                errors.push(ValidationError::new(
                    format!("{path}/data"),
                    "wait needs wait_template or wait_for_trigger",
                ));
            }
        }
        Some("set_variables") => {
            if let Some(vars) = data.get("variables") {
                if !vars.is_object() {
                    errors.push(ValidationError::new(
                        format!("{path}/data/variables"),
                        "must be an object",
                    ));
                }
            }
        }
        _ => {}
    }
}

fn check_edge(edge: &Value, i: usize, errors: &mut Vec<ValidationError>) {
    let path = format!("/edges/{i}");
    let Some(map) = edge.as_object() else {
        errors.push(ValidationError::new(path, "edge must be an object"));
        return;
    };

    for field in ["id", "source", "target"] {
        require_string(map.get(field), &format!("{path}/{field}"), errors);
    }

    if let Some(handle) = map.get("sourceHandle") {
        let valid = matches!(
            handle.as_str(),
            Some(h) if serde_json::from_value::<EdgeHandle>(Value::String(h.to_string())).is_ok()
        );
        if !handle.is_null() && !valid {
            errors.push(ValidationError::new(
                format!("{path}/sourceHandle"),
                "must be \"true\" or \"false\"",
            ));
        }
    }
}

fn require_string(value: Option<&Value>, path: &str, errors: &mut Vec<ValidationError>) {
    match value.and_then(Value::as_str) {
        Some(s) if !s.is_empty() => {}
        _ => errors.push(ValidationError::new(path, "must be a non-empty string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FlowGraphBuilder;
    use crate::model::{ActionData, ConditionData, NodeData, TriggerData};
    use serde_json::json;

    fn raw_graph() -> Value {
        json!({
            "id": "6f2ab7a0-1111-4a5b-9c3d-2e60a85c10aa",
            "version": 1,
            "name": "Test",
            "metadata": {"mode": "single"},
            "nodes": [
                {
                    "id": "t1",
                    "type": "trigger",
                    "position": {"x": 0.0, "y": 0.0},
                    "data": {"platform": "state", "entity_id": "binary_sensor.door"}
                },
                {
                    "id": "a1",
                    "type": "action",
                    "position": {"x": 0.0, "y": 120.0},
                    "data": {"service": "light.turn_on"}
                }
            ],
            "edges": [
                {"id": "e1", "source": "t1", "target": "a1"}
            ]
        })
    }

    #[test]
    fn test_valid_graph_decodes() {
        let outcome = validate(&raw_graph());
        assert!(outcome.success(), "errors: {:?}", outcome.errors);
        assert_eq!(outcome.graph.unwrap().nodes.len(), 2);
    }

    #[test]
    fn test_schema_errors_accumulate() {
        let raw = json!({
            "id": "",
            "name": "x",
            "nodes": [
                {"id": "n1", "type": "laser", "data": {}},
                {"id": "n2", "type": "delay", "data": {}}
            ],
            "edges": "nope"
        });
        let outcome = validate(&raw);
        assert!(!outcome.success());
        let paths: Vec<&str> = outcome.errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"/id"));
        assert!(paths.contains(&"/nodes/0/type"));
        assert!(paths.contains(&"/nodes/1/data/duration"));
        assert!(paths.contains(&"/edges"));
    }

    #[test]
    fn test_edge_to_missing_node() {
        let mut graph = FlowGraphBuilder::new("g")
            .node("t1", 0.0, 0.0, NodeData::Trigger(TriggerData::default()))
            .edge("e1", "t1", "ghost")
            .build();
        let errors = validate_graph(&graph);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "/edges/0/target");

        graph.edges.clear();
        assert!(validate_graph(&graph).is_empty());
    }

    #[test]
    fn test_trigger_with_incoming_edge_rejected() {
        let graph = FlowGraphBuilder::new("g")
            .node("t1", 0.0, 0.0, NodeData::Trigger(TriggerData::default()))
            .node("a1", 0.0, 100.0, NodeData::Action(ActionData::default()))
            .edge("e1", "a1", "t1")
            .build();
        let errors = validate_graph(&graph);
        assert!(errors.iter().any(|e| e.message.contains("incoming")));
    }

    #[test]
    fn test_handle_on_non_condition_rejected() {
        let graph = FlowGraphBuilder::new("g")
            .node("a1", 0.0, 0.0, NodeData::Action(ActionData::default()))
            .node("a2", 0.0, 100.0, NodeData::Action(ActionData::default()))
            .edge_true("e1", "a1", "a2")
            .build();
        let errors = validate_graph(&graph);
        assert!(errors.iter().any(|e| e.path == "/edges/0/sourceHandle"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let graph = FlowGraphBuilder::new("g")
            .node("n", 0.0, 0.0, NodeData::Action(ActionData::default()))
            .node("n", 0.0, 100.0, NodeData::Action(ActionData::default()))
            .build();
        let errors = validate_graph(&graph);
        assert!(errors.iter().any(|e| e.message.contains("duplicate node id")));
    }

    #[test]
    fn test_deep_condition_nesting_rejected() {
        let graph = FlowGraphBuilder::new("g")
            .node(
                "c1",
                0.0,
                0.0,
                NodeData::Condition(ConditionData {
                    kind: crate::model::ConditionKind::Or,
                    conditions: Some(vec![json!({
                        "condition": "and",
                        "conditions": [{"condition": "state"}]
                    })]),
                    ..ConditionData::default()
                }),
            )
            .build();
        let errors = validate_graph(&graph);
        assert!(errors.iter().any(|e| e.message.contains("one level")));
    }
}
