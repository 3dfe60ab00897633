//! Flow graph data model
//!
//! A [`FlowGraph`] is the document exchanged between the visual editor and the
//! transpiler: a set of typed nodes, a set of directed edges, and the
//! automation-level configuration (mode, max, ...). Node payloads are a tagged
//! union over the node kinds; every variant keeps unrecognized fields in a
//! flattened `extra` map so that lowering can pass them through verbatim.
//!
//! The model is pure data. Construction happens in the editor, in
//! [`FlowGraphBuilder`](crate::builder::FlowGraphBuilder), or in the YAML
//! parser; the analysis and lowering stages only ever borrow it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Extra-field map attached to every node payload.
///
/// `serde_json`'s `preserve_order` feature keeps insertion order, which makes
/// the passthrough of unmodelled fields deterministic.
pub type ExtraMap = serde_json::Map<String, Value>;

/// The central flow document: nodes, edges and automation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowGraph {
    /// Stable graph identifier (UUID).
    pub id: String,

    /// Document revision, starts at 1.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Automation alias shown in Home Assistant.
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Automation-level configuration (mode, max, ...).
    #[serde(default)]
    pub metadata: AutomationConfig,

    pub nodes: Vec<FlowNode>,

    pub edges: Vec<FlowEdge>,
}

fn default_version() -> u32 {
    1
}

impl FlowGraph {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All trigger nodes, in document order.
    pub fn triggers(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes
            .iter()
            .filter(|n| n.data.kind() == NodeKind::Trigger)
    }
}

/// Automation run configuration carried on the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AutomationConfig {
    #[serde(default)]
    pub mode: AutomationMode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_exceeded: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hide_entity: Option<bool>,
}

/// Home Assistant automation execution mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutomationMode {
    #[default]
    Single,
    Restart,
    Queued,
    Parallel,
}

impl AutomationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationMode::Single => "single",
            AutomationMode::Restart => "restart",
            AutomationMode::Queued => "queued",
            AutomationMode::Parallel => "parallel",
        }
    }
}

/// A single node: id, canvas position and the typed payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowNode {
    pub id: String,

    /// Canvas position. Informational only; restored on parse so the editor
    /// can skip auto-layout.
    #[serde(default)]
    pub position: Position,

    #[serde(flatten)]
    pub data: NodeData,
}

/// 2-D canvas position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Node kind discriminant, used by the topology analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Trigger,
    Condition,
    Action,
    Delay,
    Wait,
    SetVariables,
}

/// Tagged node payload: `type` selects the variant, `data` carries its fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NodeData {
    Trigger(TriggerData),
    Condition(ConditionData),
    Action(ActionData),
    Delay(DelayData),
    Wait(WaitData),
    SetVariables(SetVariablesData),
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Trigger(_) => NodeKind::Trigger,
            NodeData::Condition(_) => NodeKind::Condition,
            NodeData::Action(_) => NodeKind::Action,
            NodeData::Delay(_) => NodeKind::Delay,
            NodeData::Wait(_) => NodeKind::Wait,
            NodeData::SetVariables(_) => NodeKind::SetVariables,
        }
    }

    /// The user-facing alias, when set on the payload.
    pub fn alias(&self) -> Option<&str> {
        match self {
            NodeData::Trigger(d) => d.alias.as_deref(),
            NodeData::Condition(d) => d.alias.as_deref(),
            NodeData::Action(d) => d.alias.as_deref(),
            NodeData::Delay(d) => d.alias.as_deref(),
            NodeData::Wait(d) => d.alias.as_deref(),
            NodeData::SetVariables(d) => d.alias.as_deref(),
        }
    }

    pub fn as_condition(&self) -> Option<&ConditionData> {
        match self {
            NodeData::Condition(c) => Some(c),
            _ => None,
        }
    }
}

/// Trigger payload. `platform` selects the HA trigger integration; all
/// platform-specific fields the model does not name explicitly ride along in
/// `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerData {
    #[serde(default = "default_platform")]
    pub platform: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Value>,

    #[serde(rename = "for", skip_serializing_if = "Option::is_none")]
    pub for_: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// HA trigger id (used by `trigger` conditions), not the node id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub extra: ExtraMap,
}

fn default_platform() -> String {
    "state".to_string()
}

impl Default for TriggerData {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            entity_id: None,
            from: None,
            to: None,
            for_: None,
            at: None,
            event_type: None,
            alias: None,
            id: None,
            enabled: None,
            extra: ExtraMap::new(),
        }
    }
}

/// Condition payload. Group kinds (`and`/`or`/`not`) carry their children in
/// `conditions`; nesting is limited to one level (invariant 5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConditionData {
    /// Accepts the editor key `condition_type` and the HA key `condition`.
    #[serde(rename = "condition_type", alias = "condition")]
    pub kind: ConditionKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub above: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub below: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekday: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    /// Children of `and`/`or`/`not` groups, as raw condition payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub extra: ExtraMap,
}

/// Supported HA condition types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    State,
    NumericState,
    #[default]
    Template,
    Time,
    Sun,
    Zone,
    Device,
    Trigger,
    And,
    Or,
    Not,
}

impl ConditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::State => "state",
            ConditionKind::NumericState => "numeric_state",
            ConditionKind::Template => "template",
            ConditionKind::Time => "time",
            ConditionKind::Sun => "sun",
            ConditionKind::Zone => "zone",
            ConditionKind::Device => "device",
            ConditionKind::Trigger => "trigger",
            ConditionKind::And => "and",
            ConditionKind::Or => "or",
            ConditionKind::Not => "not",
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(
            self,
            ConditionKind::And | ConditionKind::Or | ConditionKind::Not
        )
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "state" => ConditionKind::State,
            "numeric_state" => ConditionKind::NumericState,
            "template" => ConditionKind::Template,
            "time" => ConditionKind::Time,
            "sun" => ConditionKind::Sun,
            "zone" => ConditionKind::Zone,
            "device" => ConditionKind::Device,
            "trigger" => ConditionKind::Trigger,
            "and" => ConditionKind::And,
            "or" => ConditionKind::Or,
            "not" => ConditionKind::Not,
            _ => return None,
        })
    }
}

/// Action payload: either a `domain.service` call or a device action
/// (detected by the presence of `device_id` + `domain`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ActionData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Device-action type (`type` in HA YAML).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_template: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_variable: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub extra: ExtraMap,
}

impl ActionData {
    pub fn is_device_action(&self) -> bool {
        self.device_id.is_some() && self.domain.is_some()
    }
}

/// Delay payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelayData {
    pub duration: DelayValue,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub extra: ExtraMap,
}

/// Delay duration: either the `HH:MM:SS[.mmm]` string form or the structured
/// form with individual components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DelayValue {
    Text(String),
    Parts {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hours: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minutes: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seconds: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        milliseconds: Option<u32>,
    },
}

/// Wait payload: a `wait_template` or a `wait_for_trigger` list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WaitData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_template: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_trigger: Option<Vec<Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_on_timeout: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub extra: ExtraMap,
}

/// Variable-assignment payload. Values may be template strings; insertion
/// order is preserved because later bindings may reference earlier ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SetVariablesData {
    #[serde(default)]
    pub variables: ExtraMap,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub extra: ExtraMap,
}

/// A directed edge. `source_handle` is only meaningful on edges leaving a
/// condition node, where it names the branch taken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,

    #[serde(
        rename = "sourceHandle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_handle: Option<EdgeHandle>,
}

impl FlowEdge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
        }
    }

    pub fn with_handle(mut self, handle: EdgeHandle) -> Self {
        self.source_handle = Some(handle);
        self
    }
}

/// Branch label on an edge leaving a condition node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EdgeHandle {
    True,
    False,
}

impl EdgeHandle {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeHandle::True => "true",
            EdgeHandle::False => "false",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_round_trip() {
        let raw = json!({
            "id": "a1",
            "position": {"x": 10.0, "y": 20.0},
            "type": "action",
            "data": {
                "service": "light.turn_on",
                "target": {"entity_id": "light.kitchen"},
                "brightness_pct": 60
            }
        });

        let node: FlowNode = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(node.data.kind(), NodeKind::Action);
        match &node.data {
            NodeData::Action(a) => {
                assert_eq!(a.service.as_deref(), Some("light.turn_on"));
                // Unknown fields land in extra.
                assert_eq!(a.extra["brightness_pct"], json!(60));
            }
            other => panic!("unexpected payload: {:?}", other),
        }

        let back = serde_json::to_value(&node).unwrap();
        assert_eq!(back["data"]["brightness_pct"], json!(60));
        assert_eq!(back["type"], json!("action"));
    }

    #[test]
    fn test_condition_kind_accepts_ha_key() {
        let raw = json!({
            "condition": "numeric_state",
            "entity_id": "sensor.temperature",
            "below": 20
        });
        let cond: ConditionData = serde_json::from_value(raw).unwrap();
        assert_eq!(cond.kind, ConditionKind::NumericState);
    }

    #[test]
    fn test_edge_handle_serializes_lowercase() {
        let edge = FlowEdge::new("e1", "c1", "a1").with_handle(EdgeHandle::True);
        let v = serde_json::to_value(&edge).unwrap();
        assert_eq!(v["sourceHandle"], json!("true"));
    }

    #[test]
    fn test_delay_value_forms() {
        let text: DelayValue = serde_json::from_value(json!("00:00:05")).unwrap();
        assert_eq!(text, DelayValue::Text("00:00:05".to_string()));

        let parts: DelayValue = serde_json::from_value(json!({"minutes": 2})).unwrap();
        match parts {
            DelayValue::Parts { minutes, .. } => assert_eq!(minutes, Some(2)),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
