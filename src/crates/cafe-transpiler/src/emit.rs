//! Per-node YAML emission
//!
//! Both lowering strategies turn individual nodes into the same Home
//! Assistant action mappings; this module owns that translation. Output is
//! built as `serde_yaml` mappings so key order is exactly authoring order,
//! and empty strings / nulls are elided everywhere.

use serde_json::Value as Json;
use serde_yaml::{Mapping, Value as Yaml};

use cafe_core::model::{
    ActionData, ConditionData, ConditionKind, DelayData, DelayValue, FlowGraph, FlowNode,
    NodeData, SetVariablesData, TriggerData, WaitData,
};

pub(crate) fn ystr(s: impl Into<String>) -> Yaml {
    Yaml::String(s.into())
}

pub(crate) fn yaml_from_json(value: &Json) -> Yaml {
    serde_yaml::to_value(value).unwrap_or(Yaml::Null)
}

fn elided(value: &Yaml) -> bool {
    match value {
        Yaml::Null => true,
        Yaml::String(s) => s.is_empty(),
        _ => false,
    }
}

pub(crate) fn put(map: &mut Mapping, key: &str, value: Yaml) {
    if !elided(&value) {
        map.insert(ystr(key), value);
    }
}

fn put_json(map: &mut Mapping, key: &str, value: Option<&Json>) {
    if let Some(v) = value {
        put(map, key, yaml_from_json(v));
    }
}

fn put_str(map: &mut Mapping, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        put(map, key, ystr(v));
    }
}

fn put_bool(map: &mut Mapping, key: &str, value: Option<bool>) {
    if let Some(v) = value {
        map.insert(ystr(key), Yaml::Bool(v));
    }
}

fn put_extras(map: &mut Mapping, extra: &serde_json::Map<String, Json>) {
    for (key, value) in extra {
        put(map, key, yaml_from_json(value));
    }
}

/// Top-level `triggers:` entries, in document order.
pub(crate) fn triggers_list(graph: &FlowGraph) -> Vec<Yaml> {
    graph
        .triggers()
        .map(|node| match &node.data {
            NodeData::Trigger(t) => trigger_entry(t),
            _ => unreachable!(),
        })
        .collect()
}

pub(crate) fn trigger_entry(t: &TriggerData) -> Yaml {
    let mut map = Mapping::new();
    put(&mut map, "platform", ystr(&t.platform));
    put_json(&mut map, "entity_id", t.entity_id.as_ref());
    put_json(&mut map, "from", t.from.as_ref());
    put_json(&mut map, "to", t.to.as_ref());
    put_json(&mut map, "for", t.for_.as_ref());
    put_json(&mut map, "at", t.at.as_ref());
    put_json(&mut map, "event_type", t.event_type.as_ref());
    put_extras(&mut map, &t.extra);
    put_str(&mut map, "alias", t.alias.as_deref());
    put_str(&mut map, "id", t.id.as_deref());
    put_bool(&mut map, "enabled", t.enabled);
    Yaml::Mapping(map)
}

/// A condition payload in HA shape (`condition: <type>` plus typed fields).
pub(crate) fn condition_entry(c: &ConditionData) -> Yaml {
    let mut map = Mapping::new();
    put(&mut map, "condition", ystr(c.kind.as_str()));
    put_str(&mut map, "alias", c.alias.as_deref());
    put_json(&mut map, "entity_id", c.entity_id.as_ref());
    put_str(&mut map, "attribute", c.attribute.as_deref());
    put_json(&mut map, "state", c.state.as_ref());
    put_json(&mut map, "above", c.above.as_ref());
    put_json(&mut map, "below", c.below.as_ref());

    // Template conditions accept either editor field; HA only knows
    // value_template.
    let template = match c.kind {
        ConditionKind::Template => c.value_template.as_deref().or(c.template.as_deref()),
        _ => c.value_template.as_deref(),
    };
    put_str(&mut map, "value_template", template);

    put_str(&mut map, "after", c.after.as_deref());
    put_str(&mut map, "before", c.before.as_deref());
    put_json(&mut map, "weekday", c.weekday.as_ref());
    put_str(&mut map, "zone", c.zone.as_deref());

    if let Some(children) = &c.conditions {
        let rendered: Vec<Yaml> = children.iter().map(nested_condition).collect();
        map.insert(ystr("conditions"), Yaml::Sequence(rendered));
    }

    put_extras(&mut map, &c.extra);
    put_str(&mut map, "id", c.id.as_deref());
    put_bool(&mut map, "enabled", c.enabled);
    Yaml::Mapping(map)
}

/// Children of and/or/not groups are raw payloads; re-emit them through the
/// typed path when they decode, pass them through verbatim when they don't.
fn nested_condition(raw: &Json) -> Yaml {
    match serde_json::from_value::<ConditionData>(raw.clone()) {
        Ok(cond) => condition_entry(&cond),
        Err(_) => yaml_from_json(raw),
    }
}

pub(crate) fn action_entry(a: &ActionData) -> Yaml {
    let mut map = Mapping::new();
    put_str(&mut map, "alias", a.alias.as_deref());
    if a.is_device_action() {
        put_str(&mut map, "device_id", a.device_id.as_deref());
        put_str(&mut map, "domain", a.domain.as_deref());
        put_str(&mut map, "type", a.device_type.as_deref());
        put_str(&mut map, "subtype", a.subtype.as_deref());
        put_json(&mut map, "entity_id", a.entity_id.as_ref());
    } else {
        put_str(&mut map, "service", a.service.as_deref());
        put_json(&mut map, "entity_id", a.entity_id.as_ref());
        put_json(&mut map, "target", a.target.as_ref());
        put_json(&mut map, "data", a.data.as_ref());
        put_json(&mut map, "data_template", a.data_template.as_ref());
        put_str(&mut map, "response_variable", a.response_variable.as_deref());
        put_bool(&mut map, "continue_on_error", a.continue_on_error);
    }
    put_extras(&mut map, &a.extra);
    put_str(&mut map, "id", a.id.as_deref());
    put_bool(&mut map, "enabled", a.enabled);
    Yaml::Mapping(map)
}

pub(crate) fn delay_entry(d: &DelayData) -> Yaml {
    let mut map = Mapping::new();
    put_str(&mut map, "alias", d.alias.as_deref());
    let delay = match &d.duration {
        DelayValue::Text(s) => ystr(s),
        DelayValue::Parts {
            hours,
            minutes,
            seconds,
            milliseconds,
        } => {
            let mut parts = Mapping::new();
            for (key, value) in [
                ("hours", hours),
                ("minutes", minutes),
                ("seconds", seconds),
                ("milliseconds", milliseconds),
            ] {
                if let Some(v) = value {
                    parts.insert(ystr(key), Yaml::Number((*v).into()));
                }
            }
            Yaml::Mapping(parts)
        }
    };
    map.insert(ystr("delay"), delay);
    put_extras(&mut map, &d.extra);
    put_bool(&mut map, "enabled", d.enabled);
    Yaml::Mapping(map)
}

pub(crate) fn wait_entry(w: &WaitData) -> Yaml {
    let mut map = Mapping::new();
    put_str(&mut map, "alias", w.alias.as_deref());
    if let Some(template) = &w.wait_template {
        put(&mut map, "wait_template", ystr(template));
    } else if let Some(triggers) = &w.wait_for_trigger {
        let rendered: Vec<Yaml> = triggers.iter().map(yaml_from_json).collect();
        map.insert(ystr("wait_for_trigger"), Yaml::Sequence(rendered));
    }
    put_json(&mut map, "timeout", w.timeout.as_ref());
    put_bool(&mut map, "continue_on_timeout", w.continue_on_timeout);
    put_extras(&mut map, &w.extra);
    put_bool(&mut map, "enabled", w.enabled);
    Yaml::Mapping(map)
}

pub(crate) fn variables_entry(v: &SetVariablesData) -> Yaml {
    let mut map = Mapping::new();
    put_str(&mut map, "alias", v.alias.as_deref());
    let mut bindings = Mapping::new();
    for (key, value) in &v.variables {
        bindings.insert(ystr(key), yaml_from_json(value));
    }
    map.insert(ystr("variables"), Yaml::Mapping(bindings));
    put_extras(&mut map, &v.extra);
    Yaml::Mapping(map)
}

/// The action-sequence payload for a node; triggers contribute to the
/// top-level `triggers:` list instead and emit nothing here.
pub(crate) fn node_action(node: &FlowNode) -> Option<Yaml> {
    match &node.data {
        NodeData::Trigger(_) => None,
        NodeData::Condition(c) => Some(condition_entry(c)),
        NodeData::Action(a) => Some(action_entry(a)),
        NodeData::Delay(d) => Some(delay_entry(d)),
        NodeData::Wait(w) => Some(wait_entry(w)),
        NodeData::SetVariables(v) => Some(variables_entry(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_entry_preserves_extras() {
        let action = ActionData {
            service: Some("notify.mobile".into()),
            data: Some(json!({"message": "hi"})),
            extra: serde_json::from_value(json!({"custom_flag": true})).unwrap(),
            ..ActionData::default()
        };
        let yaml = action_entry(&action);
        let map = yaml.as_mapping().unwrap();
        assert_eq!(map.get("custom_flag"), Some(&Yaml::Bool(true)));
        assert_eq!(map.get("service"), Some(&ystr("notify.mobile")));
    }

    #[test]
    fn test_device_action_shape() {
        let action = ActionData {
            device_id: Some("abcd".into()),
            domain: Some("light".into()),
            device_type: Some("turn_on".into()),
            ..ActionData::default()
        };
        let yaml = action_entry(&action);
        let map = yaml.as_mapping().unwrap();
        assert!(map.contains_key("device_id"));
        assert_eq!(map.get("type"), Some(&ystr("turn_on")));
        assert!(!map.contains_key("service"));
    }

    #[test]
    fn test_template_condition_copies_template_field() {
        let cond = ConditionData {
            kind: ConditionKind::Template,
            template: Some("{{ states('sensor.x') | int > 3 }}".into()),
            ..ConditionData::default()
        };
        let yaml = condition_entry(&cond);
        let map = yaml.as_mapping().unwrap();
        assert_eq!(
            map.get("value_template"),
            Some(&ystr("{{ states('sensor.x') | int > 3 }}"))
        );
        assert!(!map.contains_key("template"));
    }

    #[test]
    fn test_empty_fields_are_elided() {
        let trigger = TriggerData {
            platform: "state".into(),
            entity_id: Some(json!("light.x")),
            from: Some(json!("")),
            ..TriggerData::default()
        };
        let yaml = trigger_entry(&trigger);
        let map = yaml.as_mapping().unwrap();
        assert!(!map.contains_key("from"));
        assert!(!map.contains_key("to"));
    }

    #[test]
    fn test_delay_parts() {
        let delay = DelayData {
            duration: DelayValue::Parts {
                hours: None,
                minutes: Some(2),
                seconds: Some(30),
                milliseconds: None,
            },
            alias: None,
            id: None,
            enabled: None,
            extra: Default::default(),
        };
        let yaml = delay_entry(&delay);
        let rendered = serde_yaml::to_string(&yaml).unwrap();
        assert!(rendered.contains("minutes: 2"));
        assert!(rendered.contains("seconds: 30"));
        assert!(!rendered.contains("hours"));
    }
}
