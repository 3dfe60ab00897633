//! Condition-to-Jinja compilation
//!
//! The state machine advances its program counter inside a single template,
//! so conditions must become inline Jinja expressions. Types that cannot be
//! expressed inline (device and trigger conditions, templates containing
//! `{% %}` statements) return `None`; the caller falls back to a native
//! `if:` action instead.

use serde_json::Value as Json;

use cafe_core::model::{ConditionData, ConditionKind};

/// Compile a condition into a boolean Jinja expression, without the outer
/// mustaches.
pub(crate) fn condition_expr(cond: &ConditionData) -> Option<String> {
    match cond.kind {
        ConditionKind::State => state_expr(cond),
        ConditionKind::NumericState => numeric_state_expr(cond),
        ConditionKind::Template => template_expr(cond),
        ConditionKind::Time => time_expr(cond),
        ConditionKind::Sun => sun_expr(cond),
        ConditionKind::Zone => zone_expr(cond),
        ConditionKind::And => group_expr(cond, " and "),
        ConditionKind::Or => group_expr(cond, " or "),
        ConditionKind::Not => {
            let inner = group_expr(cond, " or ")?;
            Some(format!("not ({inner})"))
        }
        ConditionKind::Device | ConditionKind::Trigger => None,
    }
}

/// Single-quoted Jinja string literal.
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "\\'"))
}

fn entity_list(value: &Json) -> Vec<String> {
    match value {
        Json::String(s) => vec![s.clone()],
        Json::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn literal(value: &Json) -> Option<String> {
    match value {
        Json::String(s) => Some(quote(s)),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn join_all(parts: Vec<String>, sep: &str) -> Option<String> {
    match parts.len() {
        0 => None,
        1 => Some(parts.into_iter().next().unwrap()),
        _ => Some(
            parts
                .into_iter()
                .map(|p| format!("({p})"))
                .collect::<Vec<_>>()
                .join(sep),
        ),
    }
}

fn state_expr(cond: &ConditionData) -> Option<String> {
    let entities = entity_list(cond.entity_id.as_ref()?);
    if entities.is_empty() {
        return None;
    }
    let state = cond.state.as_ref()?;

    let per_entity = |entity: &str| -> Option<String> {
        if let Some(attribute) = &cond.attribute {
            let value = literal(state)?;
            return Some(format!(
                "state_attr({}, {}) == {value}",
                quote(entity),
                quote(attribute)
            ));
        }
        let states = match state {
            Json::String(s) => vec![s.clone()],
            Json::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => return None,
        };
        let checks: Vec<String> = states
            .iter()
            .map(|s| format!("is_state({}, {})", quote(entity), quote(s)))
            .collect();
        join_all(checks, " or ")
    };

    let parts: Vec<String> = entities
        .iter()
        .map(|e| per_entity(e))
        .collect::<Option<Vec<_>>>()?;
    join_all(parts, " and ")
}

fn numeric_state_expr(cond: &ConditionData) -> Option<String> {
    let entities = entity_list(cond.entity_id.as_ref()?);
    let entity = entities.first()?;
    let base = match &cond.attribute {
        Some(attribute) => format!(
            "state_attr({}, {}) | float",
            quote(entity),
            quote(attribute)
        ),
        None => format!("states({}) | float", quote(entity)),
    };

    let mut parts = Vec::new();
    if let Some(above) = cond.above.as_ref().and_then(numeric) {
        parts.push(format!("{base} > {above}"));
    }
    if let Some(below) = cond.below.as_ref().and_then(numeric) {
        parts.push(format!("{base} < {below}"));
    }
    join_all(parts, " and ")
}

fn numeric(value: &Json) -> Option<String> {
    match value {
        Json::Number(n) => Some(n.to_string()),
        Json::String(s) => s.trim().parse::<f64>().ok().map(|_| s.trim().to_string()),
        _ => None,
    }
}

fn template_expr(cond: &ConditionData) -> Option<String> {
    let template = cond
        .value_template
        .as_deref()
        .or(cond.template.as_deref())?;
    if template.contains("{%") {
        return None;
    }
    let trimmed = template.trim();
    let inner = trimmed
        .strip_prefix("{{")
        .and_then(|s| s.strip_suffix("}}"))
        .unwrap_or(trimmed);
    let inner = inner.trim();
    (!inner.is_empty()).then(|| inner.to_string())
}

fn time_expr(cond: &ConditionData) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(after) = &cond.after {
        parts.push(format!("now().strftime('%H:%M:%S') >= {}", quote(after)));
    }
    if let Some(before) = &cond.before {
        parts.push(format!("now().strftime('%H:%M:%S') < {}", quote(before)));
    }
    if let Some(weekday) = &cond.weekday {
        let days: Vec<String> = match weekday {
            Json::String(s) => vec![s.to_lowercase()],
            Json::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_lowercase))
                .collect(),
            _ => Vec::new(),
        };
        if !days.is_empty() {
            let list = days
                .iter()
                .map(|d| quote(d))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("now().strftime('%a') | lower in [{list}]"));
        }
    }
    join_all(parts, " and ")
}

fn sun_expr(cond: &ConditionData) -> Option<String> {
    let horizon = |event: &str, after: bool| -> Option<&'static str> {
        match (event, after) {
            ("sunrise", true) | ("sunset", false) => Some("above_horizon"),
            ("sunset", true) | ("sunrise", false) => Some("below_horizon"),
            _ => None,
        }
    };

    let mut parts = Vec::new();
    if let Some(after) = &cond.after {
        let state = horizon(after.as_str(), true)?;
        parts.push(format!("is_state('sun.sun', {})", quote(state)));
    }
    if let Some(before) = &cond.before {
        let state = horizon(before.as_str(), false)?;
        parts.push(format!("is_state('sun.sun', {})", quote(state)));
    }
    join_all(parts, " and ")
}

fn zone_expr(cond: &ConditionData) -> Option<String> {
    let entities = entity_list(cond.entity_id.as_ref()?);
    if entities.is_empty() {
        return None;
    }
    let zone = cond.zone.as_deref()?;
    let zone_name = zone.strip_prefix("zone.").unwrap_or(zone);
    let parts: Vec<String> = entities
        .iter()
        .map(|e| format!("is_state({}, {})", quote(e), quote(zone_name)))
        .collect();
    join_all(parts, " and ")
}

fn group_expr(cond: &ConditionData, sep: &str) -> Option<String> {
    let children = cond.conditions.as_ref()?;
    let parts: Vec<String> = children
        .iter()
        .map(|raw| {
            let child: ConditionData = serde_json::from_value(raw.clone()).ok()?;
            condition_expr(&child)
        })
        .collect::<Option<Vec<_>>>()?;
    join_all(parts, sep)
}
