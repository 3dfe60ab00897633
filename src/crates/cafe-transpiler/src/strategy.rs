//! Lowering strategy interface
//!
//! Strategies are plain values in an ordered registry: the facade asks each
//! one `can_handle(analysis)` in priority order and the first acceptor
//! generates the document. Strategies keep no state across calls; all
//! per-invocation scratch lives inside `generate`.

use serde_yaml::{Mapping, Value as Yaml};

use cafe_core::model::FlowGraph;
use cafe_core::{Analysis, Warning};

use crate::emit::{put, ystr};

/// Result of a strategy's `generate`: the document plus any non-fatal
/// diagnostics collected along the way.
#[derive(Debug)]
pub struct StrategyOutcome {
    pub document: Yaml,
    pub warnings: Vec<Warning>,
}

/// A lowering strategy. Implementations must be stateless across calls so a
/// single registry can serve concurrent transpiles.
pub trait LoweringStrategy: Send + Sync {
    /// Registry name, also used for `force_strategy` lookup.
    fn name(&self) -> &'static str;

    /// Whether this strategy can express the analyzed graph.
    fn can_handle(&self, analysis: &Analysis) -> bool;

    /// Lower the graph into an automation (or script) document.
    fn generate(&self, graph: &FlowGraph, analysis: &Analysis) -> StrategyOutcome;
}

/// Assemble the top-level document around generated conditions and actions.
///
/// With at least one trigger this is an automation block; without triggers it
/// degrades to a script block keyed by the slugified graph name.
pub(crate) fn assemble_document(
    graph: &FlowGraph,
    triggers: Vec<Yaml>,
    conditions: Vec<Yaml>,
    actions: Vec<Yaml>,
) -> Yaml {
    let config = &graph.metadata;

    if triggers.is_empty() {
        let mut body = Mapping::new();
        put(&mut body, "alias", ystr(&graph.name));
        if let Some(description) = &graph.description {
            put(&mut body, "description", ystr(description));
        }
        body.insert(ystr("sequence"), Yaml::Sequence(actions));
        put(&mut body, "mode", ystr(config.mode.as_str()));
        if let Some(max) = config.max {
            body.insert(ystr("max"), Yaml::Number(max.into()));
        }

        let mut root = Mapping::new();
        root.insert(ystr(slugify(&graph.name)), Yaml::Mapping(body));
        return Yaml::Mapping(root);
    }

    let mut root = Mapping::new();
    put(&mut root, "alias", ystr(&graph.name));
    if let Some(description) = &graph.description {
        put(&mut root, "description", ystr(description));
    }
    root.insert(ystr("triggers"), Yaml::Sequence(triggers));
    if !conditions.is_empty() {
        root.insert(ystr("conditions"), Yaml::Sequence(conditions));
    }
    root.insert(ystr("actions"), Yaml::Sequence(actions));
    put(&mut root, "mode", ystr(config.mode.as_str()));
    if let Some(max) = config.max {
        root.insert(ystr("max"), Yaml::Number(max.into()));
    }
    if let Some(max_exceeded) = &config.max_exceeded {
        put(&mut root, "max_exceeded", ystr(max_exceeded));
    }
    if let Some(initial_state) = config.initial_state {
        root.insert(ystr("initial_state"), Yaml::Bool(initial_state));
    }
    Yaml::Mapping(root)
}

/// Script keys must be plain identifiers.
pub(crate) fn slugify(name: &str) -> String {
    let mut slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    while slug.contains("__") {
        slug = slug.replace("__", "_");
    }
    let trimmed = slug.trim_matches('_');
    if trimmed.is_empty() {
        "script".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Porch light — night"), "porch_light_night");
        assert_eq!(slugify("***"), "script");
    }

    #[test]
    fn test_script_document_without_triggers() {
        let graph = cafe_core::FlowGraphBuilder::new("My Script").build();
        let doc = assemble_document(&graph, vec![], vec![], vec![]);
        let root = doc.as_mapping().unwrap();
        assert!(root.contains_key("my_script"));
        let body = root.get("my_script").unwrap().as_mapping().unwrap();
        assert!(body.contains_key("sequence"));
        assert_eq!(body.get("mode"), Some(&ystr("single")));
    }
}
