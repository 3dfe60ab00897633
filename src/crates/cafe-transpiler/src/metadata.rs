//! The `_cafe_metadata` sidecar
//!
//! The editor embeds a small metadata object under `variables._cafe_metadata`
//! in the emitted YAML so a later parse can restore node positions and the
//! graph identity without affecting Home Assistant's execution semantics.
//! The parser reads it opportunistically: a missing or malformed sidecar
//! falls back to deterministic layout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cafe_core::Position;

/// Key of the sidecar inside the automation's `variables:` block.
pub const METADATA_KEY: &str = "_cafe_metadata";

/// Current sidecar format version.
pub const METADATA_VERSION: u32 = 1;

/// The embedded metadata object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CafeMetadata {
    #[serde(default)]
    pub version: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,

    /// Node id -> saved canvas position. Iteration order is insertion order,
    /// which seeds the parser's id generator.
    #[serde(default)]
    pub nodes: serde_json::Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_version: Option<u32>,
}

impl CafeMetadata {
    /// Saved position for a node, when present and well-formed.
    pub fn position(&self, node_id: &str) -> Option<Position> {
        let entry = self.nodes.get(node_id)?;
        let x = entry.get("x")?.as_f64()?;
        let y = entry.get("y")?.as_f64()?;
        Some(Position::new(x, y))
    }

    /// Node ids in sidecar order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_round_trip() {
        let raw = json!({
            "version": 1,
            "strategy": "native",
            "nodes": {
                "t1": {"x": 40.0, "y": 80.0},
                "a1": {"x": 40.0, "y": 220.0}
            },
            "graph_id": "7b0d8ab4-9f6c-4f6e-8a3c-0de9cbb46a55",
            "graph_version": 3
        });
        let meta: CafeMetadata = serde_json::from_value(raw).unwrap();
        assert_eq!(meta.position("a1"), Some(Position::new(40.0, 220.0)));
        assert_eq!(meta.node_ids().collect::<Vec<_>>(), vec!["t1", "a1"]);
        assert_eq!(meta.graph_version, Some(3));
        assert!(meta.position("ghost").is_none());
    }
}
