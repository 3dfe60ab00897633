//! Fallback node layout
//!
//! When a parsed document has no metadata sidecar, nodes get deterministic
//! canvas positions: a vertical stack in parse order, all coordinates
//! non-negative. The editor replaces this with a real layout pass; the
//! contract here is only reproducibility.

use cafe_core::model::{FlowNode, Position};

use crate::metadata::CafeMetadata;

const COLUMN_X: f64 = 80.0;
const TOP_Y: f64 = 80.0;
const ROW_HEIGHT: f64 = 140.0;

/// Vertical stack in parse order.
pub(crate) fn assign_positions(nodes: &mut [FlowNode]) {
    for (i, node) in nodes.iter_mut().enumerate() {
        node.position = Position::new(COLUMN_X, TOP_Y + ROW_HEIGHT * i as f64);
    }
}

/// Apply saved positions; nodes the sidecar does not know fall back to the
/// deterministic stack.
pub(crate) fn restore_positions(nodes: &mut [FlowNode], metadata: &CafeMetadata) {
    for (i, node) in nodes.iter_mut().enumerate() {
        node.position = metadata
            .position(&node.id)
            .unwrap_or_else(|| Position::new(COLUMN_X, TOP_Y + ROW_HEIGHT * i as f64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cafe_core::model::{ActionData, NodeData};

    fn node(id: &str) -> FlowNode {
        FlowNode {
            id: id.to_string(),
            position: Position::default(),
            data: NodeData::Action(ActionData::default()),
        }
    }

    #[test]
    fn test_fallback_layout_is_monotone() {
        let mut nodes = vec![node("a"), node("b"), node("c")];
        assign_positions(&mut nodes);
        assert!(nodes[0].position.y < nodes[1].position.y);
        assert!(nodes[1].position.y < nodes[2].position.y);
        assert!(nodes.iter().all(|n| n.position.x >= 0.0 && n.position.y >= 0.0));
    }

    #[test]
    fn test_metadata_positions_win() {
        let metadata: CafeMetadata = serde_json::from_value(serde_json::json!({
            "version": 1,
            "nodes": {"a": {"x": 10.0, "y": 20.0}}
        }))
        .unwrap();
        let mut nodes = vec![node("a"), node("b")];
        restore_positions(&mut nodes, &metadata);
        assert_eq!(nodes[0].position, Position::new(10.0, 20.0));
        assert!(nodes[1].position.y > 0.0);
    }
}
