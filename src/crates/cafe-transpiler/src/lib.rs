//! cafe-transpiler: bidirectional graph ⇄ Home Assistant YAML
//!
//! The forward direction lowers a validated [`FlowGraph`] into automation
//! YAML through one of two strategies:
//!
//! - **native**: pattern-directed rewrites into nested HA constructs
//!   (root `conditions:`, `if`/`then`/`else`, `parallel`, `repeat`).
//! - **state-machine**: a flat dispatcher (`repeat.until` + `choose`) driven
//!   by a `current_node` program counter, which can express any topology.
//!
//! The reverse direction ([`parse`]) lifts automation or script YAML back
//! into a graph, reconstructing branches, loops and (for state-machine
//! documents) the original node ids, and restoring positions from the
//! `_cafe_metadata` sidecar when present.
//!
//! # Example
//!
//! ```rust
//! use cafe_core::builder::FlowGraphBuilder;
//! use cafe_core::model::{ActionData, NodeData, TriggerData};
//! use cafe_transpiler::{parse, Transpiler};
//!
//! let graph = FlowGraphBuilder::new("Night light")
//!     .node("t1", 0.0, 0.0, NodeData::Trigger(TriggerData::default()))
//!     .node("a1", 0.0, 120.0, NodeData::Action(ActionData {
//!         service: Some("light.turn_on".into()),
//!         ..ActionData::default()
//!     }))
//!     .edge("e1", "t1", "a1")
//!     .build();
//!
//! let outcome = Transpiler::new().transpile_graph(&graph, &Default::default());
//! let yaml = outcome.yaml.expect("linear graphs always lower");
//!
//! let parsed = parse(&yaml);
//! assert!(parsed.success());
//! assert_eq!(parsed.graph.unwrap().nodes.len(), 2);
//! ```

mod emit;
pub mod error;
mod layout;
pub mod metadata;
mod native;
pub mod parser;
pub mod render;
mod state_machine;
pub mod strategy;
pub mod transpiler;

pub use cafe_core::{
    analyze, validate, Analysis, EdgeHandle, FlowEdge, FlowGraph, FlowGraphBuilder, FlowNode,
    NodeData, NodeKind, StrategyKind, ValidationError, ValidationOutcome, Warning,
};

pub use error::{Result, TranspileError};
pub use metadata::{CafeMetadata, METADATA_KEY, METADATA_VERSION};
pub use native::NativeStrategy;
pub use parser::{parse, ParseOutcome};
pub use render::{render, RenderFormat, RenderOptions};
pub use state_machine::StateMachineStrategy;
pub use strategy::{LoweringStrategy, StrategyOutcome};
pub use transpiler::{
    to_native_yaml, to_state_machine_yaml, to_yaml, transpile, TranspileOptions,
    TranspileOutcome, Transpiler,
};
