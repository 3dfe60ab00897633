//! cafe-core: flow graph model, validation and topology analysis
//!
//! This crate holds the document model shared by the cafe editor and the
//! transpiler, together with the two analysis stages every transpile runs
//! first:
//!
//! - [`model`]: the [`FlowGraph`](model::FlowGraph) document: typed nodes,
//!   directed edges with condition handles, automation configuration.
//! - [`validate`]: schema and structural validation with accumulated,
//!   path-addressed errors.
//! - [`topology`]: back-edge detection, cycle/cross-link/convergence
//!   classification and the lowering-strategy recommendation.
//! - [`index`]: the immutable adjacency index the other stages query.
//! - [`builder`]: fluent programmatic graph construction.
//!
//! The crate is pure and synchronous: nothing here performs I/O, and every
//! analysis borrows its input immutably.
//!
//! # Example
//!
//! ```rust
//! use cafe_core::builder::FlowGraphBuilder;
//! use cafe_core::model::{ActionData, NodeData, TriggerData};
//! use cafe_core::topology::{analyze, StrategyKind};
//!
//! let graph = FlowGraphBuilder::new("Porch light")
//!     .node("t1", 0.0, 0.0, NodeData::Trigger(TriggerData::default()))
//!     .node("a1", 0.0, 120.0, NodeData::Action(ActionData {
//!         service: Some("light.turn_on".into()),
//!         ..ActionData::default()
//!     }))
//!     .edge("e1", "t1", "a1")
//!     .build();
//!
//! let analysis = analyze(&graph);
//! assert_eq!(analysis.recommended_strategy, StrategyKind::Native);
//! ```

pub mod builder;
pub mod error;
pub mod index;
pub mod model;
pub mod topology;
pub mod validate;

pub use builder::FlowGraphBuilder;
pub use error::{ValidationError, Warning};
pub use index::GraphIndex;
pub use model::{
    ActionData, AutomationConfig, AutomationMode, ConditionData, ConditionKind, DelayData,
    DelayValue, EdgeHandle, ExtraMap, FlowEdge, FlowGraph, FlowNode, NodeData, NodeKind,
    Position, SetVariablesData, TriggerData, WaitData,
};
pub use topology::{analyze, analyze_with_index, Analysis, StrategyKind};
pub use validate::{validate, validate_graph, ValidationOutcome};
