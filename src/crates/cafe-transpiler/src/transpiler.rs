//! Transpiler facade
//!
//! Orchestrates the pipeline: validate → analyze → select strategy →
//! generate → serialize. Strategies live in an ordered registry; the first
//! one whose `can_handle` accepts the analysis wins, and callers may prepend
//! their own with [`Transpiler::register_strategy`].

use std::sync::Arc;

use serde_json::Value as Json;
use serde_yaml::Value as Yaml;

use cafe_core::{analyze, validate, Analysis, FlowGraph, Warning};

use crate::error::{Result, TranspileError};
use crate::native::NativeStrategy;
use crate::state_machine::StateMachineStrategy;
use crate::strategy::LoweringStrategy;

/// Options for a transpile call.
///
/// Output formatting is fixed by the YAML serializer (two-space indentation,
/// no line wrapping), so the only knob is strategy selection.
#[derive(Debug, Clone, Default)]
pub struct TranspileOptions {
    /// Force a strategy by registry name instead of following the analyzer's
    /// recommendation. Mismatches produce a warning, not an error.
    pub force_strategy: Option<String>,
}

impl TranspileOptions {
    pub fn force(name: impl Into<String>) -> Self {
        Self {
            force_strategy: Some(name.into()),
        }
    }
}

/// Result of [`Transpiler::transpile`]: either YAML plus diagnostics, or the
/// errors that aborted the call. No partial YAML is ever returned.
#[derive(Debug)]
pub struct TranspileOutcome {
    pub success: bool,
    pub yaml: Option<String>,
    pub document: Option<Yaml>,
    pub analysis: Option<Analysis>,
    /// Name of the strategy that generated the output.
    pub strategy: Option<String>,
    pub errors: Vec<TranspileError>,
    pub warnings: Vec<Warning>,
}

impl TranspileOutcome {
    fn failure(errors: Vec<TranspileError>, analysis: Option<Analysis>) -> Self {
        Self {
            success: false,
            yaml: None,
            document: None,
            analysis,
            strategy: None,
            errors,
            warnings: Vec::new(),
        }
    }
}

/// The graph → YAML pipeline with its strategy registry.
pub struct Transpiler {
    strategies: Vec<Arc<dyn LoweringStrategy>>,
}

impl Default for Transpiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Transpiler {
    /// A transpiler with the built-in strategies: native first, state
    /// machine as the universal fallback.
    pub fn new() -> Self {
        Self {
            strategies: vec![Arc::new(NativeStrategy), Arc::new(StateMachineStrategy)],
        }
    }

    /// Prepend a custom strategy; it takes priority over the built-ins.
    pub fn register_strategy(&mut self, strategy: Arc<dyn LoweringStrategy>) {
        self.strategies.insert(0, strategy);
    }

    /// Registered strategy names, in priority order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Validate, analyze and lower an untyped graph into automation YAML.
    #[tracing::instrument(skip_all)]
    pub fn transpile(&self, input: &Json, options: &TranspileOptions) -> TranspileOutcome {
        let validated = validate(input);
        let Some(graph) = validated.graph else {
            return TranspileOutcome::failure(
                vec![TranspileError::validation(validated.errors)],
                None,
            );
        };

        self.transpile_graph(&graph, options)
    }

    /// Same pipeline over an already-decoded graph.
    pub fn transpile_graph(
        &self,
        graph: &FlowGraph,
        options: &TranspileOptions,
    ) -> TranspileOutcome {
        let analysis = analyze(graph);
        let mut warnings = analysis.warnings.clone();

        let strategy = match &options.force_strategy {
            Some(name) => {
                let Some(strategy) = self.strategies.iter().find(|s| s.name() == name) else {
                    return TranspileOutcome::failure(
                        vec![TranspileError::unknown_strategy(name)],
                        Some(analysis),
                    );
                };
                if name != analysis.recommended_strategy.as_str() {
                    warnings.push(Warning::SuboptimalStrategy {
                        forced: name.clone(),
                        recommended: analysis.recommended_strategy.to_string(),
                    });
                }
                strategy
            }
            None => {
                let Some(strategy) = self.strategies.iter().find(|s| s.can_handle(&analysis))
                else {
                    return TranspileOutcome::failure(
                        vec![TranspileError::NoStrategy],
                        Some(analysis),
                    );
                };
                strategy
            }
        };

        tracing::debug!(strategy = strategy.name(), "lowering graph");
        let generated = strategy.generate(graph, &analysis);
        warnings.extend(generated.warnings);

        let yaml = match serde_yaml::to_string(&generated.document) {
            Ok(yaml) => yaml,
            Err(err) => {
                return TranspileOutcome::failure(vec![TranspileError::Yaml(err)], Some(analysis))
            }
        };

        TranspileOutcome {
            success: true,
            yaml: Some(yaml),
            document: Some(generated.document),
            analysis: Some(analysis),
            strategy: Some(strategy.name().to_string()),
            errors: Vec::new(),
            warnings,
        }
    }

    /// Happy-path variant: YAML or the first error.
    pub fn to_yaml(&self, input: &Json, options: &TranspileOptions) -> Result<String> {
        let outcome = self.transpile(input, options);
        match outcome.yaml {
            Some(yaml) => Ok(yaml),
            None => Err(outcome
                .errors
                .into_iter()
                .next()
                .unwrap_or(TranspileError::NoStrategy)),
        }
    }

    /// Force the native strategy.
    pub fn to_native_yaml(&self, input: &Json) -> Result<String> {
        self.to_yaml(input, &TranspileOptions::force("native"))
    }

    /// Force the state-machine strategy.
    pub fn to_state_machine_yaml(&self, input: &Json) -> Result<String> {
        self.to_yaml(input, &TranspileOptions::force("state-machine"))
    }
}

/// One-shot transpile with the default registry.
pub fn transpile(input: &Json, options: &TranspileOptions) -> TranspileOutcome {
    Transpiler::new().transpile(input, options)
}

/// One-shot happy-path transpile with the default registry.
pub fn to_yaml(input: &Json, options: &TranspileOptions) -> Result<String> {
    Transpiler::new().to_yaml(input, options)
}

/// One-shot forced-native transpile.
pub fn to_native_yaml(input: &Json) -> Result<String> {
    Transpiler::new().to_native_yaml(input)
}

/// One-shot forced-state-machine transpile.
pub fn to_state_machine_yaml(input: &Json) -> Result<String> {
    Transpiler::new().to_state_machine_yaml(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyOutcome;
    use cafe_core::model::{ActionData, NodeData, TriggerData};
    use cafe_core::FlowGraphBuilder;

    fn linear_graph() -> FlowGraph {
        FlowGraphBuilder::new("g")
            .node("t", 0.0, 0.0, NodeData::Trigger(TriggerData::default()))
            .node(
                "a",
                0.0,
                1.0,
                NodeData::Action(ActionData {
                    service: Some("light.turn_on".into()),
                    ..ActionData::default()
                }),
            )
            .edge("e1", "t", "a")
            .build()
    }

    #[test]
    fn test_picks_native_for_linear_graph() {
        let outcome = Transpiler::new().transpile_graph(&linear_graph(), &Default::default());
        assert!(outcome.success);
        assert_eq!(outcome.strategy.as_deref(), Some("native"));
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_forcing_mismatched_strategy_warns() {
        let outcome = Transpiler::new().transpile_graph(
            &linear_graph(),
            &TranspileOptions::force("state-machine"),
        );
        assert!(outcome.success);
        assert_eq!(outcome.strategy.as_deref(), Some("state-machine"));
        assert!(matches!(
            outcome.warnings.first(),
            Some(Warning::SuboptimalStrategy { .. })
        ));
    }

    #[test]
    fn test_unknown_forced_strategy_fails() {
        let outcome = Transpiler::new()
            .transpile_graph(&linear_graph(), &TranspileOptions::force("quantum"));
        assert!(!outcome.success);
        assert!(matches!(
            outcome.errors.first(),
            Some(TranspileError::UnknownStrategy(name)) if name == "quantum"
        ));
        assert!(outcome.yaml.is_none());
    }

    #[test]
    fn test_validation_failure_returns_no_yaml() {
        let outcome = transpile(&serde_json::json!({"name": 42}), &Default::default());
        assert!(!outcome.success);
        assert!(outcome.yaml.is_none());
        assert!(matches!(
            outcome.errors.first(),
            Some(TranspileError::Validation(errors)) if !errors.is_empty()
        ));
    }

    #[test]
    fn test_registered_strategy_takes_priority() {
        struct Stub;
        impl LoweringStrategy for Stub {
            fn name(&self) -> &'static str {
                "stub"
            }
            fn can_handle(&self, _analysis: &Analysis) -> bool {
                true
            }
            fn generate(&self, _graph: &FlowGraph, _analysis: &Analysis) -> StrategyOutcome {
                StrategyOutcome {
                    document: serde_yaml::Value::String("stubbed".into()),
                    warnings: Vec::new(),
                }
            }
        }

        let mut transpiler = Transpiler::new();
        transpiler.register_strategy(Arc::new(Stub));
        assert_eq!(
            transpiler.strategy_names(),
            vec!["stub", "native", "state-machine"]
        );

        let outcome = transpiler.transpile_graph(&linear_graph(), &Default::default());
        assert_eq!(outcome.strategy.as_deref(), Some("stub"));
        assert_eq!(outcome.yaml.as_deref(), Some("stubbed\n"));
    }
}
