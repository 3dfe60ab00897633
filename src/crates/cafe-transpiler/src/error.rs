//! Transpiler error types
//!
//! Fatal failures only; everything recoverable is a
//! [`Warning`](cafe_core::Warning) carried on the successful result.

use cafe_core::ValidationError;
use thiserror::Error;

/// Convenience result type using [`TranspileError`].
pub type Result<T> = std::result::Result<T, TranspileError>;

/// Errors that abort a transpile or parse call.
#[derive(Error, Debug)]
pub enum TranspileError {
    /// Schema or structural validation rejected the input graph.
    #[error("graph validation failed: {}", summarize(.0))]
    Validation(Vec<ValidationError>),

    /// A strategy was forced by name but nothing is registered under it.
    #[error("no strategy registered under name '{0}'")]
    UnknownStrategy(String),

    /// No registered strategy accepted the graph. Cannot happen with the
    /// default registry (the state machine handles everything) but callers
    /// may replace the registry.
    #[error("no registered strategy can handle this graph")]
    NoStrategy,

    /// YAML (de)serialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TranspileError {
    pub fn validation(errors: Vec<ValidationError>) -> Self {
        Self::Validation(errors)
    }

    pub fn unknown_strategy(name: impl Into<String>) -> Self {
        Self::UnknownStrategy(name.into())
    }
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
