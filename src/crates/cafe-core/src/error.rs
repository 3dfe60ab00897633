//! Error and warning types shared across the pipeline
//!
//! Validation problems are plain records (path + message) so a single pass can
//! report every violation at once. Non-fatal conditions surface as [`Warning`]
//! values: they accompany a successful result instead of aborting it.

use thiserror::Error;

/// A single schema or structural violation, with a JSON-pointer-style path
/// into the offending input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {message}")]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Non-fatal diagnostics produced by analysis, lowering and parsing.
///
/// Warnings never abort a call; they ride along on the successful result and
/// the caller decides whether to surface them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Warning {
    /// A forced strategy disagrees with the analyzer's recommendation.
    #[error("forced strategy '{forced}' differs from the recommended '{recommended}'")]
    SuboptimalStrategy { forced: String, recommended: String },

    /// The graph contains a cycle with no condition node on it.
    #[error("cycle through '{node}' has no condition; the automation may loop forever")]
    PotentialInfiniteLoop { node: String },

    /// An unknown condition type was coerced to `template`.
    #[error("unknown condition type '{found}' at {path}; coerced to template")]
    UnknownConditionType { found: String, path: String },

    /// A referenced node id does not exist; the subtree was skipped.
    #[error("node '{id}' is referenced but not defined; subtree skipped")]
    UnknownNode { id: String },

    /// A YAML action item matched no known shape and was preserved verbatim.
    #[error("unrecognized action item at {path}; preserved as unknown action")]
    UnparseableItem { path: String },

    /// The state machine linearizes fan-out; only the first branch is taken.
    #[error("node '{id}' fans out to {count} targets; state machine follows the first edge")]
    UnsupportedFanOut { id: String, count: usize },
}
