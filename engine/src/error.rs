use std::fmt::Display;

/// Failure reported by a loader adapter.
///
/// `Clone` because one in-flight fetch may be awaited by several callers,
/// each of which receives the same outcome.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    Validation(String),
    #[error("entity {0} not found")]
    NotFound(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TreeError {
    /// An operation referenced an id that is not in the node index.
    #[error("unknown node '{0}'")]
    UnknownNode(String),
    /// The operation would break a structural invariant of the tree.
    #[error("invalid structural operation: {0}")]
    InvalidStructuralOperation(String),
    /// The loader adapter rejected a fetch. Nothing was applied; retry is safe.
    #[error("failed to load {target}: {source}")]
    LoadFailure {
        target: String,
        #[source]
        source: LoadError,
    },
    /// The spawner refused the fetch task or dropped it before it finished.
    #[error("could not run the fetch for {target}: {reason}")]
    Executor { target: String, reason: String },
    /// Returned by `Tree::check_invariants` when the mirror is corrupt.
    #[error("tree mirror is inconsistent: {0}")]
    Inconsistent(String),
}

impl TreeError {
    pub fn unknown(key: impl Display) -> Self {
        Self::UnknownNode(key.to_string())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidStructuralOperation(message.into())
    }

    /// Load failures are expected at runtime; everything else is a caller bug.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::LoadFailure { .. })
    }
}

pub type Result<T, E = TreeError> = std::result::Result<T, E>;
