//! Error types for the orchestration engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::state::StateError;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine outside of a run.
///
/// Faults that happen *during* a run never appear here: they are folded
/// into the run's terminal [`Outcome`](crate::Outcome).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The worker tree is malformed
    #[error("Construction error: {0}")]
    Construction(#[from] ConstructionError),

    /// Shared state access failed
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Configuration could not be loaded or saved
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A malformed combinator tree, detected before any run starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    /// Worker names must be non-empty
    #[error("Worker name must not be empty")]
    EmptyName,

    /// Two distinct workers share a name within one tree
    #[error("Duplicate worker name '{name}'")]
    DuplicateName { name: String },

    /// A combinator was built without the children it needs
    #[error("Combinator '{combinator}' has no children")]
    NoChildren { combinator: String },

    /// A branch was built without a default route
    #[error("Branch '{branch}' has no default route")]
    MissingDefault { branch: String },

    /// A branch label was registered twice
    #[error("Branch '{branch}' registers label '{label}' more than once")]
    DuplicateLabel { branch: String, label: String },

    /// Branch labels must be non-empty
    #[error("Branch '{branch}' has an empty route label")]
    EmptyLabel { branch: String },

    /// A loop was built without a terminator
    #[error("Loop '{name}' has no terminator")]
    MissingTerminator { name: String },

    /// Two parallel siblings declare the same output key
    #[error("Parallel '{parallel}': '{first}' and '{second}' both declare output key '{key}'")]
    OverlappingOutputs {
        parallel: String,
        first: String,
        second: String,
        key: String,
    },

    /// One child attached to more than one delegate
    #[error("Worker '{child}' is attached to delegates '{first}' and '{second}'")]
    MultipleParents {
        child: String,
        first: String,
        second: String,
    },

    /// A worker (transitively) contains itself
    #[error("Cycle detected through worker '{name}'")]
    Cycle { name: String },

    /// A retry wrapper that can never run its worker
    #[error("Retry '{name}' must allow at least one attempt")]
    ZeroAttempts { name: String },
}

/// Classification of a worker-level fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required shared state key was absent or had the wrong type
    MissingState,
    /// The worker's input could not be used
    InvalidInput,
    /// The worker produced output it could not interpret
    InvalidOutput,
    /// An upstream service reported an error
    Upstream,
    /// An upstream service rate-limited the request
    RateLimited,
    /// An upstream service rejected the credentials
    Unauthorized,
    /// An upstream call timed out
    Timeout,
    /// A tool reported an error
    Tool,
    /// A routing decision named an unknown or invalid target
    Routing,
    /// Concurrent siblings wrote the same state key
    Conflict,
    /// The worker panicked
    Panicked,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Stable identifier for logs and serialized outcomes
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingState => "missing_state",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::InvalidOutput => "invalid_output",
            ErrorKind::Upstream => "upstream",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Tool => "tool",
            ErrorKind::Routing => "routing",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Panicked => "panicked",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error carried by a failed [`Outcome`](crate::Outcome).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct WorkerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WorkerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn routing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Routing, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub(crate) fn panicked(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Panicked, message)
    }
}

impl From<StateError> for WorkerError {
    fn from(err: StateError) -> Self {
        let kind = match err {
            StateError::Conflict { .. } => ErrorKind::Conflict,
            StateError::Unsupported(_) => ErrorKind::InvalidOutput,
            StateError::Missing(_) | StateError::TypeMismatch { .. } => ErrorKind::MissingState,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::InvalidOutput, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_error_display() {
        let err = WorkerError::new(ErrorKind::RateLimited, "slow down");
        assert_eq!(err.to_string(), "rate_limited: slow down");
    }

    #[test]
    fn test_state_error_conversion() {
        let err: WorkerError = StateError::Missing("draft_text".to_string()).into();
        assert_eq!(err.kind, ErrorKind::MissingState);
        assert!(err.message.contains("draft_text"));

        let err: WorkerError = StateError::Conflict {
            key: "summary".to_string(),
            writers: vec!["a".to_string(), "b".to_string()],
        }
        .into();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[test]
    fn test_serialization() {
        let err = WorkerError::upstream("502 from provider");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "upstream");
        assert_eq!(json["message"], "502 from provider");
    }
}
