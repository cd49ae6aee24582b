//! Terminal results of worker invocations
//!
//! Every invocation of every worker produces exactly one [`Outcome`]. Once
//! the engine has recorded it in the run's event log it carries a
//! run-wide completion sequence number and is never modified again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, WorkerError};

/// Data carried between workers
pub type Payload = serde_json::Value;

/// How a worker invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The worker completed its work
    Success,
    /// The worker faulted
    Failure,
    /// The worker asks the enclosing control flow to stop
    Escalate,
    /// Concurrent siblings wrote the same state key
    StateConflict,
    /// An iteration or attempt bound was reached
    Exhausted,
    /// The run or subtree was cancelled
    Cancelled,
}

impl OutcomeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeStatus::Success)
    }

    /// Statuses that carry an error
    pub fn is_failure(&self) -> bool {
        matches!(self, OutcomeStatus::Failure | OutcomeStatus::StateConflict)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failure => "failure",
            OutcomeStatus::Escalate => "escalate",
            OutcomeStatus::StateConflict => "state_conflict",
            OutcomeStatus::Exhausted => "exhausted",
            OutcomeStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable notes a combinator attaches to an outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Annotation {
    /// A branch sent an unmapped label to its default route
    RoutedToDefault { label: String },
    /// Number of loop iterations that ran
    Iterations { count: u32 },
    /// Number of attempts a retry wrapper made
    Attempts { count: u32 },
    /// A deadline cancelled the subtree
    DeadlineExceeded { limit_ms: u64 },
}

/// The terminal result of one worker invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    worker_name: String,
    status: OutcomeStatus,
    payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<WorkerError>,
    sequence: u64,
    completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    annotations: Vec<Annotation>,
}

impl Outcome {
    fn build(
        worker_name: impl Into<String>,
        status: OutcomeStatus,
        payload: Payload,
        error: Option<WorkerError>,
    ) -> Self {
        Self {
            worker_name: worker_name.into(),
            status,
            payload,
            error,
            sequence: 0,
            completed_at: Utc::now(),
            annotations: Vec::new(),
        }
    }

    pub fn success(worker_name: impl Into<String>, payload: Payload) -> Self {
        Self::build(worker_name, OutcomeStatus::Success, payload, None)
    }

    pub fn failure(worker_name: impl Into<String>, error: WorkerError) -> Self {
        Self::build(worker_name, OutcomeStatus::Failure, Payload::Null, Some(error))
    }

    pub fn escalate(worker_name: impl Into<String>, payload: Payload) -> Self {
        Self::build(worker_name, OutcomeStatus::Escalate, payload, None)
    }

    /// A state conflict; the error names the conflicting key
    pub fn conflict(worker_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(
            worker_name,
            OutcomeStatus::StateConflict,
            Payload::Null,
            Some(WorkerError::new(ErrorKind::Conflict, message)),
        )
    }

    pub fn exhausted(worker_name: impl Into<String>, payload: Payload) -> Self {
        Self::build(worker_name, OutcomeStatus::Exhausted, payload, None)
    }

    pub fn cancelled(worker_name: impl Into<String>) -> Self {
        Self::build(worker_name, OutcomeStatus::Cancelled, Payload::Null, None)
    }

    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn error(&self) -> Option<&WorkerError> {
        self.error.as_ref()
    }

    /// Run-wide completion order; 0 until the outcome is recorded
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_recorded(&self) -> bool {
        self.sequence > 0
    }

    pub(crate) fn stamped(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self.completed_at = Utc::now();
        self
    }

    /// Re-attribute an outcome to a combinator that adopts its child's result
    pub(crate) fn renamed(mut self, worker_name: &str) -> Self {
        if self.worker_name != worker_name {
            self.worker_name = worker_name.to_string();
            self.sequence = 0;
        }
        self
    }

    /// Payload stripped for event storage
    pub(crate) fn without_payload(mut self) -> Self {
        self.payload = Payload::Null;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_present_iff_failure_kind() {
        assert!(Outcome::success("a", json!(1)).error().is_none());
        assert!(Outcome::escalate("a", json!(1)).error().is_none());
        assert!(Outcome::exhausted("a", json!(1)).error().is_none());
        assert!(Outcome::cancelled("a").error().is_none());

        let failed = Outcome::failure("a", WorkerError::internal("boom"));
        assert!(failed.status().is_failure());
        assert!(failed.error().is_some());

        let conflict = Outcome::conflict("p", "key 'x'");
        assert!(conflict.status().is_failure());
        assert_eq!(conflict.error().map(|e| e.kind), Some(ErrorKind::Conflict));
    }

    #[test]
    fn test_unrecorded_until_stamped() {
        let outcome = Outcome::success("a", json!("done"));
        assert!(!outcome.is_recorded());
        let outcome = outcome.stamped(7);
        assert_eq!(outcome.sequence(), 7);
    }

    #[test]
    fn test_renamed_clears_sequence() {
        let outcome = Outcome::success("child", json!(1)).stamped(3);
        let same = outcome.clone().renamed("child");
        assert_eq!(same.sequence(), 3);
        let adopted = outcome.renamed("loop");
        assert_eq!(adopted.worker_name(), "loop");
        assert_eq!(adopted.sequence(), 0);
    }

    #[test]
    fn test_serialization() {
        let outcome = Outcome::success("extract", json!({"cpu": "octa-core"}))
            .with_annotation(Annotation::Iterations { count: 2 });
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["worker_name"], "extract");
        assert_eq!(value["annotations"][0]["type"], "iterations");
        assert!(value.get("error").is_none());

        let back: Outcome = serde_json::from_value(value).unwrap();
        assert_eq!(back, outcome);
    }
}
