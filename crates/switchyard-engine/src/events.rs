//! Run event log
//!
//! Every run owns an [`EventLog`]: an append-only, ordered record of what
//! happened during the run. Worker outcomes are stamped with their
//! run-wide completion sequence when they are recorded here. Each record
//! is also forwarded to an [`EventSink`], so callers can stream progress
//! while the run is still going.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::outcome::{Outcome, OutcomeStatus};
use crate::worker::WorkerKind;

/// Trait for forwarding run events
///
/// This abstracts over the transport (channel, log, collector) so the
/// engine can be embedded in different hosts.
pub trait EventSink: Send + Sync {
    /// Forward one record.
    ///
    /// Returns an error if the record could not be delivered. Delivery
    /// failures are logged and never affect the run.
    fn send(&self, record: EventRecord) -> Result<(), EventError>;
}

/// Error when forwarding an event fails
#[derive(Debug, Clone, Error)]
#[error("Event error: {message}")]
pub struct EventError {
    pub message: String,
}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunEvent {
    /// The orchestrator started a run
    #[serde(rename_all = "camelCase")]
    RunStarted { run_id: String, root: String },

    /// A worker invocation began
    #[serde(rename_all = "camelCase")]
    WorkerStarted { worker: String, kind: WorkerKind },

    /// A worker invocation produced its terminal outcome.
    ///
    /// For combinators that adopt a child's outcome, `worker` names the
    /// combinator while `outcome.worker_name()` names the child.
    #[serde(rename_all = "camelCase")]
    WorkerFinished { worker: String, outcome: Outcome },

    /// A branch picked a route
    #[serde(rename_all = "camelCase")]
    RouteSelected {
        branch: String,
        label: String,
        target: String,
        fallback: bool,
    },

    /// A delegate's coordinator picked its targets
    #[serde(rename_all = "camelCase")]
    DelegateDispatched {
        delegate: String,
        targets: Vec<String>,
    },

    /// A loop started an iteration (1-based)
    #[serde(rename_all = "camelCase")]
    LoopIteration { worker: String, iteration: u32 },

    /// A retry wrapper will try again after a delay
    #[serde(rename_all = "camelCase")]
    RetryScheduled {
        worker: String,
        attempt: u32,
        delay_ms: u64,
    },

    /// Parallel siblings wrote the same key
    #[serde(rename_all = "camelCase")]
    StateConflict {
        worker: String,
        key: String,
        writers: Vec<String>,
    },

    /// A leaf was abandoned because its run or subtree was cancelled
    #[serde(rename_all = "camelCase")]
    CancellationObserved { worker: String },

    /// The run ended
    #[serde(rename_all = "camelCase")]
    RunFinished {
        run_id: String,
        status: OutcomeStatus,
        elapsed_ms: u64,
    },
}

/// One entry of the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Position in the log, starting at 1
    pub index: u64,
    pub at: DateTime<Utc>,
    pub event: RunEvent,
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _record: EventRecord) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
#[derive(Default)]
pub struct VecEventSink {
    records: Mutex<Vec<EventRecord>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<RunEvent> {
        self.records.lock().iter().map(|r| r.event.clone()).collect()
    }

    /// Get all collected records
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, record: EventRecord) -> Result<(), EventError> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Forwards records into an unbounded tokio channel
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<EventRecord>,
}

impl ChannelEventSink {
    /// Create a sink and the receiving half of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, record: EventRecord) -> Result<(), EventError> {
        self.sender
            .send(record)
            .map_err(|_| EventError::channel_closed())
    }
}

#[derive(Default)]
struct LogInner {
    next_sequence: u64,
    records: Vec<EventRecord>,
}

/// Append-only event log for one run.
///
/// Cloning yields another handle to the same log.
#[derive(Clone)]
pub struct EventLog {
    run_id: Arc<str>,
    inner: Arc<Mutex<LogInner>>,
    sink: Arc<dyn EventSink>,
    record_payloads: bool,
}

impl EventLog {
    pub fn new(run_id: impl Into<String>, sink: Arc<dyn EventSink>, record_payloads: bool) -> Self {
        Self {
            run_id: Arc::from(run_id.into()),
            inner: Arc::new(Mutex::new(LogInner::default())),
            sink,
            record_payloads,
        }
    }

    /// A log that keeps records in memory only
    pub fn detached(run_id: impl Into<String>) -> Self {
        Self::new(run_id, Arc::new(NullEventSink), true)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Append an event
    pub fn emit(&self, event: RunEvent) {
        let mut inner = self.inner.lock();
        self.push(&mut inner, event);
    }

    /// Record the terminal outcome of `worker`'s invocation.
    ///
    /// Outcomes that were not recorded before receive the next completion
    /// sequence number. Adopted outcomes keep the number they already have.
    pub fn record_outcome(&self, worker: &str, outcome: Outcome) -> Outcome {
        let mut inner = self.inner.lock();
        let outcome = if outcome.is_recorded() {
            outcome
        } else {
            inner.next_sequence += 1;
            outcome.stamped(inner.next_sequence)
        };
        let stored = if self.record_payloads {
            outcome.clone()
        } else {
            outcome.clone().without_payload()
        };
        self.push(
            &mut inner,
            RunEvent::WorkerFinished {
                worker: worker.to_string(),
                outcome: stored,
            },
        );
        outcome
    }

    fn push(&self, inner: &mut LogInner, event: RunEvent) {
        let record = EventRecord {
            index: inner.records.len() as u64 + 1,
            at: Utc::now(),
            event,
        };
        inner.records.push(record.clone());
        if let Err(err) = self.sink.send(record) {
            log::warn!("Run {}: failed to forward event: {}", self.run_id, err);
        }
    }

    /// All records so far, in append order
    pub fn records(&self) -> Vec<EventRecord> {
        self.inner.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    /// Outcomes in completion order, one per invocation that produced its
    /// own result (adopted outcomes are not repeated)
    pub fn outcomes(&self) -> Vec<Outcome> {
        originating_outcomes(&self.inner.lock().records)
    }

    /// Outcomes returned by every invocation of `worker`
    pub fn outcomes_for(&self, worker: &str) -> Vec<Outcome> {
        self.inner
            .lock()
            .records
            .iter()
            .filter_map(|r| match &r.event {
                RunEvent::WorkerFinished { worker: w, outcome } if w == worker => {
                    Some(outcome.clone())
                }
                _ => None,
            })
            .collect()
    }
}

/// Outcomes a worker produced itself, ordered by completion sequence
pub fn originating_outcomes(records: &[EventRecord]) -> Vec<Outcome> {
    let mut outcomes: Vec<Outcome> = records
        .iter()
        .filter_map(|r| match &r.event {
            RunEvent::WorkerFinished { worker, outcome } if outcome.worker_name() == worker => {
                Some(outcome.clone())
            }
            _ => None,
        })
        .collect();
    outcomes.sort_by_key(Outcome::sequence);
    outcomes
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("run_id", &self.run_id)
            .field("len", &self.len())
            .finish()
    }
}
