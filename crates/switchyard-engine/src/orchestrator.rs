//! Orchestrator: validates a worker tree and runs it
//!
//! The orchestrator owns the root worker. Each call to [`Orchestrator::run`]
//! creates a fresh shared state, event log and cancellation token, invokes
//! the root under the engine's guard, and returns a [`RunReport`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::constants::ids;
use crate::context::InvocationContext;
use crate::error::ConstructionError;
use crate::events::{originating_outcomes, EventLog, EventRecord, EventSink, NullEventSink, RunEvent};
use crate::outcome::{Outcome, OutcomeStatus, Payload};
use crate::state::{SharedState, StateSnapshot};
use crate::validation::{validate_tree, Hierarchy};
use crate::worker::WorkerRef;

/// Per-run options
#[derive(Default)]
pub struct RunOptions {
    /// Contents the run's state starts with
    pub initial_state: Option<StateSnapshot>,
    /// External cancellation; cancelling it cancels the run
    pub cancel: Option<CancellationToken>,
    /// Run deadline; overrides the configured default
    pub timeout: Option<Duration>,
    /// Identifier to use instead of a generated one
    pub run_id: Option<String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_state(mut self, snapshot: StateSnapshot) -> Self {
        self.initial_state = Some(snapshot);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Why a run ended cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The caller's token was cancelled
    External,
    /// The run deadline passed
    Deadline,
}

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    /// Terminal outcome of the root worker
    pub outcome: Outcome,
    /// State contents when the run ended
    pub snapshot: StateSnapshot,
    /// Full event log, in append order
    pub events: Vec<EventRecord>,
    pub elapsed_ms: u64,
    pub cancel_reason: Option<CancelReason>,
}

impl RunReport {
    pub fn status(&self) -> OutcomeStatus {
        self.outcome.status()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Worker outcomes in completion order
    pub fn outcomes(&self) -> Vec<Outcome> {
        originating_outcomes(&self.events)
    }
}

/// Runs a validated worker tree.
pub struct Orchestrator {
    root: WorkerRef,
    hierarchy: Hierarchy,
    config: Arc<EngineConfig>,
    sink: Arc<dyn EventSink>,
}

impl Orchestrator {
    /// Validate `root` and build an orchestrator for it
    pub fn new(root: WorkerRef) -> Result<Self, ConstructionError> {
        let (hierarchy, errors) = validate_tree(&root);
        if let Some(first) = errors.first() {
            for error in &errors {
                log::error!("Invalid worker tree '{}': {}", root.name(), error);
            }
            return Err(first.clone());
        }
        log::debug!(
            "Validated worker tree '{}' ({} workers)",
            root.name(),
            hierarchy.len()
        );
        Ok(Self {
            root,
            hierarchy,
            config: Arc::new(EngineConfig::default()),
            sink: Arc::new(NullEventSink),
        })
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Forward every event of every run to `sink`
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn root(&self) -> &WorkerRef {
        &self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    /// Name of the composite that attaches `child`
    pub fn parent_of(&self, child: &str) -> Option<&str> {
        self.hierarchy.parent_of(child)
    }

    /// Run with default options
    pub async fn run(&self, input: Payload) -> RunReport {
        self.run_with(input, RunOptions::default()).await
    }

    /// Run with explicit options
    pub async fn run_with(&self, input: Payload, options: RunOptions) -> RunReport {
        let run_id = options
            .run_id
            .unwrap_or_else(|| format!("{}-{}", ids::RUN_PREFIX, Uuid::new_v4()));
        let state = options
            .initial_state
            .map(SharedState::from_snapshot)
            .unwrap_or_default();
        let external = options.cancel.unwrap_or_default();
        let token = external.child_token();
        let events = EventLog::new(run_id.clone(), Arc::clone(&self.sink), self.config.record_payloads);
        let ctx = InvocationContext::new(state.clone(), events.clone(), token.clone(), Arc::clone(&self.config));

        log::info!("Run {} started (root '{}')", run_id, self.root.name());
        events.emit(RunEvent::RunStarted {
            run_id: run_id.clone(),
            root: self.root.name().to_string(),
        });

        let started = Instant::now();
        let deadline = options.timeout.or_else(|| self.config.run_timeout());
        let mut deadline_hit = false;

        let work = ctx.invoke(&self.root, input);
        tokio::pin!(work);
        let outcome = match deadline {
            Some(limit) => {
                let sleep = tokio::time::sleep(limit);
                tokio::pin!(sleep);
                tokio::select! {
                    outcome = &mut work => outcome,
                    _ = &mut sleep => {
                        deadline_hit = true;
                        log::warn!("Run {} exceeded its deadline of {:?}", run_id, limit);
                        token.cancel();
                        work.await
                    }
                }
            }
            None => work.await,
        };

        let cancel_reason = match outcome.status() {
            OutcomeStatus::Cancelled if deadline_hit => Some(CancelReason::Deadline),
            OutcomeStatus::Cancelled if external.is_cancelled() => Some(CancelReason::External),
            _ => None,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        events.emit(RunEvent::RunFinished {
            run_id: run_id.clone(),
            status: outcome.status(),
            elapsed_ms,
        });
        log::info!(
            "Run {} finished: {} in {}ms",
            run_id,
            outcome.status(),
            elapsed_ms
        );

        RunReport {
            run_id,
            outcome,
            snapshot: state.snapshot(),
            events: events.records(),
            elapsed_ms,
            cancel_reason,
        }
    }
}
