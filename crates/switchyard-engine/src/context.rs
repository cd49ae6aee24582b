//! Per-invocation context and the guarded invoke

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::WorkerError;
use crate::events::{EventLog, RunEvent};
use crate::outcome::{Outcome, Payload};
use crate::state::SharedState;
use crate::worker::WorkerRef;

/// Everything a worker may touch during one invocation.
///
/// Cloning is cheap: all fields are shared handles.
#[derive(Clone, Debug)]
pub struct InvocationContext {
    state: SharedState,
    events: EventLog,
    cancel: CancellationToken,
    config: Arc<EngineConfig>,
}

impl InvocationContext {
    pub fn new(
        state: SharedState,
        events: EventLog,
        cancel: CancellationToken,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            state,
            events,
            cancel,
            config,
        }
    }

    /// A standalone context over `state`, for exercising workers directly
    pub fn for_state(state: SharedState) -> Self {
        Self::new(
            state,
            EventLog::detached("detached"),
            CancellationToken::new(),
            Arc::new(EngineConfig::default()),
        )
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        self.events.run_id()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the run or the enclosing subtree is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Same context over another state handle (parallel forks)
    pub(crate) fn with_state(&self, state: SharedState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    /// Same context under another cancellation token (subtree deadlines)
    pub(crate) fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// Invoke a worker under the engine's guard.
    ///
    /// The returned outcome is recorded in the event log. A panic becomes a
    /// `Failure`. A leaf still running when cancellation fires is dropped
    /// and reported as `Cancelled`; composites are always awaited to
    /// completion and wind down on their own.
    pub async fn invoke(&self, worker: &WorkerRef, input: Payload) -> Outcome {
        let name = worker.name();

        if self.is_cancelled() {
            log::debug!("Skipping '{}': run cancelled", name);
            return self.events.record_outcome(name, Outcome::cancelled(name));
        }

        let kind = worker.kind();
        self.events.emit(RunEvent::WorkerStarted {
            worker: name.to_string(),
            kind,
        });
        log::debug!("Worker '{}' ({:?}) started", name, kind);

        let guarded = AssertUnwindSafe(worker.invoke(self, input)).catch_unwind();

        let result = if kind.is_leaf() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = guarded => Some(result),
            }
        } else {
            Some(guarded.await)
        };

        let outcome = match result {
            Some(Ok(outcome)) => outcome,
            Some(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                log::error!("Worker '{}' panicked: {}", name, message);
                Outcome::failure(name, WorkerError::panicked(message))
            }
            None => {
                log::warn!("Worker '{}' abandoned after cancellation", name);
                self.events.emit(RunEvent::CancellationObserved {
                    worker: name.to_string(),
                });
                Outcome::cancelled(name)
            }
        };

        let outcome = self.events.record_outcome(name, outcome);
        log::debug!(
            "Worker '{}' finished: {} (#{})",
            name,
            outcome.status(),
            outcome.sequence()
        );
        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
