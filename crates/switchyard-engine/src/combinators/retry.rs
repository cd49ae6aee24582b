use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::InvocationContext;
use crate::error::ConstructionError;
use crate::events::RunEvent;
use crate::outcome::{Annotation, Outcome, OutcomeStatus, Payload};
use crate::worker::{Worker, WorkerKind, WorkerRef};

/// Re-invokes a worker whose outcome is `Failure`.
///
/// Only plain failures are retried; every other status is final. Delays
/// grow exponentially from the engine config's backoff settings and are
/// cut short by cancellation. The final outcome is reported under the
/// wrapper's name with an `Attempts` annotation.
pub struct Retry {
    name: String,
    inner: WorkerRef,
    max_attempts: u32,
}

impl Retry {
    pub fn new(
        name: impl Into<String>,
        inner: WorkerRef,
        max_attempts: u32,
    ) -> Result<Self, ConstructionError> {
        let name = name.into();
        if max_attempts == 0 {
            return Err(ConstructionError::ZeroAttempts { name });
        }
        super::ensure_unique_names(&name, &[&inner])?;
        Ok(Self {
            name,
            inner,
            max_attempts,
        })
    }

    pub fn into_ref(self) -> WorkerRef {
        Arc::new(self)
    }
}

#[async_trait]
impl Worker for Retry {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Retry
    }

    fn reads(&self) -> BTreeSet<String> {
        self.inner.reads()
    }

    fn writes(&self) -> BTreeSet<String> {
        self.inner.writes()
    }

    fn children(&self) -> Vec<WorkerRef> {
        vec![Arc::clone(&self.inner)]
    }

    async fn invoke(&self, ctx: &InvocationContext, input: Payload) -> Outcome {
        let mut attempt = 1;
        loop {
            let outcome = ctx.invoke(&self.inner, input.clone()).await;
            if outcome.status() != OutcomeStatus::Failure || attempt >= self.max_attempts {
                return outcome
                    .renamed(&self.name)
                    .with_annotation(Annotation::Attempts { count: attempt });
            }

            let delay = ctx.config().retry_backoff(attempt);
            attempt += 1;
            log::warn!(
                "'{}' failed ({}); attempt {}/{} in {:?}",
                self.inner.name(),
                outcome.error().map(|e| e.to_string()).unwrap_or_default(),
                attempt,
                self.max_attempts,
                delay
            );
            ctx.events().emit(RunEvent::RetryScheduled {
                worker: self.name.clone(),
                attempt,
                delay_ms: delay.as_millis() as u64,
            });

            tokio::select! {
                _ = ctx.cancelled() => {
                    return Outcome::cancelled(&self.name)
                        .with_annotation(Annotation::Attempts { count: attempt - 1 });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::WorkerError;
    use crate::events::EventLog;
    use crate::state::{SharedState, StateValue};
    use crate::worker::FnWorker;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn fast_ctx() -> InvocationContext {
        let config = EngineConfig {
            retry_backoff_base_ms: 1,
            retry_backoff_max_ms: 5,
            ..Default::default()
        };
        InvocationContext::new(
            SharedState::new(),
            EventLog::detached("retry-test"),
            CancellationToken::new(),
            Arc::new(config),
        )
    }

    /// Fails until it has been called `succeed_on` times
    fn flaky(succeed_on: i64) -> WorkerRef {
        FnWorker::sync("flaky", move |state, _| {
            let calls = state.update("calls", |n| {
                (n.and_then(StateValue::as_i64).unwrap_or(0) + 1).into()
            });
            if calls.as_i64().unwrap_or(0) >= succeed_on {
                Ok(json!("ok"))
            } else {
                Err(WorkerError::upstream("temporarily unavailable"))
            }
        })
        .into_ref()
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(matches!(
            Retry::new("retry", flaky(1), 0),
            Err(ConstructionError::ZeroAttempts { .. })
        ));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let ctx = fast_ctx();
        let retry = Retry::new("retry", flaky(3), 5).unwrap().into_ref();

        let outcome = ctx.invoke(&retry, Payload::Null).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.worker_name(), "retry");
        assert_eq!(outcome.annotations(), &[Annotation::Attempts { count: 3 }]);

        let scheduled = ctx
            .events()
            .records()
            .iter()
            .filter(|r| matches!(r.event, RunEvent::RetryScheduled { .. }))
            .count();
        assert_eq!(scheduled, 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let ctx = fast_ctx();
        let retry = Retry::new("retry", flaky(10), 2).unwrap().into_ref();

        let outcome = ctx.invoke(&retry, Payload::Null).await;
        assert_eq!(outcome.status(), OutcomeStatus::Failure);
        assert_eq!(outcome.annotations(), &[Annotation::Attempts { count: 2 }]);
        assert_eq!(ctx.state().get("calls").and_then(|v| v.as_i64()), Some(2));
    }

    #[tokio::test]
    async fn test_escalate_is_not_retried() {
        let ctx = fast_ctx();
        let escalating = crate::worker::Condition::new("stop", |_, _| Ok(true)).into_ref();
        let retry = Retry::new("retry", escalating, 3).unwrap().into_ref();

        let outcome = ctx.invoke(&retry, json!("x")).await;
        assert_eq!(outcome.status(), OutcomeStatus::Escalate);
        assert_eq!(ctx.events().outcomes_for("stop").len(), 1);
    }
}
