use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::InvocationContext;
use crate::error::ConstructionError;
use crate::outcome::{Annotation, Outcome, OutcomeStatus, Payload};
use crate::worker::{Worker, WorkerKind, WorkerRef};

/// Cancels a subtree once a deadline passes.
///
/// The subtree runs under a child token of the run's token, so the run's
/// own cancellation still reaches it. When the deadline fires the wrapper
/// waits for the subtree to wind down and reports `Cancelled` with a
/// `DeadlineExceeded` annotation.
pub struct Timeout {
    name: String,
    inner: WorkerRef,
    limit: Duration,
}

impl Timeout {
    pub fn new(
        name: impl Into<String>,
        inner: WorkerRef,
        limit: Duration,
    ) -> Result<Self, ConstructionError> {
        let name = name.into();
        super::ensure_unique_names(&name, &[&inner])?;
        Ok(Self { name, inner, limit })
    }

    pub fn into_ref(self) -> WorkerRef {
        Arc::new(self)
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}

#[async_trait]
impl Worker for Timeout {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Timeout
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
        let token = ctx.cancellation_token().child_token();
        let scoped = ctx.with_cancel(token.clone());

        let work = scoped.invoke(&self.inner, input);
        tokio::pin!(work);
        let deadline = tokio::time::sleep(self.limit);
        tokio::pin!(deadline);

        let mut expired = false;
        let outcome = tokio::select! {
            outcome = &mut work => outcome,
            _ = &mut deadline => {
                expired = true;
                log::warn!("'{}' exceeded {:?}; cancelling '{}'", self.name, self.limit, self.inner.name());
                token.cancel();
                work.await
            }
        };

        if expired && outcome.status() == OutcomeStatus::Cancelled && !ctx.is_cancelled() {
            return Outcome::cancelled(&self.name).with_annotation(Annotation::DeadlineExceeded {
                limit_ms: self.limit.as_millis() as u64,
            });
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SharedState;
    use crate::worker::FnWorker;
    use serde_json::json;

    fn sleeper(ms: u64) -> WorkerRef {
        FnWorker::new("sleeper", move |_, _| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!("woke"))
        })
        .into_ref()
    }

    #[tokio::test]
    async fn test_fast_work_passes_through() {
        let ctx = InvocationContext::for_state(SharedState::new());
        let guarded = Timeout::new("deadline", sleeper(0), Duration::from_secs(5))
            .unwrap()
            .into_ref();

        let outcome = ctx.invoke(&guarded, Payload::Null).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.worker_name(), "sleeper");
    }

    #[tokio::test]
    async fn test_deadline_cancels_subtree() {
        let ctx = InvocationContext::for_state(SharedState::new());
        let guarded = Timeout::new("deadline", sleeper(30_000), Duration::from_millis(20))
            .unwrap()
            .into_ref();

        let outcome = ctx.invoke(&guarded, Payload::Null).await;
        assert_eq!(outcome.status(), OutcomeStatus::Cancelled);
        assert_eq!(outcome.worker_name(), "deadline");
        assert_eq!(
            outcome.annotations(),
            &[Annotation::DeadlineExceeded { limit_ms: 20 }]
        );
        // Only the subtree was cancelled
        assert!(!ctx.is_cancelled());
    }
}
