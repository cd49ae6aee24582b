//! The worker abstraction
//!
//! A [`Worker`] is the single unit of executable work: it is invoked with a
//! context and an input payload and produces exactly one [`Outcome`].
//! Leaves do the actual work; combinators are workers built from child
//! workers.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::context::InvocationContext;
use crate::error::WorkerError;
use crate::outcome::{Outcome, Payload};
use crate::state::{SharedState, StateValue};

/// Shared handle to a worker
pub type WorkerRef = Arc<dyn Worker>;

/// Structural role of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Leaf,
    Sequence,
    Parallel,
    Branch,
    Loop,
    Delegate,
    Retry,
    Timeout,
}

impl WorkerKind {
    /// Leaves are abandoned on cancellation; composites wind down themselves
    pub fn is_leaf(&self) -> bool {
        matches!(self, WorkerKind::Leaf)
    }
}

/// A unit of executable work.
///
/// Workers are stateless across invocations. They must not retain the
/// context past the call.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Name, unique within the tree handed to one orchestrator
    fn name(&self) -> &str;

    fn kind(&self) -> WorkerKind {
        WorkerKind::Leaf
    }

    /// What this worker is for, shown to models that can call it
    fn description(&self) -> Option<&str> {
        None
    }

    /// State keys this worker reads
    fn reads(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// State keys this worker writes
    fn writes(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Direct children, for composites
    fn children(&self) -> Vec<WorkerRef> {
        Vec::new()
    }

    /// Execute once.
    ///
    /// Children must be invoked through [`InvocationContext::invoke`] so
    /// their outcomes are recorded and cancellation is honoured.
    async fn invoke(&self, ctx: &InvocationContext, input: Payload) -> Outcome;
}

type WorkFn = dyn Fn(InvocationContext, Payload) -> BoxFuture<'static, Result<Payload, WorkerError>>
    + Send
    + Sync;

/// A leaf worker backed by a closure.
///
/// The closure receives an owned copy of the context; it must not keep it
/// beyond the returned future.
pub struct FnWorker {
    name: String,
    reads: BTreeSet<String>,
    writes: BTreeSet<String>,
    work: Arc<WorkFn>,
}

impl FnWorker {
    /// Wrap an async closure
    pub fn new<F, Fut>(name: impl Into<String>, work: F) -> Self
    where
        F: Fn(InvocationContext, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, WorkerError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            reads: BTreeSet::new(),
            writes: BTreeSet::new(),
            work: Arc::new(
                move |ctx: InvocationContext,
                      input: Payload|
                      -> BoxFuture<'static, Result<Payload, WorkerError>> {
                    Box::pin(work(ctx, input))
                },
            ),
        }
    }

    /// Wrap a synchronous closure over the shared state
    pub fn sync<F>(name: impl Into<String>, work: F) -> Self
    where
        F: Fn(&SharedState, Payload) -> Result<Payload, WorkerError> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        Self::new(name, move |ctx, input| {
            let work = Arc::clone(&work);
            async move { (*work)(ctx.state(), input) }
        })
    }

    pub fn with_reads<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn with_writes<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn into_ref(self) -> WorkerRef {
        Arc::new(self)
    }
}

#[async_trait]
impl Worker for FnWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn reads(&self) -> BTreeSet<String> {
        self.reads.clone()
    }

    fn writes(&self) -> BTreeSet<String> {
        self.writes.clone()
    }

    async fn invoke(&self, ctx: &InvocationContext, input: Payload) -> Outcome {
        match (self.work)(ctx.clone(), input).await {
            Ok(payload) => Outcome::success(&self.name, payload),
            Err(err) => Outcome::failure(&self.name, err),
        }
    }
}

type Predicate = dyn Fn(&SharedState, &Payload) -> Result<bool, WorkerError> + Send + Sync;

/// A leaf that escalates when its predicate holds.
///
/// Used as a loop terminator or an early-exit check inside a sequence. The
/// input payload is passed through unchanged either way.
pub struct Condition {
    name: String,
    reads: BTreeSet<String>,
    predicate: Box<Predicate>,
}

impl Condition {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&SharedState, &Payload) -> Result<bool, WorkerError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            reads: BTreeSet::new(),
            predicate: Box::new(predicate),
        }
    }

    /// Escalate once `key` holds `expected`; an absent key does not match
    pub fn key_equals(
        name: impl Into<String>,
        key: impl Into<String>,
        expected: impl Into<StateValue>,
    ) -> Self {
        let key = key.into();
        let expected = expected.into();
        let lookup = key.clone();
        Self::new(name, move |state, _| {
            Ok(state.get(&lookup).as_ref() == Some(&expected))
        })
        .with_reads([key])
    }

    pub fn with_reads<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn into_ref(self) -> WorkerRef {
        Arc::new(self)
    }
}

#[async_trait]
impl Worker for Condition {
    fn name(&self) -> &str {
        &self.name
    }

    fn reads(&self) -> BTreeSet<String> {
        self.reads.clone()
    }

    async fn invoke(&self, ctx: &InvocationContext, input: Payload) -> Outcome {
        match (self.predicate)(ctx.state(), &input) {
            Ok(true) => {
                log::debug!("Condition '{}' holds, escalating", self.name);
                Outcome::escalate(&self.name, input)
            }
            Ok(false) => Outcome::success(&self.name, input),
            Err(err) => Outcome::failure(&self.name, err),
        }
    }
}

/// Writes the wrapped worker's success payload to a state key.
///
/// The wrapper is transparent: it reports the inner worker's name, kind
/// and children.
pub struct WithOutputKey {
    inner: WorkerRef,
    key: String,
}

impl WithOutputKey {
    pub fn new(inner: WorkerRef, key: impl Into<String>) -> Self {
        Self {
            inner,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl Worker for WithOutputKey {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> WorkerKind {
        self.inner.kind()
    }

    fn description(&self) -> Option<&str> {
        self.inner.description()
    }

    fn reads(&self) -> BTreeSet<String> {
        self.inner.reads()
    }

    fn writes(&self) -> BTreeSet<String> {
        let mut writes = self.inner.writes();
        writes.insert(self.key.clone());
        writes
    }

    fn children(&self) -> Vec<WorkerRef> {
        self.inner.children()
    }

    async fn invoke(&self, ctx: &InvocationContext, input: Payload) -> Outcome {
        let outcome = self.inner.invoke(ctx, input).await;
        if !outcome.is_success() {
            return outcome;
        }
        match ctx.state().set_json(self.key.clone(), outcome.payload().clone()) {
            Ok(()) => outcome,
            Err(err) => Outcome::failure(self.inner.name(), err.into()),
        }
    }
}

/// Attach an output key to any worker
pub fn with_output_key(worker: WorkerRef, key: impl Into<String>) -> WorkerRef {
    Arc::new(WithOutputKey::new(worker, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::outcome::OutcomeStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_worker_success_and_failure() {
        let ctx = InvocationContext::for_state(SharedState::new());

        let upper = FnWorker::new("upper", |_ctx, input: Payload| async move {
            let text = input
                .as_str()
                .ok_or_else(|| WorkerError::invalid_input("expected text"))?;
            Ok(json!(text.to_uppercase()))
        });

        let outcome = upper.invoke(&ctx, json!("hello")).await;
        assert_eq!(outcome.status(), OutcomeStatus::Success);
        assert_eq!(outcome.payload(), &json!("HELLO"));

        let outcome = upper.invoke(&ctx, json!(3)).await;
        assert_eq!(outcome.status(), OutcomeStatus::Failure);
        assert_eq!(outcome.error().map(|e| e.kind), Some(ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn test_sync_worker_missing_state_fails() {
        let ctx = InvocationContext::for_state(SharedState::new());
        let reader = FnWorker::sync("reader", |state, _| {
            let draft = state.require_text("draft_text")?;
            Ok(json!(draft))
        })
        .with_reads(["draft_text"]);

        assert!(reader.reads().contains("draft_text"));
        let outcome = reader.invoke(&ctx, Payload::Null).await;
        assert_eq!(outcome.error().map(|e| e.kind), Some(ErrorKind::MissingState));
    }

    #[tokio::test]
    async fn test_condition_key_equals() {
        let state = SharedState::new();
        let ctx = InvocationContext::for_state(state.clone());
        let done = Condition::key_equals("done", "status", "completed");

        let outcome = done.invoke(&ctx, json!("payload")).await;
        assert_eq!(outcome.status(), OutcomeStatus::Success);
        assert_eq!(outcome.payload(), &json!("payload"));

        state.set("status", "completed");
        let outcome = done.invoke(&ctx, json!("payload")).await;
        assert_eq!(outcome.status(), OutcomeStatus::Escalate);
        assert_eq!(outcome.payload(), &json!("payload"));
    }

    #[tokio::test]
    async fn test_output_key_writes_payload() {
        let state = SharedState::new();
        let ctx = InvocationContext::for_state(state.clone());
        let draft = with_output_key(
            FnWorker::sync("draft", |_, _| Ok(json!("first draft"))).into_ref(),
            "draft_text",
        );

        assert_eq!(draft.name(), "draft");
        assert!(draft.writes().contains("draft_text"));

        let outcome = draft.invoke(&ctx, Payload::Null).await;
        assert!(outcome.is_success());
        assert_eq!(state.get("draft_text"), Some(StateValue::from("first draft")));
    }

    #[tokio::test]
    async fn test_output_key_rejects_null() {
        let ctx = InvocationContext::for_state(SharedState::new());
        let empty = WithOutputKey::new(
            FnWorker::sync("empty", |_, _| Ok(Payload::Null)).into_ref(),
            "result",
        );
        let outcome = empty.invoke(&ctx, Payload::Null).await;
        assert_eq!(outcome.error().map(|e| e.kind), Some(ErrorKind::InvalidOutput));
    }
}
