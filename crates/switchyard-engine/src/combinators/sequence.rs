use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{ensure_unique_names, union_reads, union_writes};
use crate::context::InvocationContext;
use crate::error::ConstructionError;
use crate::outcome::{Outcome, Payload};
use crate::worker::{Worker, WorkerKind, WorkerRef};

/// Runs children one at a time, feeding each child's payload to the next.
///
/// Stops at the first child that does not succeed and returns that
/// child's outcome unchanged. If every child succeeds the outcome is the
/// last child's.
pub struct Sequence {
    name: String,
    children: Vec<WorkerRef>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, children: Vec<WorkerRef>) -> Result<Self, ConstructionError> {
        let name = name.into();
        if children.is_empty() {
            return Err(ConstructionError::NoChildren { combinator: name });
        }
        ensure_unique_names(&name, &children.iter().collect::<Vec<_>>())?;
        Ok(Self { name, children })
    }

    pub fn into_ref(self) -> WorkerRef {
        Arc::new(self)
    }
}

/// Run `children` in order under `owner`.
///
/// Cancellation is checked between steps; a cancelled chain reports
/// `Cancelled` under the owner's name.
pub(crate) async fn run_chain(
    ctx: &InvocationContext,
    owner: &str,
    children: &[WorkerRef],
    input: Payload,
) -> Outcome {
    let mut payload = input;
    let mut last = None;
    for child in children {
        if ctx.is_cancelled() {
            return Outcome::cancelled(owner);
        }
        let outcome = ctx.invoke(child, payload).await;
        if !outcome.is_success() {
            log::debug!(
                "'{}' stopped at '{}' ({})",
                owner,
                child.name(),
                outcome.status()
            );
            return outcome;
        }
        payload = outcome.payload().clone();
        last = Some(outcome);
    }
    last.unwrap_or_else(|| Outcome::success(owner, payload))
}

#[async_trait]
impl Worker for Sequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Sequence
    }

    fn reads(&self) -> BTreeSet<String> {
        union_reads(&self.children)
    }

    fn writes(&self) -> BTreeSet<String> {
        union_writes(&self.children)
    }

    fn children(&self) -> Vec<WorkerRef> {
        self.children.clone()
    }

    async fn invoke(&self, ctx: &InvocationContext, input: Payload) -> Outcome {
        run_chain(ctx, &self.name, &self.children, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use crate::outcome::OutcomeStatus;
    use crate::state::SharedState;
    use crate::worker::{Condition, FnWorker};
    use serde_json::json;

    fn counting(name: &str) -> WorkerRef {
        let key = format!("{}_runs", name);
        FnWorker::sync(name, move |state, input| {
            state.update(key.clone(), |n| {
                (n.and_then(|v| v.as_i64()).unwrap_or(0) + 1).into()
            });
            Ok(input)
        })
        .into_ref()
    }

    #[test]
    fn test_empty_sequence_is_rejected() {
        assert!(matches!(
            Sequence::new("empty", vec![]),
            Err(ConstructionError::NoChildren { .. })
        ));
    }

    #[tokio::test]
    async fn test_payload_threading() {
        let ctx = InvocationContext::for_state(SharedState::new());
        let add_one = |name: &str| {
            FnWorker::sync(name, |_, input| {
                Ok(json!(input.as_i64().unwrap_or(0) + 1))
            })
            .into_ref()
        };
        let seq = Sequence::new("chain", vec![add_one("a"), add_one("b"), add_one("c")])
            .unwrap()
            .into_ref();

        let outcome = ctx.invoke(&seq, json!(0)).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.payload(), &json!(3));
        assert_eq!(outcome.worker_name(), "c");
    }

    #[tokio::test]
    async fn test_short_circuit_on_failure() {
        let state = SharedState::new();
        let ctx = InvocationContext::for_state(state.clone());
        let failing = FnWorker::sync("broken", |_, _| Err(WorkerError::upstream("503"))).into_ref();
        let seq = Sequence::new(
            "chain",
            vec![counting("first"), failing, counting("after")],
        )
        .unwrap()
        .into_ref();

        let outcome = ctx.invoke(&seq, json!("x")).await;
        assert_eq!(outcome.status(), OutcomeStatus::Failure);
        assert_eq!(outcome.worker_name(), "broken");
        assert!(state.contains("first_runs"));
        assert!(!state.contains("after_runs"));

        // The sequence returned exactly the outcome its child recorded
        let child = ctx.events().outcomes_for("broken");
        assert_eq!(child, vec![outcome]);
    }

    #[tokio::test]
    async fn test_escalate_propagates() {
        let state = SharedState::new();
        state.set("stop", true);
        let ctx = InvocationContext::for_state(state.clone());
        let seq = Sequence::new(
            "chain",
            vec![
                Condition::key_equals("check", "stop", true).into_ref(),
                counting("after"),
            ],
        )
        .unwrap()
        .into_ref();

        let outcome = ctx.invoke(&seq, json!("x")).await;
        assert_eq!(outcome.status(), OutcomeStatus::Escalate);
        assert!(!state.contains("after_runs"));
    }
}
