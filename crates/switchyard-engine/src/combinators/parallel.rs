use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Map;
use tokio::task::JoinSet;

use super::{ensure_unique_names, union_reads, union_writes};
use crate::context::InvocationContext;
use crate::error::{ConstructionError, WorkerError};
use crate::events::RunEvent;
use crate::outcome::{Outcome, OutcomeStatus, Payload};
use crate::state::StateError;
use crate::worker::{Worker, WorkerKind, WorkerRef};

/// Runs all children concurrently on forks of the state.
///
/// Every child receives the same input. The join waits for every child,
/// then folds the forks back and picks the result:
///
/// 1. `Cancelled` if the run or subtree was cancelled (fork writes are
///    discarded)
/// 2. `StateConflict` if two children wrote the same key
/// 3. the earliest-completed failure
/// 4. the earliest escalation, then any other non-success
/// 5. otherwise `Success` with `{child_name: payload}`
pub struct Parallel {
    name: String,
    children: Vec<WorkerRef>,
}

impl Parallel {
    pub fn new(name: impl Into<String>, children: Vec<WorkerRef>) -> Result<Self, ConstructionError> {
        let name = name.into();
        if children.is_empty() {
            return Err(ConstructionError::NoChildren { combinator: name });
        }
        ensure_unique_names(&name, &children.iter().collect::<Vec<_>>())?;

        for (i, first) in children.iter().enumerate() {
            let first_writes = first.writes();
            for second in &children[i + 1..] {
                if let Some(key) = first_writes.intersection(&second.writes()).next() {
                    return Err(ConstructionError::OverlappingOutputs {
                        parallel: name,
                        first: first.name().to_string(),
                        second: second.name().to_string(),
                        key: key.clone(),
                    });
                }
            }
        }

        Ok(Self { name, children })
    }

    pub fn into_ref(self) -> WorkerRef {
        Arc::new(self)
    }
}

/// Run `children` concurrently under `owner` and aggregate their outcomes.
pub(crate) async fn fan_out(
    ctx: &InvocationContext,
    owner: &str,
    children: &[WorkerRef],
    input: Payload,
) -> Outcome {
    if ctx.is_cancelled() {
        return Outcome::cancelled(owner);
    }

    let mut forks = Vec::with_capacity(children.len());
    let mut tasks = JoinSet::new();
    for (index, child) in children.iter().enumerate() {
        let fork = ctx.state().fork(child.name());
        forks.push(fork.clone());
        let child_ctx = ctx.with_state(fork);
        let child = Arc::clone(child);
        let input = input.clone();
        tasks.spawn(async move {
            let outcome = child_ctx.invoke(&child, input).await;
            (index, outcome)
        });
    }

    let mut results: Vec<Option<Outcome>> = vec![None; children.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => results[index] = Some(outcome),
            Err(err) => log::error!("'{}': child task ended abnormally: {}", owner, err),
        }
    }

    let outcomes: Vec<Outcome> = results
        .into_iter()
        .zip(children)
        .map(|(outcome, child)| {
            outcome.unwrap_or_else(|| {
                ctx.events().record_outcome(
                    child.name(),
                    Outcome::failure(
                        child.name(),
                        WorkerError::internal("child task ended without an outcome"),
                    ),
                )
            })
        })
        .collect();

    if ctx.is_cancelled() {
        log::warn!("'{}' cancelled; discarding writes of {} forks", owner, forks.len());
        return Outcome::cancelled(owner);
    }

    match ctx.state().merge(&forks) {
        Ok(applied) => log::debug!("'{}' merged {} keys", owner, applied),
        Err(StateError::Conflict { key, writers }) => {
            log::warn!("'{}': key '{}' written by {:?}", owner, key, writers);
            let message = format!("key '{}' written concurrently by {}", key, writers.join(", "));
            ctx.events().emit(RunEvent::StateConflict {
                worker: owner.to_string(),
                key,
                writers,
            });
            return Outcome::conflict(owner, message);
        }
        Err(err) => return Outcome::failure(owner, err.into()),
    }

    if let Some(failure) = earliest(&outcomes, |s| s.is_failure()) {
        return failure;
    }
    if let Some(escalation) = earliest(&outcomes, |s| s == OutcomeStatus::Escalate) {
        return escalation;
    }
    if let Some(other) = earliest(&outcomes, |s| !s.is_success()) {
        return other;
    }

    // Keyed by the child's own name: composites hand back a descendant's outcome
    let payload: Map<String, Payload> = children
        .iter()
        .zip(outcomes)
        .map(|(child, o)| (child.name().to_string(), o.into_payload()))
        .collect();
    Outcome::success(owner, Payload::Object(payload))
}

/// The matching outcome with the lowest completion sequence; ties go to
/// the lowest child index
fn earliest(outcomes: &[Outcome], matches: impl Fn(OutcomeStatus) -> bool) -> Option<Outcome> {
    outcomes
        .iter()
        .enumerate()
        .filter(|(_, o)| matches(o.status()))
        .min_by_key(|(index, o)| (o.sequence(), *index))
        .map(|(_, o)| o.clone())
}

#[async_trait]
impl Worker for Parallel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Parallel
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
        fan_out(ctx, &self.name, &self.children, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::Sequence;
    use crate::error::ErrorKind;
    use crate::state::SharedState;
    use crate::worker::FnWorker;
    use serde_json::json;
    use std::time::Duration;

    fn writer(name: &str, key: &'static str, delay_ms: u64) -> FnWorker {
        FnWorker::new(name, move |ctx, _| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            ctx.state().set(key, "written");
            Ok(json!(key))
        })
    }

    #[test]
    fn test_overlapping_declared_outputs_rejected() {
        let a = writer("a", "summary", 0).with_writes(["summary"]).into_ref();
        let b = writer("b", "summary", 0).with_writes(["summary"]).into_ref();
        assert!(matches!(
            Parallel::new("fan", vec![a, b]),
            Err(ConstructionError::OverlappingOutputs { key, .. }) if key == "summary"
        ));
    }

    #[tokio::test]
    async fn test_disjoint_writes_all_visible() {
        // Completion order is the reverse of declaration order
        let state = SharedState::new();
        let ctx = InvocationContext::for_state(state.clone());
        let fan = Parallel::new(
            "fan",
            vec![
                writer("slow", "left", 40).into_ref(),
                writer("medium", "middle", 20).into_ref(),
                writer("fast", "right", 0).into_ref(),
            ],
        )
        .unwrap()
        .into_ref();

        let outcome = ctx.invoke(&fan, Payload::Null).await;
        assert!(outcome.is_success());
        assert_eq!(
            outcome.payload(),
            &json!({"slow": "left", "medium": "middle", "fast": "right"})
        );
        for key in ["left", "middle", "right"] {
            assert!(state.contains(key), "missing {}", key);
        }
    }

    #[tokio::test]
    async fn test_overlapping_writes_conflict_deterministically() {
        for (first_delay, second_delay) in [(0, 30), (30, 0)] {
            let state = SharedState::new();
            let ctx = InvocationContext::for_state(state.clone());
            let fan = Parallel::new(
                "fan",
                vec![
                    writer("a", "shared", first_delay).into_ref(),
                    writer("b", "shared", second_delay).into_ref(),
                    writer("c", "own", 0).into_ref(),
                ],
            )
            .unwrap()
            .into_ref();

            let outcome = ctx.invoke(&fan, Payload::Null).await;
            assert_eq!(outcome.status(), OutcomeStatus::StateConflict);
            assert_eq!(outcome.worker_name(), "fan");
            let error = outcome.error().unwrap();
            assert_eq!(error.kind, ErrorKind::Conflict);
            assert!(error.message.contains("'shared'"));
            assert!(error.message.contains("a, b"));
            assert!(!state.contains("shared"));
            assert!(!state.contains("own"));
        }
    }

    #[tokio::test]
    async fn test_failure_after_all_siblings_finish() {
        let state = SharedState::new();
        let ctx = InvocationContext::for_state(state.clone());
        let failing = FnWorker::sync("failing", |_, _| Err(WorkerError::upstream("down"))).into_ref();
        let fan = Parallel::new("fan", vec![failing, writer("slow", "late", 30).into_ref()])
            .unwrap()
            .into_ref();

        let outcome = ctx.invoke(&fan, Payload::Null).await;
        assert_eq!(outcome.status(), OutcomeStatus::Failure);
        assert_eq!(outcome.worker_name(), "failing");
        // The slow sibling ran to completion and its write was merged
        assert!(state.contains("late"));
    }

    #[tokio::test]
    async fn test_earliest_failure_wins() {
        let ctx = InvocationContext::for_state(SharedState::new());
        let late = FnWorker::new("late", |_, _| async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Err(WorkerError::internal("late"))
        })
        .into_ref();
        let early = FnWorker::sync("early", |_, _| Err(WorkerError::internal("early"))).into_ref();
        let fan = Parallel::new("fan", vec![late, early]).unwrap().into_ref();

        let outcome = ctx.invoke(&fan, Payload::Null).await;
        assert_eq!(outcome.worker_name(), "early");
    }

    fn named(name: &'static str) -> WorkerRef {
        FnWorker::sync(name, move |_, _| Ok(json!(name))).into_ref()
    }

    #[tokio::test]
    async fn test_fan_in_keyed_by_child_name() {
        let ctx = InvocationContext::for_state(SharedState::new());
        let shared = named("shared_tail");
        let left = Sequence::new("left", vec![named("a1"), Arc::clone(&shared)])
            .unwrap()
            .into_ref();
        let right = Sequence::new("right", vec![named("b1"), shared])
            .unwrap()
            .into_ref();
        let fan = Parallel::new("fan", vec![left, right, named("solo")])
            .unwrap()
            .into_ref();

        let outcome = ctx.invoke(&fan, Payload::Null).await;
        assert!(outcome.is_success());
        assert_eq!(
            outcome.payload(),
            &json!({"left": "shared_tail", "right": "shared_tail", "solo": "solo"})
        );
    }

    #[tokio::test]
    async fn test_siblings_do_not_see_each_other() {
        let ctx = InvocationContext::for_state(SharedState::new());
        let producer = writer("producer", "handoff", 0).into_ref();
        let consumer = FnWorker::new("consumer", |ctx, _| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(json!(ctx.state().contains("handoff")))
        })
        .into_ref();
        let fan = Parallel::new("fan", vec![producer, consumer]).unwrap().into_ref();

        let outcome = ctx.invoke(&fan, Payload::Null).await;
        assert_eq!(outcome.payload()["consumer"], json!(false));
        assert!(ctx.state().contains("handoff"));
    }
}
