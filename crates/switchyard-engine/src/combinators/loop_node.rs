use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{ensure_unique_names, run_chain, union_reads, union_writes};
use crate::context::InvocationContext;
use crate::error::ConstructionError;
use crate::events::RunEvent;
use crate::outcome::{Annotation, Outcome, OutcomeStatus, Payload};
use crate::worker::{Worker, WorkerKind, WorkerRef};

/// Repeats a body until a terminator escalates or the bound is reached.
///
/// Each iteration runs the body with sequence semantics, then the
/// terminator on the body's last payload. An `Escalate` from either stops
/// the loop with `Success` under the loop's name. Failures are returned
/// unchanged. Reaching the bound yields `Exhausted`.
pub struct Loop {
    name: String,
    body: Vec<WorkerRef>,
    terminator: WorkerRef,
    max_iterations: Option<u32>,
    iteration_key: Option<String>,
}

/// Builder for [`Loop`]
pub struct LoopBuilder {
    name: String,
    body: Vec<WorkerRef>,
    terminator: Option<WorkerRef>,
    max_iterations: Option<u32>,
    iteration_key: Option<String>,
}

impl Loop {
    pub fn builder(name: impl Into<String>) -> LoopBuilder {
        LoopBuilder {
            name: name.into(),
            body: Vec::new(),
            terminator: None,
            max_iterations: None,
            iteration_key: None,
        }
    }

    pub fn into_ref(self) -> WorkerRef {
        Arc::new(self)
    }

    fn stopped(&self, outcome: Outcome, iterations: u32) -> Outcome {
        log::debug!(
            "Loop '{}' stopped by '{}' after {} iteration(s)",
            self.name,
            outcome.worker_name(),
            iterations
        );
        Outcome::success(&self.name, outcome.into_payload())
            .with_annotation(Annotation::Iterations { count: iterations })
    }
}

impl LoopBuilder {
    /// Append a body worker
    pub fn body(mut self, worker: WorkerRef) -> Self {
        self.body.push(worker);
        self
    }

    /// The worker that decides, after each iteration, whether to stop (required)
    pub fn terminator(mut self, worker: WorkerRef) -> Self {
        self.terminator = Some(worker);
        self
    }

    /// Iteration bound; falls back to the engine config when unset
    pub fn max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Mirror the 1-based iteration number into a state key
    pub fn iteration_key(mut self, key: impl Into<String>) -> Self {
        self.iteration_key = Some(key.into());
        self
    }

    pub fn build(self) -> Result<Loop, ConstructionError> {
        if self.body.is_empty() {
            return Err(ConstructionError::NoChildren {
                combinator: self.name,
            });
        }
        let terminator = self
            .terminator
            .ok_or_else(|| ConstructionError::MissingTerminator {
                name: self.name.clone(),
            })?;

        let mut members: Vec<&WorkerRef> = self.body.iter().collect();
        members.push(&terminator);
        ensure_unique_names(&self.name, &members)?;

        Ok(Loop {
            name: self.name,
            body: self.body,
            terminator,
            max_iterations: self.max_iterations,
            iteration_key: self.iteration_key,
        })
    }
}

#[async_trait]
impl Worker for Loop {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Loop
    }

    fn reads(&self) -> BTreeSet<String> {
        union_reads(self.body.iter().chain(std::iter::once(&self.terminator)))
    }

    fn writes(&self) -> BTreeSet<String> {
        let mut writes = union_writes(self.body.iter().chain(std::iter::once(&self.terminator)));
        writes.extend(self.iteration_key.iter().cloned());
        writes
    }

    fn children(&self) -> Vec<WorkerRef> {
        let mut children = self.body.clone();
        children.push(Arc::clone(&self.terminator));
        children
    }

    async fn invoke(&self, ctx: &InvocationContext, input: Payload) -> Outcome {
        let max = self
            .max_iterations
            .unwrap_or(ctx.config().default_max_iterations);
        let mut payload = input;
        let mut iterations = 0;

        for iteration in 1..=max {
            if ctx.is_cancelled() {
                return Outcome::cancelled(&self.name)
                    .with_annotation(Annotation::Iterations { count: iterations });
            }
            iterations = iteration;
            if let Some(key) = &self.iteration_key {
                ctx.state().set(key.clone(), iteration);
            }
            ctx.events().emit(RunEvent::LoopIteration {
                worker: self.name.clone(),
                iteration,
            });

            let body = run_chain(ctx, &self.name, &self.body, payload.clone()).await;
            match body.status() {
                OutcomeStatus::Success => {}
                OutcomeStatus::Escalate => return self.stopped(body, iterations),
                _ => return body,
            }
            payload = body.into_payload();

            let verdict = ctx.invoke(&self.terminator, payload.clone()).await;
            match verdict.status() {
                OutcomeStatus::Success => {}
                OutcomeStatus::Escalate => return self.stopped(verdict, iterations),
                _ => return verdict,
            }
        }

        log::warn!("Loop '{}' exhausted after {} iteration(s)", self.name, iterations);
        Outcome::exhausted(&self.name, payload)
            .with_annotation(Annotation::Iterations { count: iterations })
    }
}
