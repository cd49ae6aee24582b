use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ensure_unique_names, fan_out, union_reads, union_writes};
use crate::context::InvocationContext;
use crate::error::{ConstructionError, WorkerError};
use crate::events::RunEvent;
use crate::outcome::{Outcome, Payload};
use crate::worker::{Worker, WorkerKind, WorkerRef};

/// How a delegate runs the targets its coordinator picks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegateMode {
    /// Exactly one target; its outcome is the delegate's outcome
    Single,
    /// Any number of targets, run with parallel semantics
    FanOut,
}

/// A coordinator-driven dispatch to named children.
///
/// The coordinator's payload names the targets:
///
/// - `"name"`
/// - `["a", "b"]`
/// - `{"target": "name", "input": ...}` or `{"targets": [...], "input": ...}`
///
/// Without an explicit `input`, targets receive the delegate's own input.
pub struct Delegate {
    name: String,
    coordinator: WorkerRef,
    children: BTreeMap<String, WorkerRef>,
    mode: DelegateMode,
}

impl Delegate {
    pub fn new(
        name: impl Into<String>,
        coordinator: WorkerRef,
        children: Vec<WorkerRef>,
        mode: DelegateMode,
    ) -> Result<Self, ConstructionError> {
        let name = name.into();
        if children.is_empty() {
            return Err(ConstructionError::NoChildren { combinator: name });
        }
        let mut members: Vec<&WorkerRef> = vec![&coordinator];
        members.extend(children.iter());
        ensure_unique_names(&name, &members)?;

        let children = children
            .into_iter()
            .map(|child| (child.name().to_string(), child))
            .collect();
        Ok(Self {
            name,
            coordinator,
            children,
            mode,
        })
    }

    pub fn into_ref(self) -> WorkerRef {
        Arc::new(self)
    }

    pub fn mode(&self) -> DelegateMode {
        self.mode
    }

    /// Names of the children this delegate can dispatch to
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    fn select(&self, decision: &Payload, input: &Payload) -> Result<(Vec<WorkerRef>, Payload), WorkerError> {
        let (names, forwarded) = parse_decision(decision, input)?;

        if self.mode == DelegateMode::Single && names.len() != 1 {
            return Err(WorkerError::routing(format!(
                "'{}' dispatches to exactly one target, coordinator chose {}",
                self.name,
                names.len()
            )));
        }

        let mut seen = BTreeSet::new();
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            if !seen.insert(name.clone()) {
                return Err(WorkerError::routing(format!("target '{}' chosen twice", name)));
            }
            let child = self.children.get(&name).ok_or_else(|| {
                WorkerError::routing(format!(
                    "unknown target '{}' (known: {})",
                    name,
                    self.targets().collect::<Vec<_>>().join(", ")
                ))
            })?;
            selected.push(Arc::clone(child));
        }
        Ok((selected, forwarded))
    }
}

fn target_name(value: &Payload) -> Result<String, WorkerError> {
    match value.as_str().map(str::trim) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(WorkerError::routing(format!(
            "target must be a non-empty name, got {}",
            value
        ))),
    }
}

fn target_list(items: &[Payload]) -> Result<Vec<String>, WorkerError> {
    items.iter().map(target_name).collect()
}

/// Interpret a coordinator decision as target names plus the input to forward
fn parse_decision(decision: &Payload, input: &Payload) -> Result<(Vec<String>, Payload), WorkerError> {
    let (names, forwarded) = match decision {
        Payload::String(_) => (vec![target_name(decision)?], input.clone()),
        Payload::Array(items) => (target_list(items)?, input.clone()),
        Payload::Object(fields) => {
            let names = match (fields.get("target"), fields.get("targets")) {
                (Some(target), None) => vec![target_name(target)?],
                (None, Some(Payload::Array(items))) => target_list(items)?,
                _ => {
                    return Err(WorkerError::routing(
                        "decision must carry either 'target' or a 'targets' list",
                    ))
                }
            };
            let forwarded = fields.get("input").cloned().unwrap_or_else(|| input.clone());
            (names, forwarded)
        }
        other => {
            return Err(WorkerError::routing(format!(
                "cannot interpret coordinator decision {}",
                other
            )))
        }
    };
    if names.is_empty() {
        return Err(WorkerError::routing("coordinator chose no targets"));
    }
    Ok((names, forwarded))
}

#[async_trait]
impl Worker for Delegate {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Delegate
    }

    fn reads(&self) -> BTreeSet<String> {
        let mut reads = self.coordinator.reads();
        reads.extend(union_reads(self.children.values()));
        reads
    }

    fn writes(&self) -> BTreeSet<String> {
        let mut writes = self.coordinator.writes();
        writes.extend(union_writes(self.children.values()));
        writes
    }

    fn children(&self) -> Vec<WorkerRef> {
        let mut children = vec![Arc::clone(&self.coordinator)];
        children.extend(self.children.values().cloned());
        children
    }

    async fn invoke(&self, ctx: &InvocationContext, input: Payload) -> Outcome {
        let decision = ctx.invoke(&self.coordinator, input.clone()).await;
        if !decision.is_success() {
            return decision;
        }
        if ctx.is_cancelled() {
            return Outcome::cancelled(&self.name);
        }

        let (selected, forwarded) = match self.select(decision.payload(), &input) {
            Ok(selection) => selection,
            Err(err) => {
                log::warn!("Delegate '{}': {}", self.name, err.message);
                return Outcome::failure(&self.name, err);
            }
        };

        let targets: Vec<String> = selected.iter().map(|c| c.name().to_string()).collect();
        log::debug!("Delegate '{}' dispatching to {:?}", self.name, targets);
        ctx.events().emit(RunEvent::DelegateDispatched {
            delegate: self.name.clone(),
            targets,
        });

        match self.mode {
            DelegateMode::Single => match selected.first() {
                Some(child) => ctx.invoke(child, forwarded).await,
                None => Outcome::failure(&self.name, WorkerError::routing("no target selected")),
            },
            DelegateMode::FanOut => fan_out(ctx, &self.name, &selected, forwarded).await,
        }
    }
}
