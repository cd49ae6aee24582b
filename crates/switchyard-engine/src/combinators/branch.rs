use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use super::{ensure_unique_names, union_reads, union_writes};
use crate::context::InvocationContext;
use crate::error::ConstructionError;
use crate::events::RunEvent;
use crate::outcome::{Annotation, Outcome, Payload};
use crate::worker::{Worker, WorkerKind, WorkerRef};

/// Routes to exactly one child based on a selector's label.
///
/// The selector's success payload is the label: a string (trimmed) or any
/// other value rendered as JSON text. The chosen child receives the
/// branch's original input, and its outcome becomes the branch's outcome.
/// Labels with no route go to the default child; the `RouteSelected` event
/// and a `RoutedToDefault` annotation make that visible.
pub struct Branch {
    name: String,
    selector: WorkerRef,
    routes: BTreeMap<String, WorkerRef>,
    default_labels: BTreeSet<String>,
    default: WorkerRef,
}

/// Builder for [`Branch`]
pub struct BranchBuilder {
    name: String,
    selector: WorkerRef,
    routes: Vec<(String, WorkerRef)>,
    default_labels: Vec<String>,
    default: Option<WorkerRef>,
}

impl Branch {
    pub fn builder(name: impl Into<String>, selector: WorkerRef) -> BranchBuilder {
        BranchBuilder {
            name: name.into(),
            selector,
            routes: Vec::new(),
            default_labels: Vec::new(),
            default: None,
        }
    }

    pub fn into_ref(self) -> WorkerRef {
        Arc::new(self)
    }

    /// Registered labels, including those declared as going to the default
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.routes
            .keys()
            .chain(self.default_labels.iter())
            .map(String::as_str)
    }

    fn resolve(&self, label: &str) -> (&WorkerRef, bool) {
        match self.routes.get(label) {
            Some(child) => (child, false),
            None => (&self.default, !self.default_labels.contains(label)),
        }
    }

    fn route_targets(&self) -> Vec<WorkerRef> {
        let mut targets: Vec<WorkerRef> = Vec::new();
        for child in self.routes.values().chain(std::iter::once(&self.default)) {
            if !targets.iter().any(|t| Arc::ptr_eq(t, child)) {
                targets.push(Arc::clone(child));
            }
        }
        targets
    }
}

impl BranchBuilder {
    /// Route `label` to `child`
    pub fn route(mut self, label: impl Into<String>, child: WorkerRef) -> Self {
        self.routes.push((label.into(), child));
        self
    }

    /// Declare a label that deliberately goes to the default child
    pub fn default_label(mut self, label: impl Into<String>) -> Self {
        self.default_labels.push(label.into());
        self
    }

    /// The child for every label without a route (required)
    pub fn default(mut self, child: WorkerRef) -> Self {
        self.default = Some(child);
        self
    }

    pub fn build(self) -> Result<Branch, ConstructionError> {
        let default = self.default.ok_or_else(|| ConstructionError::MissingDefault {
            branch: self.name.clone(),
        })?;

        let mut routes = BTreeMap::new();
        let mut default_labels = BTreeSet::new();
        let labels = self
            .routes
            .iter()
            .map(|(label, _)| label)
            .chain(self.default_labels.iter());
        let mut seen = BTreeSet::new();
        for label in labels {
            let label = label.trim();
            if label.is_empty() {
                return Err(ConstructionError::EmptyLabel { branch: self.name });
            }
            if !seen.insert(label.to_string()) {
                return Err(ConstructionError::DuplicateLabel {
                    branch: self.name,
                    label: label.to_string(),
                });
            }
        }
        for (label, child) in self.routes {
            routes.insert(label.trim().to_string(), child);
        }
        for label in self.default_labels {
            default_labels.insert(label.trim().to_string());
        }

        let branch = Branch {
            name: self.name,
            selector: self.selector,
            routes,
            default_labels,
            default,
        };
        let mut members = vec![&branch.selector];
        members.extend(branch.routes.values());
        members.push(&branch.default);
        ensure_unique_names(&branch.name, &members)?;
        Ok(branch)
    }
}

/// Turn a selector payload into a route label
fn label_of(payload: &Payload) -> String {
    match payload {
        Payload::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Worker for Branch {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Branch
    }

    fn reads(&self) -> BTreeSet<String> {
        let mut reads = self.selector.reads();
        reads.extend(union_reads(&self.route_targets()));
        reads
    }

    fn writes(&self) -> BTreeSet<String> {
        let mut writes = self.selector.writes();
        writes.extend(union_writes(&self.route_targets()));
        writes
    }

    fn children(&self) -> Vec<WorkerRef> {
        let mut children = vec![Arc::clone(&self.selector)];
        children.extend(self.route_targets());
        children
    }

    async fn invoke(&self, ctx: &InvocationContext, input: Payload) -> Outcome {
        let selection = ctx.invoke(&self.selector, input.clone()).await;
        if !selection.is_success() {
            return selection;
        }
        if ctx.is_cancelled() {
            return Outcome::cancelled(&self.name);
        }

        let label = label_of(selection.payload());
        let (target, fallback) = self.resolve(&label);

        if fallback {
            log::warn!(
                "Branch '{}': no route for label '{}', using default '{}'",
                self.name,
                label,
                target.name()
            );
        } else {
            log::debug!("Branch '{}': '{}' -> '{}'", self.name, label, target.name());
        }
        ctx.events().emit(RunEvent::RouteSelected {
            branch: self.name.clone(),
            label: label.clone(),
            target: target.name().to_string(),
            fallback,
        });

        let outcome = ctx.invoke(target, input).await;
        if fallback {
            outcome.with_annotation(Annotation::RoutedToDefault { label })
        } else {
            outcome
        }
    }
}
