//! Worker tree validation
//!
//! Walks a composed tree once, before any run, and collects every
//! structural problem: empty or duplicate names, cycles, and children
//! attached to more than one delegate. The walk also yields the
//! [`Hierarchy`] used for parent lookups.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::ConstructionError;
use crate::worker::{WorkerKind, WorkerRef};

/// Non-owning parent lookup by worker name
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    parents: BTreeMap<String, String>,
    kinds: BTreeMap<String, WorkerKind>,
}

impl Hierarchy {
    /// Name of the composite that first attaches `child`
    pub fn parent_of(&self, child: &str) -> Option<&str> {
        self.parents.get(child).map(String::as_str)
    }

    pub fn kind_of(&self, name: &str) -> Option<WorkerKind> {
        self.kinds.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Every worker name in the tree
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn identity(worker: &WorkerRef) -> usize {
    Arc::as_ptr(worker) as *const () as usize
}

struct Parent<'a> {
    id: usize,
    name: &'a str,
    kind: WorkerKind,
}

#[derive(Default)]
struct Walker {
    hierarchy: Hierarchy,
    errors: Vec<ConstructionError>,
    names: HashMap<String, usize>,
    marks: HashMap<usize, Mark>,
    /// child identity -> (delegate identity, delegate name)
    delegate_parents: HashMap<usize, (usize, String)>,
}

impl Walker {
    fn report(&mut self, error: ConstructionError) {
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
    }

    fn visit(&mut self, worker: &WorkerRef, parent: Option<Parent<'_>>) {
        let id = identity(worker);
        let name = worker.name().to_string();

        if name.is_empty() {
            self.report(ConstructionError::EmptyName);
        }

        if let Some(parent) = &parent {
            self.hierarchy
                .parents
                .entry(name.clone())
                .or_insert_with(|| parent.name.to_string());

            if parent.kind == WorkerKind::Delegate {
                match self.delegate_parents.get(&id) {
                    Some((delegate, first)) if *delegate != parent.id => {
                        let error = ConstructionError::MultipleParents {
                            child: name.clone(),
                            first: first.clone(),
                            second: parent.name.to_string(),
                        };
                        self.report(error);
                    }
                    Some(_) => {}
                    None => {
                        self.delegate_parents
                            .insert(id, (parent.id, parent.name.to_string()));
                    }
                }
            }
        }

        match self.names.get(&name) {
            Some(existing) if *existing != id => {
                self.report(ConstructionError::DuplicateName { name: name.clone() });
            }
            Some(_) => {}
            None => {
                self.names.insert(name.clone(), id);
            }
        }

        match self.marks.get(&id) {
            Some(Mark::Visiting) => {
                self.report(ConstructionError::Cycle { name });
                return;
            }
            Some(Mark::Done) => return,
            None => {}
        }

        let kind = worker.kind();
        self.hierarchy.kinds.entry(name.clone()).or_insert(kind);
        self.marks.insert(id, Mark::Visiting);
        for child in worker.children() {
            self.visit(
                &child,
                Some(Parent {
                    id,
                    name: &name,
                    kind,
                }),
            );
        }
        self.marks.insert(id, Mark::Done);
    }
}

/// Validate a tree, returning its hierarchy and every problem found.
pub fn validate_tree(root: &WorkerRef) -> (Hierarchy, Vec<ConstructionError>) {
    let mut walker = Walker::default();
    walker.visit(root, None);
    (walker.hierarchy, walker.errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::{Delegate, DelegateMode, Parallel, Sequence};
    use crate::context::InvocationContext;
    use crate::outcome::{Outcome, Payload};
    use crate::worker::{FnWorker, Worker};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{OnceLock, Weak};

    fn leaf(name: &str) -> WorkerRef {
        FnWorker::sync(name, |_, input| Ok(input)).into_ref()
    }

    #[test]
    fn test_valid_tree_hierarchy() {
        let a = leaf("a");
        let b = leaf("b");
        let fan = Parallel::new("fan", vec![a, b]).unwrap().into_ref();
        let root = Sequence::new("root", vec![leaf("first"), fan]).unwrap().into_ref();

        let (hierarchy, errors) = validate_tree(&root);
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(hierarchy.parent_of("a"), Some("fan"));
        assert_eq!(hierarchy.parent_of("fan"), Some("root"));
        assert_eq!(hierarchy.parent_of("root"), None);
        assert_eq!(hierarchy.kind_of("fan"), Some(WorkerKind::Parallel));
        assert_eq!(hierarchy.len(), 5);
    }

    #[test]
    fn test_duplicate_names_across_levels() {
        let inner = Sequence::new("inner", vec![leaf("step")]).unwrap().into_ref();
        let root = Sequence::new("root", vec![leaf("step"), inner]).unwrap().into_ref();

        let (_, errors) = validate_tree(&root);
        assert_eq!(
            errors,
            vec![ConstructionError::DuplicateName {
                name: "step".to_string()
            }]
        );
    }

    #[test]
    fn test_reused_handle_is_allowed() {
        let shared = leaf("shared");
        let first = Sequence::new("first", vec![Arc::clone(&shared)]).unwrap().into_ref();
        let second = Sequence::new("second", vec![shared]).unwrap().into_ref();
        let root = Sequence::new("root", vec![first, second]).unwrap().into_ref();

        let (_, errors) = validate_tree(&root);
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn test_child_attached_to_two_delegates() {
        let worker = leaf("researcher");
        let left = Delegate::new(
            "left",
            leaf("left_coordinator"),
            vec![Arc::clone(&worker)],
            DelegateMode::Single,
        )
        .unwrap()
        .into_ref();
        let right = Delegate::new(
            "right",
            leaf("right_coordinator"),
            vec![worker],
            DelegateMode::Single,
        )
        .unwrap()
        .into_ref();
        let root = Sequence::new("root", vec![left, right]).unwrap().into_ref();

        let (_, errors) = validate_tree(&root);
        assert_eq!(
            errors,
            vec![ConstructionError::MultipleParents {
                child: "researcher".to_string(),
                first: "left".to_string(),
                second: "right".to_string(),
            }]
        );
    }

    struct Recursive {
        me: OnceLock<Weak<Recursive>>,
    }

    #[async_trait]
    impl Worker for Recursive {
        fn name(&self) -> &str {
            "recursive"
        }

        fn kind(&self) -> WorkerKind {
            WorkerKind::Sequence
        }

        fn children(&self) -> Vec<WorkerRef> {
            self.me
                .get()
                .and_then(Weak::upgrade)
                .map(|me| vec![me as WorkerRef])
                .unwrap_or_default()
        }

        async fn invoke(&self, _ctx: &InvocationContext, _input: Payload) -> Outcome {
            Outcome::success("recursive", json!(null))
        }
    }

    #[test]
    fn test_cycle_detected() {
        let worker = Arc::new(Recursive {
            me: OnceLock::new(),
        });
        let _ = worker.me.set(Arc::downgrade(&worker));
        let root: WorkerRef = worker;

        let (_, errors) = validate_tree(&root);
        assert_eq!(
            errors,
            vec![ConstructionError::Cycle {
                name: "recursive".to_string()
            }]
        );
    }
}
