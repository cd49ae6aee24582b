//! Control-flow combinators
//!
//! Each combinator is itself a [`Worker`](crate::Worker) built from child
//! workers, so trees of any depth compose from the same pieces.

mod branch;
mod delegate;
mod loop_node;
mod parallel;
mod retry;
mod sequence;
mod timeout;

pub use branch::{Branch, BranchBuilder};
pub use delegate::{Delegate, DelegateMode};
pub use loop_node::{Loop, LoopBuilder};
pub use parallel::Parallel;
pub use retry::Retry;
pub use sequence::Sequence;
pub use timeout::Timeout;

pub(crate) use parallel::fan_out;
pub(crate) use sequence::run_chain;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::ConstructionError;
use crate::worker::WorkerRef;

/// Reject empty names and distinct siblings sharing a name.
///
/// The same worker handle may appear twice; that is reuse, not a clash.
pub(crate) fn ensure_unique_names(
    owner: &str,
    children: &[&WorkerRef],
) -> Result<(), ConstructionError> {
    if owner.is_empty() {
        return Err(ConstructionError::EmptyName);
    }
    let mut seen: BTreeMap<&str, &WorkerRef> = BTreeMap::new();
    for &child in children {
        let name = child.name();
        if name.is_empty() {
            return Err(ConstructionError::EmptyName);
        }
        if name == owner {
            return Err(ConstructionError::DuplicateName {
                name: name.to_string(),
            });
        }
        match seen.get(name) {
            Some(existing) if !Arc::ptr_eq(*existing, child) => {
                return Err(ConstructionError::DuplicateName {
                    name: name.to_string(),
                });
            }
            _ => {
                seen.insert(name, child);
            }
        }
    }
    Ok(())
}

/// Union of the declared writes of `children`
pub(crate) fn union_writes<'a>(children: impl IntoIterator<Item = &'a WorkerRef>) -> BTreeSet<String> {
    children.into_iter().flat_map(|c| c.writes()).collect()
}

/// Union of the declared reads of `children`
pub(crate) fn union_reads<'a>(children: impl IntoIterator<Item = &'a WorkerRef>) -> BTreeSet<String> {
    children.into_iter().flat_map(|c| c.reads()).collect()
}
