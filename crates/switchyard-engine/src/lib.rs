//! Switchyard Engine - composable task orchestration
//!
//! This crate coordinates autonomous workers (LLM-backed agents, tool
//! calls, or any async computation) through a run-scoped shared state and
//! a small set of control-flow combinators:
//!
//! - `Sequence`: children in order, payloads threaded, short-circuit on
//!   the first non-success
//! - `Parallel`: children concurrently on state forks, join barrier,
//!   write conflicts reported as `StateConflict`
//! - `Branch`: a selector's label picks exactly one child
//! - `Loop`: body plus terminator, bounded by `max_iterations`
//! - `Delegate`: a coordinator picks named children to dispatch to
//! - `Retry` and `Timeout`: explicit retry and deadline wrappers
//!
//! # Architecture
//!
//! Everything is a [`Worker`]. Combinators are workers built from child
//! workers, and an [`Orchestrator`] validates a tree once and runs it:
//!
//! - `SharedState`: one lock per store, forks for concurrent children
//! - `InvocationContext::invoke`: the guarded invoke (panics become
//!   failures, cancelled leaves are dropped)
//! - `EventLog`: ordered record of every outcome and routing decision,
//!   forwarded to an `EventSink`
//!
//! # Example
//!
//! ```ignore
//! use switchyard_engine::{FnWorker, Orchestrator, Sequence};
//!
//! let root = Sequence::new("chain", vec![extract, transform])?.into_ref();
//! let report = Orchestrator::new(root)?.run(serde_json::json!("input")).await;
//! assert!(report.is_success());
//! ```

pub mod combinators;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod outcome;
pub mod state;
pub mod validation;
pub mod worker;

// Re-export key types
pub use combinators::{
    Branch, BranchBuilder, Delegate, DelegateMode, Loop, LoopBuilder, Parallel, Retry, Sequence,
    Timeout,
};
pub use config::{ConfigError, EngineConfig};
pub use context::InvocationContext;
pub use error::{ConstructionError, EngineError, ErrorKind, Result, WorkerError};
pub use events::{
    ChannelEventSink, EventError, EventLog, EventRecord, EventSink, NullEventSink, RunEvent,
    VecEventSink,
};
pub use orchestrator::{CancelReason, Orchestrator, RunOptions, RunReport};
pub use outcome::{Annotation, Outcome, OutcomeStatus, Payload};
pub use state::{SharedState, StateError, StateSnapshot, StateValue};
pub use validation::{validate_tree, Hierarchy};
pub use worker::{with_output_key, Condition, FnWorker, WithOutputKey, Worker, WorkerKind, WorkerRef};

// Re-export the cancellation token consumers pass to `RunOptions`
pub use tokio_util::sync::CancellationToken;
