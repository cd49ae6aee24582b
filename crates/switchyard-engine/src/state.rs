//! Run-scoped shared state.
//!
//! A [`SharedState`] is created when a run starts and dropped when it ends.
//! Every worker in the run reads and writes through it. Values are limited
//! to a closed set of serializable types ([`StateValue`]).
//!
//! Sequential combinators hand the same state to each child in turn, so a
//! completed write is visible to every later step. Parallel combinators
//! give each child a [`fork`](SharedState::fork): the fork reads the
//! parent's view as it was when the fork was taken plus the fork's own
//! writes, and the forks are folded back into the parent at the join
//! barrier with [`merge`](SharedState::merge). A key written by more than
//! one fork is reported as a conflict instead of silently keeping one
//! of the writes.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by state access
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    /// A required key was absent
    #[error("Required state key '{0}' is absent")]
    Missing(String),

    /// The key holds a value of another type
    #[error("State key '{key}' holds {found}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The value cannot be represented in shared state (null, NaN, ...)
    #[error("Value cannot be stored in shared state: {0}")]
    Unsupported(String),

    /// Concurrent siblings wrote the same key
    #[error("State key '{key}' was written concurrently by {writers:?}")]
    Conflict { key: String, writers: Vec<String> },
}

/// A value stored in shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Boolean(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<StateValue>),
    Record(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Build a number value; `None` for NaN and infinities
    pub fn from_f64(value: f64) -> Option<Self> {
        serde_json::Number::from_f64(value).map(StateValue::Number)
    }

    /// Human-readable type name
    pub fn type_name(&self) -> &'static str {
        match self {
            StateValue::Boolean(_) => "boolean",
            StateValue::Number(_) => "number",
            StateValue::Text(_) => "text",
            StateValue::List(_) => "list",
            StateValue::Record(_) => "record",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StateValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[StateValue]> {
        match self {
            StateValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&BTreeMap<String, StateValue>> {
        match self {
            StateValue::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Convert to a JSON value
    pub fn to_json(&self) -> Value {
        Value::from(self.clone())
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Boolean(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Number(value.into())
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        StateValue::Number(value.into())
    }
}

impl From<u32> for StateValue {
    fn from(value: u32) -> Self {
        StateValue::Number(value.into())
    }
}

impl From<u64> for StateValue {
    fn from(value: u64) -> Self {
        StateValue::Number(value.into())
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Text(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Text(value)
    }
}

impl From<Vec<StateValue>> for StateValue {
    fn from(value: Vec<StateValue>) -> Self {
        StateValue::List(value)
    }
}

impl From<BTreeMap<String, StateValue>> for StateValue {
    fn from(value: BTreeMap<String, StateValue>) -> Self {
        StateValue::Record(value)
    }
}

impl TryFrom<Value> for StateValue {
    type Error = StateError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Err(StateError::Unsupported("null".to_string())),
            Value::Bool(b) => Ok(StateValue::Boolean(b)),
            Value::Number(n) => Ok(StateValue::Number(n)),
            Value::String(s) => Ok(StateValue::Text(s)),
            Value::Array(items) => items
                .into_iter()
                .map(StateValue::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(StateValue::List),
            Value::Object(fields) => fields
                .into_iter()
                .map(|(k, v)| StateValue::try_from(v).map(|v| (k, v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(StateValue::Record),
        }
    }
}

impl From<StateValue> for Value {
    fn from(value: StateValue) -> Self {
        match value {
            StateValue::Boolean(b) => Value::Bool(b),
            StateValue::Number(n) => Value::Number(n),
            StateValue::Text(s) => Value::String(s),
            StateValue::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            StateValue::Record(fields) => {
                Value::Object(fields.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Immutable copy of a state's contents, handed to the caller at run end.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSnapshot(BTreeMap<String, StateValue>);

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StateValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Render the snapshot as a JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    pub fn into_inner(self) -> BTreeMap<String, StateValue> {
        self.0
    }
}

impl FromIterator<(String, StateValue)> for StateSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, StateValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One layer of state. `None` in `entries` marks a key removed by a fork.
#[derive(Default)]
struct StateFrame {
    /// Frozen parent view (forks only)
    base: Option<Arc<BTreeMap<String, StateValue>>>,
    /// Writes made through this handle
    entries: Mutex<BTreeMap<String, Option<StateValue>>>,
    /// Name of the worker that owns this fork
    owner: Option<String>,
}

/// Concurrency-safe key/value store scoped to one run.
///
/// Cloning a `SharedState` yields another handle to the same store.
/// A single lock guards each store.
#[derive(Clone, Default)]
pub struct SharedState {
    frame: Arc<StateFrame>,
}

impl SharedState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state seeded with the given contents
    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        let entries = snapshot
            .into_inner()
            .into_iter()
            .map(|(k, v)| (k, Some(v)))
            .collect();
        Self {
            frame: Arc::new(StateFrame {
                base: None,
                entries: Mutex::new(entries),
                owner: None,
            }),
        }
    }

    /// Read a key. Absence is reported as `None`, never as a default value.
    pub fn get(&self, key: &str) -> Option<StateValue> {
        let entries = self.frame.entries.lock();
        match entries.get(key) {
            Some(slot) => slot.clone(),
            None => self.frame.base.as_ref().and_then(|b| b.get(key).cloned()),
        }
    }

    /// Read a key that must be present
    pub fn require(&self, key: &str) -> Result<StateValue, StateError> {
        self.get(key)
            .ok_or_else(|| StateError::Missing(key.to_string()))
    }

    /// Read a key that must hold text
    pub fn require_text(&self, key: &str) -> Result<String, StateError> {
        match self.require(key)? {
            StateValue::Text(s) => Ok(s),
            other => Err(StateError::TypeMismatch {
                key: key.to_string(),
                expected: "text",
                found: other.type_name(),
            }),
        }
    }

    /// Read a key as JSON
    pub fn get_json(&self, key: &str) -> Option<Value> {
        self.get(key).map(Value::from)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Write a key, overwriting any previous value
    pub fn set(&self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.frame
            .entries
            .lock()
            .insert(key.into(), Some(value.into()));
    }

    /// Write a JSON value; fails for values outside the supported set
    pub fn set_json(&self, key: impl Into<String>, value: Value) -> Result<(), StateError> {
        let value = StateValue::try_from(value)?;
        self.set(key, value);
        Ok(())
    }

    /// Read-modify-write a key under the state lock
    pub fn update<F>(&self, key: impl Into<String>, f: F) -> StateValue
    where
        F: FnOnce(Option<&StateValue>) -> StateValue,
    {
        let key = key.into();
        let mut entries = self.frame.entries.lock();
        let current = match entries.get(&key) {
            Some(slot) => slot.clone(),
            None => self.frame.base.as_ref().and_then(|b| b.get(&key).cloned()),
        };
        let next = f(current.as_ref());
        entries.insert(key, Some(next.clone()));
        next
    }

    /// Remove a key, returning its previous value
    pub fn remove(&self, key: &str) -> Option<StateValue> {
        let previous = self.get(key);
        let mut entries = self.frame.entries.lock();
        if self.frame.base.is_some() {
            entries.insert(key.to_string(), None);
        } else {
            entries.remove(key);
        }
        previous
    }

    /// All keys currently visible
    pub fn keys(&self) -> Vec<String> {
        self.snapshot().into_inner().into_keys().collect()
    }

    /// Immutable copy of everything currently visible
    pub fn snapshot(&self) -> StateSnapshot {
        let entries = self.frame.entries.lock();
        let mut view = self
            .frame
            .base
            .as_ref()
            .map(|b| b.as_ref().clone())
            .unwrap_or_default();
        for (key, slot) in entries.iter() {
            match slot {
                Some(value) => {
                    view.insert(key.clone(), value.clone());
                }
                None => {
                    view.remove(key);
                }
            }
        }
        StateSnapshot(view)
    }

    /// Create a fork owned by `owner`.
    ///
    /// The fork sees this state's contents as of now plus its own writes.
    /// Writes to the fork are invisible here until [`merge`](Self::merge).
    pub fn fork(&self, owner: impl Into<String>) -> SharedState {
        let base = self.snapshot().into_inner();
        SharedState {
            frame: Arc::new(StateFrame {
                base: Some(Arc::new(base)),
                entries: Mutex::new(BTreeMap::new()),
                owner: Some(owner.into()),
            }),
        }
    }

    /// Name of the worker owning this fork, if this is a fork
    pub fn owner(&self) -> Option<&str> {
        self.frame.owner.as_deref()
    }

    /// Keys written (or removed) through this handle
    pub fn written_keys(&self) -> Vec<String> {
        self.frame.entries.lock().keys().cloned().collect()
    }

    /// Fold forks back into this state.
    ///
    /// Fails without applying anything if any key was written by more than
    /// one fork. The reported key is the smallest conflicting key, so the
    /// result does not depend on the order the forks finished in.
    /// Returns the number of keys applied.
    pub fn merge(&self, forks: &[SharedState]) -> Result<usize, StateError> {
        let mut writers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut writes = Vec::with_capacity(forks.len());
        for (index, fork) in forks.iter().enumerate() {
            let owner = fork
                .owner()
                .map(str::to_string)
                .unwrap_or_else(|| format!("fork-{}", index));
            let entries = fork.frame.entries.lock().clone();
            for key in entries.keys() {
                writers.entry(key.clone()).or_default().push(owner.clone());
            }
            writes.push(entries);
        }

        if let Some((key, owners)) = writers.into_iter().find(|(_, w)| w.len() > 1) {
            return Err(StateError::Conflict {
                key,
                writers: owners,
            });
        }

        let mut applied = 0;
        for entries in writes {
            for (key, slot) in entries {
                match slot {
                    Some(value) => {
                        self.set(key, value);
                    }
                    None => {
                        self.remove(&key);
                    }
                }
                applied += 1;
            }
        }
        Ok(applied)
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState")
            .field("owner", &self.frame.owner)
            .field("contents", &self.snapshot())
            .finish()
    }
}
