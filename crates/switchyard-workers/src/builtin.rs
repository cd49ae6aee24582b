//! Small structural workers

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchyard_engine::{InvocationContext, Outcome, Payload, Worker, WorkerError, WorkerRef};

/// Returns its input unchanged
pub struct Passthrough {
    name: String,
}

impl Passthrough {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn into_ref(self) -> WorkerRef {
        Arc::new(self)
    }
}

#[async_trait]
impl Worker for Passthrough {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _ctx: &InvocationContext, input: Payload) -> Outcome {
        Outcome::success(&self.name, input)
    }
}

/// Adds state values to a record input.
///
/// Each `(field, key)` pair copies state `key` into `field` of the output
/// record. A non-record input is wrapped as `{"input": ...}` first. Every
/// key is required; a missing one fails the worker.
pub struct Assign {
    name: String,
    fields: Vec<(String, String)>,
}

impl Assign {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Copy state `key` into `field`
    pub fn field(mut self, field: impl Into<String>, key: impl Into<String>) -> Self {
        self.fields.push((field.into(), key.into()));
        self
    }

    /// Copy state `key` into a field of the same name
    pub fn key(self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.field(key.clone(), key)
    }

    pub fn into_ref(self) -> WorkerRef {
        Arc::new(self)
    }

    fn assign(&self, ctx: &InvocationContext, input: Payload) -> Result<Payload, WorkerError> {
        let mut record = match input {
            Value::Object(fields) => fields,
            other => {
                let mut wrapped = Map::new();
                wrapped.insert("input".to_string(), other);
                wrapped
            }
        };
        for (field, key) in &self.fields {
            let value = ctx.state().require(key)?;
            record.insert(field.clone(), value.to_json());
        }
        Ok(Value::Object(record))
    }
}

#[async_trait]
impl Worker for Assign {
    fn name(&self) -> &str {
        &self.name
    }

    fn reads(&self) -> BTreeSet<String> {
        self.fields.iter().map(|(_, key)| key.clone()).collect()
    }

    async fn invoke(&self, ctx: &InvocationContext, input: Payload) -> Outcome {
        match self.assign(ctx, input) {
            Ok(payload) => Outcome::success(&self.name, payload),
            Err(err) => Outcome::failure(&self.name, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchyard_engine::{ErrorKind, SharedState};

    #[tokio::test]
    async fn test_passthrough() {
        let ctx = InvocationContext::for_state(SharedState::new());
        let worker = Passthrough::new("topic").into_ref();
        let outcome = ctx.invoke(&worker, json!({"topic": "tides"})).await;
        assert_eq!(outcome.payload(), &json!({"topic": "tides"}));
    }

    #[tokio::test]
    async fn test_assign_merges_state() {
        let state = SharedState::new();
        state.set("summary", "Short.");
        state.set("count", 3);
        let ctx = InvocationContext::for_state(state);
        let worker = Assign::new("assemble")
            .key("summary")
            .field("question_count", "count")
            .into_ref();

        assert_eq!(worker.reads().len(), 2);
        let outcome = ctx.invoke(&worker, json!({"topic": "tides"})).await;
        assert_eq!(
            outcome.payload(),
            &json!({"topic": "tides", "summary": "Short.", "question_count": 3})
        );

        let outcome = ctx.invoke(&worker, json!("tides")).await;
        assert_eq!(outcome.payload()["input"], json!("tides"));
    }

    #[tokio::test]
    async fn test_assign_missing_key() {
        let ctx = InvocationContext::for_state(SharedState::new());
        let worker = Assign::new("assemble").key("summary").into_ref();
        let outcome = ctx.invoke(&worker, json!({})).await;
        assert_eq!(outcome.error().map(|e| e.kind), Some(ErrorKind::MissingState));
    }
}
