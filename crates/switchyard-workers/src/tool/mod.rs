//! Tool adapter
//!
//! A [`Tool`] is a callable capability an agent can use: it takes JSON
//! arguments and returns a JSON value or a typed [`ToolError`]. Tools run
//! inside a worker invocation and may use its context.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use switchyard_engine::{
    ErrorKind, InvocationContext, Outcome, Payload, SharedState, Worker, WorkerError, WorkerRef,
};
use thiserror::Error;

use crate::llm::ToolDefinition;

/// Shared handle to a tool
pub type ToolRef = Arc<dyn Tool>;

/// Errors a tool can report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// The lookup ran but found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// The arguments did not match the tool's schema
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// No tool with this name is available
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    /// The tool ran and failed
    #[error("Tool failed: {0}")]
    Failed(String),
}

impl From<ToolError> for WorkerError {
    fn from(err: ToolError) -> Self {
        let kind = match err {
            ToolError::InvalidArguments(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::Tool,
        };
        WorkerError::new(kind, err.to_string())
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description and argument schema offered to the model
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, ctx: &InvocationContext, arguments: Value) -> Result<Value, ToolError>;

    /// The worker behind this tool, if it wraps one
    fn worker(&self) -> Option<WorkerRef> {
        None
    }
}

type ToolFn = dyn Fn(&SharedState, Value) -> Result<Value, ToolError> + Send + Sync;

/// A tool backed by a synchronous closure over the shared state
pub struct FnTool {
    definition: ToolDefinition,
    handler: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(&SharedState, Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        Self {
            definition: ToolDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
            handler: Box::new(handler),
        }
    }

    pub fn into_ref(self) -> ToolRef {
        Arc::new(self)
    }
}

#[async_trait]
impl Tool for FnTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn call(&self, ctx: &InvocationContext, arguments: Value) -> Result<Value, ToolError> {
        (self.handler)(ctx.state(), arguments)
    }
}

/// Read a required string argument
pub fn string_argument(arguments: &Value, name: &str) -> Result<String, ToolError> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing string argument '{}'", name)))
}

/// A leaf worker that calls one tool with its input as the arguments
pub struct ToolWorker {
    name: String,
    tool: ToolRef,
}

impl ToolWorker {
    pub fn new(name: impl Into<String>, tool: ToolRef) -> Self {
        Self {
            name: name.into(),
            tool,
        }
    }

    pub fn into_ref(self) -> WorkerRef {
        Arc::new(self)
    }
}

#[async_trait]
impl Worker for ToolWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn children(&self) -> Vec<WorkerRef> {
        self.tool.worker().into_iter().collect()
    }

    async fn invoke(&self, ctx: &InvocationContext, input: Payload) -> Outcome {
        match self.tool.call(ctx, input).await {
            Ok(value) => Outcome::success(&self.name, value),
            Err(err) => {
                log::warn!(
                    "Tool '{}' failed in '{}': {}",
                    self.tool.definition().name,
                    self.name,
                    err
                );
                Outcome::failure(&self.name, err.into())
            }
        }
    }
}

/// Exposes a worker as a tool another agent can call.
///
/// The tool takes `{"request": ...}`; the request (or the whole argument
/// object when `request` is absent) becomes the worker's input. A
/// non-success outcome is reported as [`ToolError::Failed`].
pub struct AgentTool {
    worker: WorkerRef,
    description: String,
}

impl AgentTool {
    pub fn new(worker: WorkerRef, description: impl Into<String>) -> Self {
        Self {
            worker,
            description: description.into(),
        }
    }

    /// Describe the tool with the worker's own description
    pub fn from_worker(worker: WorkerRef) -> Self {
        let description = worker
            .description()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Hands the request to '{}'", worker.name()));
        Self {
            worker,
            description,
        }
    }

    pub fn into_ref(self) -> ToolRef {
        Arc::new(self)
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.worker.name().to_string(),
            description: self.description.clone(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "request": {"type": "string", "description": "What the agent should do"}
                },
                "required": ["request"]
            }),
        }
    }

    async fn call(&self, ctx: &InvocationContext, arguments: Value) -> Result<Value, ToolError> {
        let input = match arguments {
            Value::Object(mut fields) if fields.contains_key("request") => {
                fields.remove("request").unwrap_or_default()
            }
            other => other,
        };
        let outcome = ctx.invoke(&self.worker, input).await;
        if outcome.is_success() {
            return Ok(outcome.into_payload());
        }
        let reason = outcome
            .error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| outcome.status().to_string());
        Err(ToolError::Failed(format!("{}: {}", self.worker.name(), reason)))
    }

    fn worker(&self) -> Option<WorkerRef> {
        Some(Arc::clone(&self.worker))
    }
}

/// Tool definitions offered by a tool set
pub(crate) fn definitions(tools: &[ToolRef]) -> Vec<ToolDefinition> {
    tools.iter().map(|t| t.definition()).collect()
}

/// Names of the tool definitions, for logging
pub(crate) fn names(tools: &[ToolRef]) -> BTreeSet<String> {
    tools.iter().map(|t| t.definition().name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_engine::{FnWorker, OutcomeStatus};

    fn lookup() -> ToolRef {
        FnTool::new(
            "search_information",
            "Provides factual information on a given topic.",
            json!({"type": "object", "properties": {"query": {"type": "string"}}}),
            |_, arguments| {
                let query = string_argument(&arguments, "query")?;
                match query.to_lowercase().as_str() {
                    "capital of france" => Ok(json!("The capital of France is Paris.")),
                    _ => Err(ToolError::NotFound(query)),
                }
            },
        )
        .into_ref()
    }

    #[tokio::test]
    async fn test_fn_tool() {
        let ctx = InvocationContext::for_state(SharedState::new());
        let tool = lookup();

        let found = tool.call(&ctx, json!({"query": "Capital of France"})).await;
        assert_eq!(found, Ok(json!("The capital of France is Paris.")));

        let missing = tool.call(&ctx, json!({"query": "Atlantis"})).await;
        assert_eq!(missing, Err(ToolError::NotFound("Atlantis".to_string())));

        let invalid = tool.call(&ctx, json!({})).await;
        assert!(matches!(invalid, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn test_tool_worker() {
        let ctx = InvocationContext::for_state(SharedState::new());
        let worker = ToolWorker::new("search", lookup()).into_ref();

        let outcome = ctx.invoke(&worker, json!({"query": "capital of france"})).await;
        assert!(outcome.is_success());

        let outcome = ctx.invoke(&worker, json!({"query": 1})).await;
        assert_eq!(outcome.status(), OutcomeStatus::Failure);
        assert_eq!(outcome.error().map(|e| e.kind), Some(ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn test_agent_tool() {
        let ctx = InvocationContext::for_state(SharedState::new());
        let summarizer = FnWorker::sync("summarizer", |_, input| {
            Ok(json!(format!("summary of {}", input.as_str().unwrap_or_default())))
        })
        .into_ref();
        let tool = AgentTool::new(summarizer, "Summarizes text");

        assert_eq!(tool.definition().name, "summarizer");
        assert!(tool.worker().is_some());
        let result = tool.call(&ctx, json!({"request": "the report"})).await;
        assert_eq!(result, Ok(json!("summary of the report")));
        // The wrapped worker's outcome is part of the run's log
        assert_eq!(ctx.events().outcomes_for("summarizer").len(), 1);
    }

    #[test]
    fn test_agent_tool_uses_worker_description() {
        use crate::llm::mock::FnClient;
        use crate::llm::{ChatResponse, LlmWorker};

        let client = FnClient::new(|_| Ok(ChatResponse::text("unused")));
        let writer = LlmWorker::new("draft_writer", client, "Write a paragraph.")
            .with_description("Generates initial draft content on a given subject.")
            .with_output_key("draft_text")
            .into_ref();
        let tool = AgentTool::from_worker(writer);
        assert_eq!(
            tool.definition().description,
            "Generates initial draft content on a given subject."
        );

        let plain = FnWorker::sync("echo", |_, input| Ok(input)).into_ref();
        assert_eq!(
            AgentTool::from_worker(plain).definition().description,
            "Hands the request to 'echo'"
        );
    }

    #[tokio::test]
    async fn test_agent_tool_failure() {
        let ctx = InvocationContext::for_state(SharedState::new());
        let broken = FnWorker::sync("broken", |_, _| Err(WorkerError::upstream("offline"))).into_ref();
        let tool = AgentTool::new(broken, "Always fails");

        let result = tool.call(&ctx, json!({"request": "x"})).await;
        assert!(matches!(result, Err(ToolError::Failed(message)) if message.contains("offline")));
    }
}
