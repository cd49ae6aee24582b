//! Tool-calling agent
//!
//! [`ToolAgent`] alternates between the model and its tools: each turn the
//! model either answers in text (the agent succeeds) or asks for tool
//! calls, whose results are appended to the conversation as tool
//! messages. Tool errors are fed back to the model rather than failing the
//! agent, so it can recover or explain.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use switchyard_engine::{InvocationContext, Outcome, Payload, Worker, WorkerError, WorkerRef};

use crate::llm::{ChatMessage, ChatRequest, LlmClient, ToolCall};
use crate::template;
use crate::tool::{self, ToolError, ToolRef};

/// Turn bound when none is configured
pub const DEFAULT_MAX_TURNS: u32 = 5;

pub struct ToolAgent {
    name: String,
    client: Arc<dyn LlmClient>,
    instruction: String,
    tools: Vec<ToolRef>,
    max_turns: u32,
    output_key: Option<String>,
}

enum Turn {
    Answered(Payload),
    OutOfTurns(Payload),
}

impl ToolAgent {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn LlmClient>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            instruction: instruction.into(),
            tools: Vec::new(),
            max_turns: DEFAULT_MAX_TURNS,
            output_key: None,
        }
    }

    pub fn with_tool(mut self, tool: ToolRef) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = ToolRef>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Bound on model calls per invocation
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn into_ref(self) -> WorkerRef {
        Arc::new(self)
    }

    fn find_tool(&self, name: &str) -> Option<&ToolRef> {
        self.tools.iter().find(|t| t.definition().name == name)
    }

    async fn call_tool(&self, ctx: &InvocationContext, call: &ToolCall) -> ChatMessage {
        let result = match self.find_tool(&call.name) {
            Some(tool) => tool.call(ctx, call.arguments.clone()).await,
            None => Err(ToolError::UnknownTool(call.name.clone())),
        };
        let content = match result {
            Ok(Value::String(text)) => text,
            Ok(value) => value.to_string(),
            Err(err) => {
                log::warn!("ToolAgent '{}': tool '{}' failed: {}", self.name, call.name, err);
                format!("Error: {}", err)
            }
        };
        ChatMessage::tool(call.id.clone(), content)
    }

    async fn converse(&self, ctx: &InvocationContext, input: &Payload) -> Result<Turn, WorkerError> {
        let system = template::render(&self.instruction, ctx.state())?;
        let mut messages = vec![ChatMessage::system(system)];
        match input {
            Value::Null => {}
            Value::String(text) => messages.push(ChatMessage::user(text.clone())),
            other => messages.push(ChatMessage::user(other.to_string())),
        }
        let definitions = tool::definitions(&self.tools);
        let mut last = Payload::Null;

        for turn in 1..=self.max_turns {
            if ctx.is_cancelled() {
                break;
            }
            let request = ChatRequest::new(messages.clone()).with_tools(definitions.clone());
            let response = self.client.complete(request).await?;

            if response.tool_calls.is_empty() {
                log::debug!("ToolAgent '{}' answered on turn {}", self.name, turn);
                return Ok(Turn::Answered(Value::String(response.content.trim().to_string())));
            }

            log::debug!(
                "ToolAgent '{}' turn {}: {} tool call(s)",
                self.name,
                turn,
                response.tool_calls.len()
            );
            messages.push(response.to_message());
            for call in &response.tool_calls {
                let reply = self.call_tool(ctx, call).await;
                last = Value::String(reply.content.clone());
                messages.push(reply);
            }
        }
        Ok(Turn::OutOfTurns(last))
    }
}

#[async_trait]
impl Worker for ToolAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn reads(&self) -> BTreeSet<String> {
        template::placeholders(&self.instruction)
    }

    fn writes(&self) -> BTreeSet<String> {
        let mut writes: BTreeSet<String> = self.output_key.iter().cloned().collect();
        for worker in self.children() {
            writes.extend(worker.writes());
        }
        writes
    }

    fn children(&self) -> Vec<WorkerRef> {
        self.tools.iter().filter_map(|t| t.worker()).collect()
    }

    async fn invoke(&self, ctx: &InvocationContext, input: Payload) -> Outcome {
        match self.converse(ctx, &input).await {
            Ok(Turn::Answered(answer)) => {
                if let Some(key) = &self.output_key {
                    if let Err(err) = ctx.state().set_json(key.clone(), answer.clone()) {
                        return Outcome::failure(&self.name, err.into());
                    }
                }
                Outcome::success(&self.name, answer)
            }
            Ok(Turn::OutOfTurns(_)) if ctx.is_cancelled() => Outcome::cancelled(&self.name),
            Ok(Turn::OutOfTurns(last)) => {
                log::warn!(
                    "ToolAgent '{}' ran out of turns ({}) with tools {:?}",
                    self.name,
                    self.max_turns,
                    tool::names(&self.tools)
                );
                Outcome::exhausted(&self.name, last)
            }
            Err(err) => {
                log::warn!("ToolAgent '{}' failed: {}", self.name, err);
                Outcome::failure(&self.name, err)
            }
        }
    }
}
