//! Template-driven LLM leaf worker

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchyard_engine::{InvocationContext, Outcome, Payload, Worker, WorkerError, WorkerRef};

use super::{ChatMessage, ChatRequest, LlmClient};
use crate::template;

/// How the model's reply becomes the worker's payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// The trimmed reply text
    #[default]
    Text,
    /// The reply parsed as JSON (code fences are stripped)
    Json,
}

/// Sends a templated instruction plus the input to an LLM.
///
/// The instruction becomes the system message after `{key}` placeholders
/// are filled from shared state; a missing key fails the worker before
/// any request is made. The input payload becomes the user message unless
/// a prompt template is set, in which case the rendered prompt is sent
/// instead.
pub struct LlmWorker {
    name: String,
    description: Option<String>,
    client: Arc<dyn LlmClient>,
    instruction: String,
    prompt: Option<String>,
    output_key: Option<String>,
    format: OutputFormat,
}

impl LlmWorker {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn LlmClient>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            client,
            instruction: instruction.into(),
            prompt: None,
            output_key: None,
            format: OutputFormat::Text,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Send a templated user message instead of the input
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Also write the success payload to `key`
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn into_ref(self) -> WorkerRef {
        Arc::new(self)
    }

    async fn respond(&self, ctx: &InvocationContext, input: &Payload) -> Result<Payload, WorkerError> {
        let system = template::render(&self.instruction, ctx.state())?;

        let mut messages = vec![ChatMessage::system(system)];
        match (&self.prompt, input) {
            (Some(prompt), _) => {
                messages.push(ChatMessage::user(template::render(prompt, ctx.state())?))
            }
            (None, Value::Null) => {}
            (None, Value::String(text)) => messages.push(ChatMessage::user(text.clone())),
            (None, other) => messages.push(ChatMessage::user(other.to_string())),
        }
        let request =
            ChatRequest::new(messages).with_json_mode(self.format == OutputFormat::Json);

        let response = self.client.complete(request).await?;
        log::debug!("LlmWorker '{}': {} chars", self.name, response.content.len());

        let payload = match self.format {
            OutputFormat::Text => Value::String(response.content.trim().to_string()),
            OutputFormat::Json => parse_json_reply(&response.content)?,
        };

        if let Some(key) = &self.output_key {
            ctx.state().set_json(key.clone(), payload.clone())?;
        }
        Ok(payload)
    }
}

/// Parse a reply that should be JSON, tolerating a Markdown code fence
pub fn parse_json_reply(reply: &str) -> Result<Value, WorkerError> {
    let trimmed = reply.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(fenced) => {
            let after_tag = fenced.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
            after_tag.trim_end().trim_end_matches("```")
        }
        None => trimmed,
    };
    serde_json::from_str(body.trim()).map_err(|e| {
        WorkerError::new(
            switchyard_engine::ErrorKind::InvalidOutput,
            format!("expected a JSON reply: {}", e),
        )
    })
}

#[async_trait]
impl Worker for LlmWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn reads(&self) -> BTreeSet<String> {
        let mut reads = template::placeholders(&self.instruction);
        if let Some(prompt) = &self.prompt {
            reads.extend(template::placeholders(prompt));
        }
        reads
    }

    fn writes(&self) -> BTreeSet<String> {
        self.output_key.iter().cloned().collect()
    }

    async fn invoke(&self, ctx: &InvocationContext, input: Payload) -> Outcome {
        match self.respond(ctx, &input).await {
            Ok(payload) => Outcome::success(&self.name, payload),
            Err(err) => {
                log::warn!("LlmWorker '{}' failed: {}", self.name, err);
                Outcome::failure(&self.name, err)
            }
        }
    }
}
