//! LLM adapter
//!
//! Model invocation is an external collaborator. Workers talk to it only
//! through the [`LlmClient`] trait; [`OpenAiCompatClient`] implements it
//! over any OpenAI-compatible `/v1/chat/completions` endpoint.

mod openai;
mod worker;

#[cfg(test)]
pub(crate) mod mock;

pub use openai::{build_request_body, parse_response, LlmConfig, OpenAiCompatClient};
pub use worker::{parse_json_reply, LlmWorker, OutputFormat};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use switchyard_engine::{ErrorKind, WorkerError};
use thiserror::Error;

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message of a chat conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Tool calls requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The call a tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Answer to the tool call `call_id`
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// A tool definition offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments
    pub parameters: serde_json::Value,
}

/// A tool call made by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID for response matching
    pub id: String,
    pub name: String,
    /// Arguments as JSON
    pub arguments: serde_json::Value,
}

/// A chat completion request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    /// Ask the model for a JSON object
    #[serde(default)]
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    /// Content of the system message, if any
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Content of the last user message, if any
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// A chat completion response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: String::new(),
            tool_calls,
        }
    }

    /// The assistant message to append to the conversation
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            tool_calls: self.tool_calls.clone(),
            ..ChatMessage::assistant(self.content.clone())
        }
    }
}

/// Errors raised by LLM clients
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Provider rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("LLM API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl From<LlmError> for WorkerError {
    fn from(err: LlmError) -> Self {
        let kind = match err {
            LlmError::RateLimited(_) => ErrorKind::RateLimited,
            LlmError::Unauthorized(_) => ErrorKind::Unauthorized,
            LlmError::Timeout => ErrorKind::Timeout,
            LlmError::Http(_) | LlmError::Api { .. } => ErrorKind::Upstream,
            LlmError::MalformedResponse(_) => ErrorKind::InvalidOutput,
        };
        WorkerError::new(kind, err.to_string())
    }
}

/// A chat-completion backend
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let cases = [
            (LlmError::RateLimited("slow down".into()), ErrorKind::RateLimited),
            (LlmError::Unauthorized("bad key".into()), ErrorKind::Unauthorized),
            (LlmError::Timeout, ErrorKind::Timeout),
            (LlmError::Http("connection reset".into()), ErrorKind::Upstream),
            (
                LlmError::Api {
                    status: 500,
                    body: "oops".into(),
                },
                ErrorKind::Upstream,
            ),
            (LlmError::MalformedResponse("no choices".into()), ErrorKind::InvalidOutput),
        ];
        for (err, kind) in cases {
            let worker_error: WorkerError = err.into();
            assert_eq!(worker_error.kind, kind);
        }
    }

    #[test]
    fn test_request_accessors() {
        let request = ChatRequest::new(vec![
            ChatMessage::system("You are terse."),
            ChatMessage::user("first"),
            ChatMessage::assistant("ok"),
            ChatMessage::user("second"),
        ]);
        assert_eq!(request.system_prompt(), Some("You are terse."));
        assert_eq!(request.last_user_message(), Some("second"));
    }
}
