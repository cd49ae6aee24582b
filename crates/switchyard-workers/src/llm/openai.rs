//! OpenAI-compatible chat completions client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ChatRequest, ChatResponse, LlmClient, LlmError, Role, ToolCall};

/// Connection and sampling settings for an LLM endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the LLM server
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Bearer token, if the server wants one
    pub api_key: Option<String>,
    /// Temperature for sampling
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Per-request timeout
    pub request_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            model: "gpt-4".to_string(),
            api_key: None,
            temperature: None,
            max_tokens: None,
            request_timeout_ms: 60_000,
        }
    }
}

impl LlmConfig {
    pub fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// HTTP client for OpenAI-compatible servers (OpenAI, llama.cpp, LM Studio, ...)
#[derive(Clone)]
pub struct OpenAiCompatClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }
}

/// Build the JSON body of a chat completions request
pub fn build_request_body(config: &LlmConfig, request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let mut body = json!({
                "role": role,
                "content": message.content,
            });
            if !message.tool_calls.is_empty() {
                body["tool_calls"] = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
            }
            if let Some(call_id) = &message.tool_call_id {
                body["tool_call_id"] = json!(call_id);
            }
            body
        })
        .collect();

    let mut body = json!({
        "model": config.model,
        "messages": messages,
        "stream": false,
    });

    if let Some(temperature) = config.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = config.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
    }
    if request.json_mode {
        body["response_format"] = json!({"type": "json_object"});
    }
    body
}

/// Extract the first choice of a chat completions response
pub fn parse_response(body: &Value) -> Result<ChatResponse, LlmError> {
    let message = body
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| LlmError::MalformedResponse("response has no choices".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for (index, call) in calls.iter().enumerate() {
            let name = call["function"]["name"].as_str().ok_or_else(|| {
                LlmError::MalformedResponse(format!("tool call {} has no function name", index))
            })?;
            // Arguments arrive as a JSON string; keep unparseable text for the tool to reject
            let arguments = match &call["function"]["arguments"] {
                Value::String(raw) => {
                    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
                }
                Value::Null => json!({}),
                other => other.clone(),
            };
            let id = call["id"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("call_{}", index));
            tool_calls.push(ToolCall {
                id,
                name: name.to_string(),
                arguments,
            });
        }
    }

    Ok(ChatResponse {
        content,
        tool_calls,
    })
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = self.config.completions_url();
        let body = build_request_body(&self.config, &request);

        log::debug!(
            "POST {} ({} messages, {} tools)",
            url,
            request.messages.len(),
            request.tools.len()
        );

        let mut builder = self.http.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited(error_body),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Unauthorized(error_body),
                StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => LlmError::Timeout,
                _ => LlmError::Api {
                    status: status.as_u16(),
                    body: error_body,
                },
            });
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;
        parse_response(&json)
    }
}
