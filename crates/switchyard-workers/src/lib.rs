//! Switchyard Workers
//!
//! Leaf workers and ready-made trees for the Switchyard engine.
//!
//! # Contents
//!
//! - **LLM**: [`LlmWorker`] over any [`LlmClient`], with an
//!   OpenAI-compatible HTTP client
//! - **Tools**: the [`Tool`] trait, closure-backed tools and
//!   [`AgentTool`] for exposing a worker as a tool
//! - **Agents**: [`ToolAgent`], a bounded model/tool loop
//! - **Builtins**: [`Passthrough`] and [`Assign`]
//! - **Patterns**: builders for common agent trees

pub mod agent;
pub mod builtin;
pub mod llm;
pub mod patterns;
pub mod template;
pub mod tool;

pub use agent::ToolAgent;
pub use builtin::{Assign, Passthrough};
pub use llm::{
    ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmConfig, LlmError, LlmWorker,
    OpenAiCompatClient, OutputFormat, Role, ToolCall, ToolDefinition,
};
pub use tool::{AgentTool, FnTool, Tool, ToolError, ToolRef, ToolWorker};
