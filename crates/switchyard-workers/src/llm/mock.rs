//! Scripted LLM client for tests

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ChatRequest, ChatResponse, LlmClient, LlmError};

type Handler = dyn Fn(&ChatRequest) -> Result<ChatResponse, LlmError> + Send + Sync;

/// Answers every request with a closure and keeps the requests it saw
pub(crate) struct FnClient {
    handler: Box<Handler>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl FnClient {
    pub(crate) fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&ChatRequest) -> Result<ChatResponse, LlmError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Route on the system prompt: the first matching fragment wins
    pub(crate) fn by_system_prompt(routes: Vec<(&'static str, &'static str)>) -> Arc<Self> {
        Self::new(move |request| {
            let system = request.system_prompt().unwrap_or_default();
            routes
                .iter()
                .find(|(fragment, _)| system.contains(fragment))
                .map(|(_, reply)| ChatResponse::text(*reply))
                .ok_or_else(|| LlmError::Api {
                    status: 404,
                    body: format!("no scripted reply for system prompt '{}'", system),
                })
        })
    }

    /// Replies from a fixed script, one entry per request
    pub(crate) fn scripted(script: Vec<ChatResponse>) -> Arc<Self> {
        let script = Mutex::new(script.into_iter());
        Self::new(move |_| {
            script
                .lock()
                .next()
                .ok_or_else(|| LlmError::MalformedResponse("script exhausted".to_string()))
        })
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmClient for FnClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let response = (self.handler)(&request);
        self.requests.lock().push(request);
        response
    }
}
