//! LLM backend boundary.
//!
//! The [`Agent`](crate::agent::Agent) talks to a model only through
//! [`LlmProvider`]: a request carries the outbound messages and tool schema,
//! a response carries text, tool calls, and token counts. Wire formats stay
//! inside the adapters.
//!
//! - [`openrouter`]: OpenAI-shaped HTTP adapter for OpenRouter, with
//!   streaming and prompt-cache markers.
//! - [`streaming`]: incremental SSE decoder and response assembly.
//! - [`retry`]: transport-level exponential backoff. The agent loop itself
//!   never retries.

pub mod openrouter;
pub mod retry;
pub mod streaming;

pub use openrouter::OpenRouterProvider;
pub use retry::RetryConfig;
pub use streaming::{SseDecoder, StreamAccumulator, StreamEvent};

use crate::{Message, ToolCall, ToolDefinition};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by providers.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Callback receiving streamed text deltas. May run on any thread.
pub type ChunkCallback<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// One model request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    /// Ask the backend to cache the stable prompt prefix, where supported.
    pub cache_prompt: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            messages,
            tools,
            cache_prompt: false,
        }
    }

    pub fn with_cache_prompt(mut self, enabled: bool) -> Self {
        self.cache_prompt = enabled;
        self
    }
}

/// One model reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Why a provider call failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("API error: {0}")]
    Api(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("stream not established: {0}")]
    StreamNotEstablished(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Rate limits, server errors, and network failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Http { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }
}

/// A chat-completion backend.
///
/// Implementations own their transport, authentication, and retry policy.
pub trait LlmProvider: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    fn chat<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> ProviderFuture<'a, Result<ChatResponse, ProviderError>>;

    /// Stream the reply, calling `on_chunk` with each text delta, and return
    /// the assembled response. An `Err` means the stream could not be
    /// established or broke off.
    ///
    /// The default implementation calls [`chat`](Self::chat) and delivers the
    /// whole reply as one chunk.
    fn chat_stream<'a>(
        &'a self,
        request: &'a ChatRequest,
        on_chunk: ChunkCallback<'a>,
    ) -> ProviderFuture<'a, Result<ChatResponse, ProviderError>> {
        Box::pin(async move {
            let response = self.chat(request).await?;
            if !response.content.is_empty() {
                on_chunk(&response.content);
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Fixed;

    impl LlmProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn chat<'a>(
            &'a self,
            _request: &'a ChatRequest,
        ) -> ProviderFuture<'a, Result<ChatResponse, ProviderError>> {
            Box::pin(async { Ok(ChatResponse::text("whole reply").with_usage(3, 2)) })
        }
    }

    #[tokio::test]
    async fn default_stream_delivers_single_chunk() {
        let chunks = Mutex::new(Vec::new());
        let on_chunk = |s: &str| chunks.lock().unwrap().push(s.to_string());
        let response = Fixed
            .chat_stream(&ChatRequest::default(), &on_chunk)
            .await
            .unwrap();
        assert_eq!(response.content, "whole reply");
        assert_eq!(*chunks.lock().unwrap(), vec!["whole reply"]);
    }

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Transport("reset".into()).is_transient());
        assert!(
            ProviderError::Http {
                status: 429,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !ProviderError::Http {
                status: 401,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!ProviderError::Api("bad model".into()).is_transient());
    }

    #[test]
    fn error_messages() {
        let err = ProviderError::Http {
            status: 503,
            body: "overloaded".into(),
        };
        assert_eq!(err.to_string(), "HTTP 503: overloaded");
    }
}
