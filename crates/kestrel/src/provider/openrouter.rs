//! OpenRouter adapter: translates [`ChatRequest`]s into the OpenAI
//! chat-completions wire format and back.

use super::retry::{RetryConfig, with_retry};
use super::streaming::{SseDecoder, StreamAccumulator, StreamEvent, WireUsage};
use super::{ChatRequest, ChatResponse, ChunkCallback, LlmProvider, ProviderError, ProviderFuture};
use crate::{Message, MessageRole, ToolCall, ToolDefinition};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// OpenRouter chat completions endpoint.
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Async HTTP provider for OpenRouter (or any OpenAI-compatible endpoint via
/// [`with_base_url`](Self::with_base_url)).
///
/// ```ignore
/// let provider = OpenRouterProvider::new(std::env::var("OPENROUTER_KEY")?, "anthropic/claude-sonnet-4")?
///     .with_max_tokens(4096)
///     .with_retry(RetryConfig::with_retries(3));
/// ```
pub struct OpenRouterProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    referer: String,
    title: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    retry: RetryConfig,
}

impl std::fmt::Debug for OpenRouterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterProvider")
            .field("model", &self.model)
            .field("url", &self.url)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl OpenRouterProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kestrel/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            url: OPENROUTER_URL.to_string(),
            referer: "https://github.com/kestrel-agent/kestrel".to_string(),
            title: "kestrel".to_string(),
            max_tokens: None,
            temperature: None,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the `HTTP-Referer` and `X-Title` attribution headers.
    pub fn with_headers(mut self, referer: impl Into<String>, title: impl Into<String>) -> Self {
        self.referer = referer.into();
        self.title = title.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Request body in OpenAI chat-completions format.
    pub fn build_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| wire_message(m, request.cache_prompt))
            .collect();
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.iter().map(wire_tool).collect());
        }
        if let Some(max) = self.max_tokens {
            body["max_tokens"] = json!(max);
        }
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        if stream {
            body["stream"] = Value::Bool(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let resp = self
            .client
            .post(self.url.as_str())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(resp)
    }

    async fn chat_once(&self, body: &Value) -> Result<ChatResponse, ProviderError> {
        let start = Instant::now();
        let resp = self.send(body).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| ProviderError::Transport(format!("failed to read response: {e}")))?;
        debug!(
            "LLM response in {:.1}s ({} bytes)",
            start.elapsed().as_secs_f64(),
            text.len()
        );
        parse_response(&text)
    }

    async fn stream_once(
        &self,
        body: &Value,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<ChatResponse, ProviderError> {
        let mut resp = self
            .send(body)
            .await
            .map_err(|e| ProviderError::StreamNotEstablished(e.to_string()))?;

        let mut decoder = SseDecoder::new();
        let mut acc = StreamAccumulator::new();
        let forward = |events: Vec<StreamEvent>, acc: &mut StreamAccumulator| {
            for event in &events {
                if let StreamEvent::TextDelta(delta) = event {
                    on_chunk(delta);
                }
                acc.apply(event);
            }
        };

        // Read incrementally so long responses don't hit a single-body timeout.
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| ProviderError::Transport(format!("failed to read stream chunk: {e}")))?
        {
            forward(decoder.push(&chunk), &mut acc);
            if decoder.is_done() {
                break;
            }
        }
        forward(decoder.finish(), &mut acc);

        let response = acc.finish();
        debug!(
            "Stream completed: {} chars, {} tool call(s)",
            response.content.len(),
            response.tool_calls.len()
        );
        Ok(response)
    }
}

impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn chat<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> ProviderFuture<'a, Result<ChatResponse, ProviderError>> {
        Box::pin(async move {
            let body = self.build_body(request, false);
            debug!(
                "LLM request: model={}, messages={}, tools={}",
                self.model,
                request.messages.len(),
                request.tools.len()
            );
            trace!("Request payload: {body}");
            with_retry(&self.retry, || self.chat_once(&body)).await
        })
    }

    fn chat_stream<'a>(
        &'a self,
        request: &'a ChatRequest,
        on_chunk: ChunkCallback<'a>,
    ) -> ProviderFuture<'a, Result<ChatResponse, ProviderError>> {
        Box::pin(async move {
            let body = self.build_body(request, true);
            debug!("LLM streaming request: model={}", self.model);
            self.stream_once(&body, on_chunk).await
        })
    }
}

// ── Wire format ────────────────────────────────────────────────────

fn wire_message(message: &Message, cache_prompt: bool) -> Value {
    match message.role {
        MessageRole::System if cache_prompt => json!({
            "role": "system",
            "content": [{
                "type": "text",
                "text": message.content,
                "cache_control": {"type": "ephemeral"},
            }],
        }),
        MessageRole::Assistant if message.has_tool_calls() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {"name": c.name, "arguments": c.arguments.to_string()},
                    })
                })
                .collect();
            let content = if message.content.is_empty() {
                Value::Null
            } else {
                Value::String(message.content.clone())
            };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        MessageRole::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        }),
        role => json!({"role": role.to_string(), "content": message.content}),
    }
}

fn wire_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        },
    })
}

/// Decode a wire `arguments` string. Undecodable text is kept as a JSON
/// string so the tool layer can report it.
pub(crate) fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<RawToolCall>>,
}

#[derive(Deserialize, Debug)]
struct RawToolCall {
    id: String,
    function: RawFunction,
}

#[derive(Deserialize, Debug)]
struct RawFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Decode a non-streaming response body.
pub fn parse_response(text: &str) -> Result<ChatResponse, ProviderError> {
    let parsed: RawChatResponse = serde_json::from_str(text)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    if let Some(err) = parsed.error {
        return Err(ProviderError::Api(err.message));
    }

    let (input_tokens, output_tokens) = parsed
        .usage
        .map(|u| (u.prompt_tokens.unwrap_or(0), u.completion_tokens.unwrap_or(0)))
        .unwrap_or_default();
    let choice = parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| ProviderError::MalformedResponse("response has no choices".into()))?;

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| ToolCall::new(c.id, c.function.name, parse_arguments(&c.function.arguments)))
        .collect();
    debug!(
        "LLM output: {} tool call(s), usage {input_tokens}/{output_tokens}",
        tool_calls.len()
    );

    Ok(ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        input_tokens,
        output_tokens,
        finish_reason: choice.finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenRouterProvider {
        OpenRouterProvider::new("test-key", "test/model").unwrap()
    }

    #[test]
    fn body_translates_messages() {
        let request = ChatRequest::new(
            vec![
                Message::system("be brief"),
                Message::user("list files"),
                Message::assistant("", vec![ToolCall::new("c1", "ls", json!({"path": "."}))]),
                Message::tool_result("c1", "a.rs\nb.rs"),
            ],
            vec![ToolDefinition::new("ls", "List files", json!({"type": "object"}))],
        );
        let body = provider().with_max_tokens(256).build_body(&request, false);

        assert_eq!(body["model"], "test/model");
        assert_eq!(body["max_tokens"], 256);
        assert!(body.get("stream").is_none());
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs[0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(msgs[2]["content"], Value::Null);
        assert_eq!(msgs[2]["tool_calls"][0]["function"]["arguments"], r#"{"path":"."}"#);
        assert_eq!(msgs[3]["tool_call_id"], "c1");
        assert_eq!(body["tools"][0]["function"]["name"], "ls");
    }

    #[test]
    fn cache_prompt_marks_system_message() {
        let request = ChatRequest::new(vec![Message::system("stable prefix")], vec![])
            .with_cache_prompt(true);
        let body = provider().build_body(&request, true);
        let system = &body["messages"][0];
        assert_eq!(system["content"][0]["text"], "stable prefix");
        assert_eq!(system["content"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(body["stream"], true);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn parses_tool_call_response() {
        let text = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{"id": "call_9", "type": "function",
                        "function": {"name": "grep", "arguments": "{\"pattern\":\"fn\"}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 50, "completion_tokens": 7, "total_tokens": 57}
        }"#;
        let response = parse_response(text).unwrap();
        assert_eq!(response.content, "");
        assert_eq!(response.tool_calls[0].name, "grep");
        assert_eq!(response.tool_calls[0].arguments, json!({"pattern": "fn"}));
        assert_eq!((response.input_tokens, response.output_tokens), (50, 7));
    }

    #[test]
    fn api_error_and_malformed_bodies() {
        assert_eq!(
            parse_response(r#"{"error": {"message": "no such model"}}"#),
            Err(ProviderError::Api("no such model".into()))
        );
        assert!(matches!(
            parse_response("<html>"),
            Err(ProviderError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_response(r#"{"choices": []}"#),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn argument_decoding() {
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_arguments("{broken"), json!("{broken"));
    }
}
